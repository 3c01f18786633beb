use chrono::Utc;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use fieldguard_config::ConfigLoader;
use fieldguard_core::{Event, Result};
use fieldguard_safety::{SafetyGate, spawn_expiry_sweeper};

/// Actor recorded when a config file edit changes the gate.
const CONFIG_ACTOR: &str = "config_reload";

/// Run the sweeper and config watcher, printing every published safety event
/// until Ctrl-C.
pub async fn cmd_run(config_loader: ConfigLoader, gate: SafetyGate) -> Result<()> {
    let config = config_loader.get();
    let gate = Arc::new(gate);
    let every = Duration::from_secs(config.safety.sweep_interval_secs);

    // Subscribe before anything can publish.
    let mut events = gate.events().subscribe();

    let sweeper = spawn_expiry_sweeper(Arc::clone(&gate), every);

    // Kept alive for the duration of the run
    let reload_gate = Arc::clone(&gate);
    let _watcher = match config_loader.watch(move |new_config| {
        if let Err(e) = reload_gate.apply_config(new_config, CONFIG_ACTOR) {
            error!(error = %e, "failed to apply reloaded config");
        }
    }) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };

    let state = gate.chain_state()?;
    println!("{}", style("🌱 FieldGuard running").bold());
    println!("   Automation level: {}", gate.automation_level());
    println!("   Audit chain:      {} entries", state.entry_count);
    println!("   Config:           {}", config_loader.path().display());
    println!("   Press Ctrl-C to stop");
    println!();
    if !state.chain_valid {
        warn!(invalid_at = ?state.invalid_at, "audit chain failed verification at startup");
    }

    let mut heartbeat = tokio::time::interval(every);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                gate.events().publish(Event::Heartbeat { timestamp: Utc::now() });
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    sweeper.abort();
    println!("👋 FieldGuard stopped");
    Ok(())
}

fn print_event(event: &Event) {
    let now = style(Utc::now().format("%H:%M:%S")).dim();
    match event {
        Event::ApprovalRequested {
            request_id,
            action,
            reason,
        } => println!("{now} {} {request_id} {action} ({reason})", style("approval requested").yellow()),
        Event::ApprovalGranted {
            request_id,
            approved_by,
        } => println!("{now} {} {request_id} by {approved_by}", style("approved").green()),
        Event::ApprovalRejected {
            request_id,
            rejected_by,
        } => println!("{now} {} {request_id} by {rejected_by}", style("rejected").red()),
        Event::ApprovalExpired { request_id } => println!("{now} {} {request_id}", style("expired").dim()),
        Event::ApprovalCancelled { request_id } => println!("{now} {} {request_id}", style("cancelled").dim()),
        Event::ActionExecuted { request_id, success } => {
            let outcome = if *success { style("executed").green() } else { style("failed").red() };
            println!("{now} {outcome} {request_id}");
        }
        Event::JidokaTriggered {
            event_id,
            trigger,
            severity,
            sensor_id,
        } => println!(
            "{now} {} {trigger} [{severity}] {event_id}{}",
            style("🛑 jidoka").red().bold(),
            sensor_id.as_deref().map(|s| format!(" sensor {s}")).unwrap_or_default()
        ),
        Event::JidokaResolved { event_id, resolved_by } => {
            println!("{now} {} {event_id} by {resolved_by}", style("jidoka resolved").green())
        }
        Event::RollbackGenerated {
            plan_id,
            original_action_id,
        } => println!("{now} {} {plan_id} for {original_action_id}", style("rollback plan").cyan()),
        Event::ConfigChanged { key, value } => {
            println!("{now} {} {key} = {value}", style("config").magenta())
        }
        Event::Heartbeat { timestamp } => debug!(%timestamp, "heartbeat"),
    }
}
