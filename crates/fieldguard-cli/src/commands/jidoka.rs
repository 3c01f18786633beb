use clap::Subcommand;
use console::style;

use fieldguard_core::{FieldGuardError, ReadingType, Result, SensorReading};
use fieldguard_safety::{JidokaEvent, RollbackPlan, RollbackSource, SafetyGate, Severity};

use super::approvals::default_unit;
use super::print_json;

#[derive(Subcommand)]
pub enum JidokaAction {
    /// List line stops (unresolved only unless --all)
    List {
        /// Include resolved events
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one event with its recommended actions
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull the andon cord: stop actuation everywhere, or for one sensor or actuator
    Stop {
        /// Why the line is being stopped
        reason: String,
        /// Stop only actions covered by this sensor
        #[arg(long, conflicts_with = "actuator")]
        sensor: Option<String>,
        /// Stop only actions targeting this actuator
        #[arg(long)]
        actuator: Option<String>,
    },
    /// Resolve an event and let the line run again
    Resolve {
        id: String,
        /// What was done about it
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RollbackAction {
    /// Generate (or fetch) the plan reversing an action or a line stop
    Generate {
        /// Approval request ID of the action to reverse
        #[arg(long, conflicts_with = "event", required_unless_present = "event")]
        action: Option<String>,
        /// Jidoka event ID to respond to
        #[arg(long)]
        event: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a plan
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a plan as carried out
    Executed { id: String },
}

pub fn cmd_reading(
    gate: &SafetyGate,
    sensor: String,
    reading_type: ReadingType,
    value: f64,
    unit: Option<String>,
    battery: Option<f64>,
) -> Result<()> {
    let unit = unit.unwrap_or_else(|| default_unit(reading_type).to_string());
    let mut reading = SensorReading::new(sensor, reading_type, value, unit);
    if let Some(pct) = battery {
        reading = reading.with_battery(pct);
    }
    let fired = gate.report_reading(&reading)?;
    if fired.is_empty() {
        println!("✅ {} {} = {} {}: within thresholds", reading.sensor_id, reading_type, value, reading.unit);
    }
    for event in &fired {
        print_event_line(event);
    }
    Ok(())
}

pub fn cmd_jidoka(gate: &SafetyGate, action: JidokaAction, actor: &str) -> Result<()> {
    match action {
        JidokaAction::List { all, json } => {
            let events = gate.list_jidoka(!all)?;
            if json {
                return print_json(&events);
            }
            if events.is_empty() {
                println!("{}", style("No line stops. ✅").green());
                return Ok(());
            }
            for event in &events {
                print_event_line(event);
            }
            Ok(())
        }
        JidokaAction::Show { id, json } => {
            let event = gate.get_jidoka(&id)?;
            if json {
                return print_json(&event);
            }
            print_event(&event);
            Ok(())
        }
        JidokaAction::Stop {
            reason,
            sensor,
            actuator,
        } => {
            let event = gate.manual_stop(actor, sensor.as_deref(), actuator.as_deref(), &reason)?;
            println!("🛑 Line stopped by {actor}: {}", event.id);
            for taken in &event.actions_taken {
                println!("   • {taken}");
            }
            Ok(())
        }
        JidokaAction::Resolve { id, notes } => {
            let event = gate.resolve_jidoka(&id, actor, notes.as_deref())?;
            println!("✅ {} resolved by {actor}", event.id);
            Ok(())
        }
    }
}

pub fn cmd_rollback(gate: &SafetyGate, action: RollbackAction, actor: &str) -> Result<()> {
    match action {
        RollbackAction::Generate { action, event, json } => {
            let source = match (action, event) {
                (Some(id), _) => RollbackSource::Action(id),
                (None, Some(id)) => RollbackSource::JidokaEvent(id),
                (None, None) => {
                    return Err(FieldGuardError::InvalidInput(
                        "either --action or --event is required".into(),
                    ));
                }
            };
            let plan = gate.generate_rollback(source)?;
            if json {
                return print_json(&plan);
            }
            print_plan(&plan);
            Ok(())
        }
        RollbackAction::Show { id, json } => {
            let plan = gate.get_rollback(&id)?;
            if json {
                return print_json(&plan);
            }
            print_plan(&plan);
            Ok(())
        }
        RollbackAction::Executed { id } => {
            let plan = gate.mark_rollback_executed(&id, actor)?;
            println!("✅ Rollback {} marked executed by {actor}", plan.id);
            Ok(())
        }
    }
}

fn severity_badge(severity: Severity) -> console::StyledObject<&'static str> {
    let s = style(severity.as_str());
    match severity {
        Severity::Emergency => s.red().bold().reverse(),
        Severity::Critical => s.red().bold(),
        Severity::Warning => s.yellow(),
    }
}

fn print_event_line(event: &JidokaEvent) {
    let state = if event.resolved { style("resolved").dim() } else { style("OPEN").red() };
    println!(
        "{} {}  {:<9}  {}  {}  {}",
        if event.severity.stops_line() && !event.resolved { "🛑" } else { "⚠️ " },
        style(event.timestamp.format("%Y-%m-%d %H:%M")).dim(),
        severity_badge(event.severity),
        state,
        event.id,
        event.message
    );
}

fn print_event(event: &JidokaEvent) {
    println!("{} {}", style("Jidoka event").bold(), event.id);
    println!("   Trigger:   {}", event.trigger_kind);
    println!("   Severity:  {}", severity_badge(event.severity));
    println!("   Message:   {}", event.message);
    if let Some(sensor) = &event.sensor_id {
        println!("   Sensor:    {sensor}");
    }
    if let Some(actuator) = &event.actuator_id {
        println!("   Actuator:  {actuator}");
    }
    if let (Some(value), Some(threshold)) = (event.current_value, event.threshold) {
        println!("   Reading:   {value} (threshold {threshold})");
    }
    if event.resolved {
        println!(
            "   Resolved:  {} at {}",
            event.resolved_by.as_deref().unwrap_or("unknown"),
            event.resolved_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        if let Some(notes) = &event.notes {
            println!("   Notes:     {notes}");
        }
    } else {
        println!("   Status:    {}", style("unresolved").red().bold());
    }
    if !event.actions_taken.is_empty() {
        println!("   Actions taken:");
        for taken in &event.actions_taken {
            println!("     • {taken}");
        }
    }
    println!("   Recommended:");
    for step in event.recommended_actions() {
        println!("     → {step}");
    }
}

fn print_plan(plan: &RollbackPlan) {
    println!("{} {}", style("Rollback plan").bold(), plan.id);
    println!("   For:       {} ({})", plan.original_action, plan.original_action_id);
    println!("   Priority:  {}", plan.priority.as_str());
    println!("   Estimate:  {} min", plan.estimated_total_minutes);
    if !plan.trigger_conditions.is_empty() {
        println!("   Triggers:  {}", plan.trigger_conditions.join(", "));
    }
    for step in &plan.steps {
        let who = if step.manual { style("manual").yellow() } else { style("auto").cyan() };
        let minutes = step
            .estimated_duration_minutes
            .map(|m| format!(" (~{m} min)"))
            .unwrap_or_default();
        println!("   {:>2}. [{who}] {}{minutes}", step.step, step.action);
        if let Some(command) = &step.command {
            println!("       $ {}", style(command).dim());
        }
        if let Some(notes) = &step.notes {
            println!("       {}", style(notes).dim());
        }
    }
    if plan.executed {
        println!(
            "   Executed:  {}",
            plan.executed_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
    }
}
