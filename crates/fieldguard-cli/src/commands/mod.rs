use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};

use fieldguard_config::{ConfigLoader, FieldGuardConfig, WarningSeverity};
use fieldguard_core::{FieldGuardError, ReadingType, Result};
use fieldguard_safety::{ApprovalStatus, AutomationLevel, SafetyGate};
use fieldguard_store::SqliteStore;

mod approvals;
mod audit;
mod jidoka;
mod run;

use approvals::ApprovalAction;
use audit::AuditAction;
use jidoka::{JidokaAction, RollbackAction};

/// 🌱 FieldGuard — safety gate and tamper-evident audit for farm actuators
#[derive(Parser)]
#[command(name = "fieldguard", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to fieldguard.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Name recorded in the audit chain for operator actions
    #[arg(short, long, global = true, env = "FIELDGUARD_ACTOR", default_value = "operator")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the safety core: expiry sweeper, config hot-reload, live event stream
    Run,
    /// Show automation level, chain integrity, and open approvals and stops
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration for unsafe settings
    Doctor,
    /// Change the automation level ceiling (audited and saved to fieldguard.toml)
    Level {
        /// 0 observe, 1 assist, 2 supervised, 3 trusted, 4 autonomous
        #[arg(value_parser = clap::value_parser!(u8).range(0..=4))]
        level: u8,
        /// Record the change without writing it to the config file
        #[arg(long)]
        no_save: bool,
    },
    /// Feed one sensor reading through the Jidoka monitor
    Reading {
        /// Sensor ID
        sensor: String,
        /// soil_moisture, soil_ec, temperature, humidity, or flow_rate
        reading_type: ReadingType,
        #[arg(allow_negative_numbers = true)]
        value: f64,
        /// Unit label (defaults by reading type)
        #[arg(long)]
        unit: Option<String>,
        /// Sensor battery percentage
        #[arg(long)]
        battery: Option<f64>,
    },
    /// Propose, decide, and track actuator actions
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Line stops: list, pull the cord by hand, resolve
    Jidoka {
        #[command(subcommand)]
        action: JidokaAction,
    },
    /// Rollback plans for actions and line stops
    Rollback {
        #[command(subcommand)]
        action: RollbackAction,
    },
    /// Inspect and verify the audit chain
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(&config.logging.format, log_level);

        let actor = self.actor.as_str();
        match self.command {
            Commands::Run => run::cmd_run(config_loader, open_gate(&config)?).await,
            Commands::Status { json } => Self::cmd_status(&config, json),
            Commands::Version => Self::cmd_version(),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Doctor => Self::cmd_doctor(&config),
            Commands::Level { level, no_save } => {
                let path = (!no_save).then(|| config_loader.path());
                Self::cmd_level(&config, path, level, actor)
            }
            Commands::Reading {
                sensor,
                reading_type,
                value,
                unit,
                battery,
            } => jidoka::cmd_reading(&open_gate(&config)?, sensor, reading_type, value, unit, battery),
            Commands::Approvals { action } => approvals::cmd_approvals(&open_gate(&config)?, action, actor),
            Commands::Jidoka { action } => jidoka::cmd_jidoka(&open_gate(&config)?, action, actor),
            Commands::Rollback { action } => jidoka::cmd_rollback(&open_gate(&config)?, action, actor),
            Commands::Audit { action } => audit::cmd_audit(&open_gate(&config)?, action, actor),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_status(config: &FieldGuardConfig, json: bool) -> Result<()> {
        let gate = open_gate(config)?;
        let state = gate.chain_state()?;
        let pending = gate.list_approvals(Some(ApprovalStatus::Pending), None)?;
        let stops = gate.list_jidoka(true)?;

        if json {
            return print_json(&serde_json::json!({
                "automation_level": gate.automation_level(),
                "db_path": config.store.db_path,
                "chain": state,
                "pending_approvals": pending.len(),
                "unresolved_jidoka": stops,
            }));
        }

        let level = gate.automation_level();
        println!("{}", style("🌱 FieldGuard status").bold());
        println!("   Automation level: {level} — {}", level.description());
        if !level.allows_actuation() {
            println!("   Actuation:        {}", style("disabled at this level").yellow());
        }
        println!("   Store:            {}", config.store.db_path.display());
        let integrity = if state.chain_valid {
            style("intact".to_string()).green()
        } else {
            style(format!("BROKEN at entry {}", state.invalid_at.unwrap_or(0))).red().bold()
        };
        println!("   Audit chain:      {} entries, {integrity}", state.entry_count);
        println!("   Last hash:        {}", style(&state.last_hash).dim());
        println!("   Pending:          {}", pending.len());
        if stops.is_empty() {
            println!("   Line stops:       {}", style("none").green());
        } else {
            println!("   Line stops:       {}", style(stops.len()).red().bold());
            for event in &stops {
                println!(
                    "     {} {} [{}] {}",
                    style("■").red(),
                    event.id,
                    event.severity,
                    event.message
                );
            }
        }
        Ok(())
    }

    fn cmd_config(config: &FieldGuardConfig, json: bool) -> Result<()> {
        if json {
            print_json(config)
        } else {
            let rendered = toml::to_string_pretty(config).map_err(|e| FieldGuardError::Config(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
    }

    fn cmd_doctor(config: &FieldGuardConfig) -> Result<()> {
        println!("🩺 FieldGuard Doctor — Configuration Audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        // Beyond config validation: the chain itself.
        let mut ok_count = 0;
        if config.store.db_path.exists() {
            let gate = open_gate(config)?;
            let verification = gate.verify_chain()?;
            if verification.valid {
                println!("  ✅ audit chain: {} entries verified", gate.chain_state()?.entry_count);
                ok_count += 1;
            } else {
                println!(
                    "  ❌ audit chain: broken at entry {} ({})",
                    verification.invalid_at.unwrap_or(0),
                    verification.reason.unwrap_or_default()
                );
                warn_count += 1;
            }
            let open = gate.list_jidoka(true)?;
            if open.is_empty() {
                ok_count += 1;
            } else {
                println!("  ⚠️  jidoka: {} unresolved line stop(s)", open.len());
                warn_count += 1;
            }
        } else {
            println!("  💡 store.db_path: {} does not exist yet", config.store.db_path.display());
            info_count += 1;
        }

        println!();
        println!("  ✅ {ok_count} checks passed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");
        Ok(())
    }

    fn cmd_level(config: &FieldGuardConfig, save_to: Option<&Path>, level: u8, actor: &str) -> Result<()> {
        let gate = open_gate(config)?;
        let from = gate.automation_level();
        let to = AutomationLevel::from_u8(level);
        if from == to {
            println!("Automation level already {to}");
        } else {
            gate.set_automation_level(to, actor)?;
            println!("✅ Automation level {from} → {}", style(to).bold());
        }
        if let Some(path) = save_to {
            save_level(path, level)?;
            println!("   Saved to {}", path.display());
        }
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("🌱 FieldGuard v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "fieldguard", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(format: &str, log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Open the gate over the configured SQLite store, with usage counters
/// rebuilt from the chain so daily limits hold across invocations.
fn open_gate(config: &FieldGuardConfig) -> Result<SafetyGate> {
    let store = SqliteStore::open(&config.store.db_path)?;
    let gate = SafetyGate::new(config, store.stores());
    gate.restore_usage()?;
    Ok(gate)
}

/// Write `safety.automation_level` into the config file, keeping the rest.
fn save_level(path: &Path, level: u8) -> Result<()> {
    let mut doc: toml::Table = if path.exists() {
        toml::from_str(&std::fs::read_to_string(path)?)
            .map_err(|e| FieldGuardError::Config(format!("invalid TOML in {}: {e}", path.display())))?
    } else {
        toml::Table::new()
    };
    let safety = doc
        .entry("safety")
        .or_insert(toml::Value::Table(toml::Table::new()));
    let Some(table) = safety.as_table_mut() else {
        return Err(FieldGuardError::Config(format!(
            "[safety] in {} is not a table",
            path.display()
        )));
    };
    table.insert("automation_level".into(), toml::Value::Integer(i64::from(level)));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&doc).map_err(|e| FieldGuardError::Config(e.to_string()))?;
    std::fs::write(path, rendered)?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}
