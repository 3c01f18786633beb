use chrono::{DateTime, Utc};
use clap::Subcommand;
use console::style;
use std::path::PathBuf;

use fieldguard_core::{FieldGuardError, Result};
use fieldguard_safety::{AuditEntryType, AuditQuery, SafetyGate};

use super::{print_json, truncate_output};

#[derive(Subcommand)]
pub enum AuditAction {
    /// Re-derive every hash and check every link back to genesis
    Verify {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent audit entries
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Filter by entry type (e.g. action_approved, jidoka_triggered)
        #[arg(short = 't', long = "type")]
        entry_type: Option<AuditEntryType>,
        /// Only entries at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only entries at or before this RFC 3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Entry counts by type
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the whole chain as JSON lines
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Append an exported chain that continues this one
    Import { input: PathBuf },
    /// Append a manual log entry
    Log {
        /// What happened
        message: String,
        /// Extra details as a JSON object
        #[arg(long)]
        details: Option<String>,
    },
}

pub fn cmd_audit(gate: &SafetyGate, action: AuditAction, actor: &str) -> Result<()> {
    match action {
        AuditAction::Verify { json } => {
            let verification = gate.verify_chain()?;
            if json {
                print_json(&verification)?;
            } else if verification.valid {
                let state = gate.chain_state()?;
                println!(
                    "✅ Audit chain intact: {} entries, head {}",
                    state.entry_count,
                    style(&state.last_hash).dim()
                );
            } else {
                println!(
                    "{} Audit chain broken at entry {}: {}",
                    style("❌").red(),
                    verification.invalid_at.unwrap_or(0),
                    verification.reason.as_deref().unwrap_or("unknown")
                );
            }
            verification.into_result()
        }
        AuditAction::List {
            limit,
            entry_type,
            since,
            until,
            json,
        } => {
            let entries = gate.list_audit(&AuditQuery {
                entry_type,
                since,
                until,
                limit: Some(limit),
            })?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!(
                    "No audit entries{}",
                    entry_type.map(|t| format!(" of type '{t}'")).unwrap_or_default()
                );
                return Ok(());
            }

            println!("{} ({} entries)", style("Audit Log").bold(), entries.len());
            println!("{}", "-".repeat(80));
            for entry in &entries {
                let etype = entry.entry_type.as_str();
                let kind = match entry.entry_type {
                    AuditEntryType::ActionRejected | AuditEntryType::ActionFailed => style(etype).red(),
                    AuditEntryType::JidokaTriggered => style(etype).red().bold(),
                    AuditEntryType::ActionProposed => style(etype).yellow(),
                    AuditEntryType::ActionApproved | AuditEntryType::ActionExecuted => style(etype).green(),
                    AuditEntryType::ConfigChanged => style(etype).magenta(),
                    _ => style(etype).cyan(),
                };
                println!(
                    "{}  {kind}  {}  {}",
                    style(entry.timestamp.to_rfc3339()).dim(),
                    entry.actor,
                    entry.action
                );
                if let Some(details) = &entry.details {
                    println!("   {}", style(truncate_output(&details.to_string(), 120)).dim());
                }
            }
            Ok(())
        }
        AuditAction::Summary { json } => {
            let counts = gate.audit_summary()?;
            if json {
                return print_json(&counts);
            }
            let total: usize = counts.values().sum();
            println!("{} ({total} entries)", style("Audit summary").bold());
            for (kind, n) in &counts {
                println!("   {kind:<20} {n}");
            }
            Ok(())
        }
        AuditAction::Export { output } => {
            let jsonl = gate.export_audit()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &jsonl)?;
                    eprintln!("Exported {} entries to {}", jsonl.lines().count(), path.display());
                }
                None => print!("{jsonl}"),
            }
            Ok(())
        }
        AuditAction::Import { input } => {
            let data = std::fs::read_to_string(&input)?;
            let imported = gate.import_audit(&data)?;
            println!("✅ Imported {imported} entries from {}", input.display());
            Ok(())
        }
        AuditAction::Log { message, details } => {
            let details = details
                .map(|raw| {
                    serde_json::from_str::<serde_json::Value>(&raw)
                        .map_err(|e| FieldGuardError::InvalidInput(format!("--details is not JSON: {e}")))
                })
                .transpose()?;
            let entry = gate.log_manual(actor, &message, details)?;
            println!("📝 Logged {} ({})", entry.id, style(&entry.hash).dim());
            Ok(())
        }
    }
}
