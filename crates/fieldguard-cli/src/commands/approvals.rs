use clap::Subcommand;
use console::style;

use fieldguard_core::{FieldGuardError, GuardrailCheck, ReadingType, Result, SensorReading};
use fieldguard_safety::{
    ActionParams, ActionProposal, ActionType, ApprovalRequest, ApprovalStatus, AutomationLevel, Decision,
    ExecutionOutcome, SafetyGate,
};

use super::{print_json, truncate_output};

#[derive(Subcommand)]
pub enum ApprovalAction {
    /// List approval requests, newest first
    List {
        /// Only requests in this status (pending, approved, rejected, expired, cancelled)
        #[arg(short, long)]
        status: Option<ApprovalStatus>,
        /// Number of requests to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one request with its guardrail checks
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Propose an actuator action and run it through the guardrails
    Propose {
        /// water, fertilize, ventilate, notify, or other
        action_type: ActionType,
        /// What the action does, in words
        description: String,
        /// Zone or actuator the action targets
        #[arg(short, long)]
        target: Option<String>,
        /// Display name of the target
        #[arg(long)]
        target_name: Option<String>,
        /// Why the action is proposed
        #[arg(long, default_value = "")]
        reason: String,
        /// Requested automation level (defaults to the configured ceiling)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
        level: Option<u8>,
        /// Gallons of water the action applies
        #[arg(long)]
        gallons: Option<f64>,
        /// Millilitres of fertilizer the action applies
        #[arg(long)]
        fertilizer_ml: Option<f64>,
        /// How long the actuator runs, in minutes
        #[arg(long)]
        duration: Option<f64>,
        /// Sensors covering the target (repeatable)
        #[arg(short, long = "sensor")]
        sensors: Vec<String>,
        /// Reading to report before proposing, as SENSOR:TYPE=VALUE (repeatable)
        #[arg(short, long = "reading", value_parser = parse_reading)]
        readings: Vec<SensorReading>,
        /// Recommender confidence, 0..1
        #[arg(long)]
        confidence: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve a pending request
    Approve {
        id: String,
        /// Note kept with the decision
        #[arg(long)]
        note: Option<String>,
    },
    /// Reject a pending request
    Reject {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Withdraw a pending request
    Cancel {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Record the actuator's final outcome for an approved request
    Executed {
        id: String,
        /// The action failed after all retries
        #[arg(long)]
        failed: bool,
        /// Retries the actuator bridge made
        #[arg(long, default_value = "0")]
        retries: u32,
        /// Failure detail
        #[arg(long)]
        error: Option<String>,
        /// Result detail
        #[arg(long)]
        result: Option<String>,
    },
    /// Expire every pending request whose window has closed
    Sweep,
}

pub fn cmd_approvals(gate: &SafetyGate, action: ApprovalAction, actor: &str) -> Result<()> {
    match action {
        ApprovalAction::List { status, limit, json } => {
            let requests = gate.list_approvals(status, Some(limit))?;
            if json {
                return print_json(&requests);
            }
            if requests.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }
            println!("{} ({} shown)", style("Approval requests").bold(), requests.len());
            println!("{}", "-".repeat(80));
            for r in &requests {
                println!(
                    "{}  {:<9}  {}  {}  {}",
                    style(r.created_at.format("%Y-%m-%d %H:%M")).dim(),
                    status_style(r.status),
                    r.id,
                    r.action_type,
                    truncate_output(&r.proposed_action, 40)
                );
            }
            Ok(())
        }
        ApprovalAction::Show { id, json } => {
            let request = gate.get_approval(&id)?;
            if json {
                print_json(&request)
            } else {
                print_request(&request);
                Ok(())
            }
        }
        ApprovalAction::Propose {
            action_type,
            description,
            target,
            target_name,
            reason,
            level,
            gallons,
            fertilizer_ml,
            duration,
            mut sensors,
            readings,
            confidence,
            json,
        } => {
            for reading in &readings {
                gate.report_reading(reading)?;
                if !sensors.contains(&reading.sensor_id) {
                    sensors.push(reading.sensor_id.clone());
                }
            }

            let level = level.map_or_else(|| gate.automation_level(), AutomationLevel::from_u8);
            let mut proposal = ActionProposal::new(action_type, description, level)
                .reason(reason)
                .proposed_by(actor)
                .params(ActionParams {
                    water_gallons: gallons,
                    fertilizer_ml,
                    duration_minutes: duration,
                    sensor_ids: sensors,
                });
            if let Some(target) = target {
                proposal = proposal.target(target, target_name.as_deref());
            }
            if let Some(c) = confidence {
                proposal = proposal.confidence(c);
            }

            match gate.propose_action(proposal) {
                Ok(request) if json => print_json(&request),
                Ok(request) => {
                    print_request(&request);
                    Ok(())
                }
                Err(FieldGuardError::PolicyViolation { request_id, checks }) => {
                    if !json {
                        println!("{} request {request_id} rejected by guardrails", style("✗").red().bold());
                        print_checks(&checks);
                    }
                    Err(FieldGuardError::PolicyViolation { request_id, checks })
                }
                Err(e) => Err(e),
            }
        }
        ApprovalAction::Approve { id, note } => {
            let request = gate.decide(&id, Decision::Approve, actor, note.as_deref())?;
            println!("✅ {} approved by {actor}", request.id);
            Ok(())
        }
        ApprovalAction::Reject { id, reason } => {
            let request = gate.decide(&id, Decision::Reject, actor, reason.as_deref())?;
            println!("🚫 {} rejected by {actor}", request.id);
            Ok(())
        }
        ApprovalAction::Cancel { id, reason } => {
            let request = gate.cancel(&id, actor, reason.as_deref())?;
            println!("{} cancelled", request.id);
            Ok(())
        }
        ApprovalAction::Executed {
            id,
            failed,
            retries,
            error,
            result,
        } => {
            let request = gate.record_execution(
                &id,
                ExecutionOutcome {
                    success: !failed,
                    retry_count: retries,
                    error,
                    result,
                },
            )?;
            println!(
                "{} {}: {}",
                if failed { "❌" } else { "✅" },
                request.id,
                request.execution_result.unwrap_or_default()
            );
            Ok(())
        }
        ApprovalAction::Sweep => {
            let expired = gate.sweep_expired()?;
            if expired.is_empty() {
                println!("No pending requests past their window.");
            }
            for r in &expired {
                println!("⏰ {} expired ({})", r.id, r.proposed_action);
            }
            Ok(())
        }
    }
}

fn print_request(r: &ApprovalRequest) {
    println!("{} {}", style("Approval").bold(), r.id);
    println!("   Status:     {}", status_style(r.status));
    println!("   Level:      {}", r.automation_level);
    println!("   Action:     {} — {}", r.action_type, r.proposed_action);
    if let Some(target) = &r.target_id {
        match &r.target_name {
            Some(name) => println!("   Target:     {target} ({name})"),
            None => println!("   Target:     {target}"),
        }
    }
    if !r.reason.is_empty() {
        println!("   Reason:     {}", r.reason);
    }
    if let Some(gallons) = r.parameters.water_gallons {
        println!("   Water:      {gallons} gal");
    }
    println!("   Created:    {}", r.created_at.to_rfc3339());
    println!("   Expires:    {}", r.expires_at.to_rfc3339());
    if let (Some(by), Some(at)) = (&r.approved_by, r.approved_at) {
        println!("   Approved:   {by} at {}", at.to_rfc3339());
    }
    if let (Some(by), Some(at)) = (&r.rejected_by, r.rejected_at) {
        let why = r.rejection_reason.as_deref().unwrap_or("no reason given");
        println!("   Rejected:   {by} at {} ({why})", at.to_rfc3339());
    }
    if let Some(by) = &r.cancelled_by {
        match &r.cancellation_reason {
            Some(why) => println!("   Cancelled:  {by} ({why})"),
            None => println!("   Cancelled:  {by}"),
        }
    }
    if let Some(result) = &r.execution_result {
        println!("   Executed:   {result}");
    }
    if !r.guardrail_checks.is_empty() {
        print_checks(&r.guardrail_checks);
    }
}

fn print_checks(checks: &[GuardrailCheck]) {
    println!("   Guardrails:");
    for c in checks {
        let mark = if c.passed { style("✓").green() } else { style("✗").red().bold() };
        println!("     {mark} {:<20} {}", c.kind.as_str(), c.message);
    }
}

fn status_style(status: ApprovalStatus) -> console::StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        ApprovalStatus::Pending => s.yellow(),
        ApprovalStatus::Approved => s.green(),
        ApprovalStatus::Rejected => s.red(),
        ApprovalStatus::Expired | ApprovalStatus::Cancelled => s.dim(),
    }
}

/// Parse `SENSOR:TYPE=VALUE`, e.g. `soil-3:soil_moisture=41.5`.
pub(crate) fn parse_reading(s: &str) -> std::result::Result<SensorReading, String> {
    let (lhs, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid SENSOR:TYPE=VALUE: no `=` found in `{s}`"))?;
    let (sensor, kind) = lhs
        .split_once(':')
        .ok_or_else(|| format!("invalid SENSOR:TYPE=VALUE: no `:` found in `{s}`"))?;
    if sensor.is_empty() {
        return Err(format!("invalid SENSOR:TYPE=VALUE: empty sensor in `{s}`"));
    }
    let kind: ReadingType = kind.parse().map_err(|e: FieldGuardError| e.to_string())?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid reading value `{value}`"))?;
    Ok(SensorReading::new(sensor, kind, value, default_unit(kind)))
}

pub(crate) fn default_unit(kind: ReadingType) -> &'static str {
    match kind {
        ReadingType::SoilMoisture | ReadingType::Humidity => "%",
        ReadingType::SoilEc => "mS/cm",
        ReadingType::Temperature => "°F",
        ReadingType::FlowRate => "gal/min",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        let r = parse_reading("soil-3:soil_moisture=41.5").unwrap();
        assert_eq!(r.sensor_id, "soil-3");
        assert_eq!(r.reading_type, ReadingType::SoilMoisture);
        assert_eq!(r.value, 41.5);
        assert_eq!(r.unit, "%");

        let r = parse_reading("t1:temp=33").unwrap();
        assert_eq!(r.reading_type, ReadingType::Temperature);
        assert_eq!(r.unit, "°F");
    }

    #[test]
    fn test_parse_reading_rejects_malformed() {
        assert!(parse_reading("soil_moisture=41").is_err());
        assert!(parse_reading("s1:soil_moisture").is_err());
        assert!(parse_reading(":soil_moisture=41").is_err());
        assert!(parse_reading("s1:pressure=41").is_err());
        assert!(parse_reading("s1:soil_moisture=wet").is_err());
    }
}
