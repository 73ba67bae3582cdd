//! Formatted output helpers for CLI commands.
//!
//! Provides colored status indicators for run reports and plans.

use std::time::Duration;

use cairn_common::types::{Outputs, RunMode};
use cairn_runtime::planner::{Change, Plan};
use cairn_runtime::report::{Outcome, RunReport};
use serde_json::Value;

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const CYAN: &str = "\x1b[36m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";
pub const RESET: &str = "\x1b[0m";

pub fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}cairn{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

/// Colored marker for an outcome.
#[must_use]
pub fn outcome_marker(outcome: &Outcome) -> String {
    let color = match outcome {
        Outcome::Created | Outcome::Replaced => GREEN,
        Outcome::Updated => CYAN,
        Outcome::Unchanged => DIM,
        Outcome::Removed | Outcome::Skipped { .. } => YELLOW,
        Outcome::Failed { .. } => RED,
    };
    format!("{color}\u{25cf}{RESET}")
}

pub fn print_report(report: &RunReport, elapsed: Duration) {
    let done = report.succeeded().len();
    let color = if report.has_failures() { YELLOW } else { GREEN };
    let verb = match report.mode {
        RunMode::Deploy => "Deployed",
        RunMode::Remove => "Removed",
    };
    eprintln!(
        "  {color}{BOLD}{verb} {done}{RESET} of {} instance(s) in {:.1}s {DIM}[run {}]{RESET}",
        report.nodes.len(),
        elapsed.as_secs_f64(),
        report.run_id
    );
    eprintln!();
    for node in &report.nodes {
        eprintln!(
            "    {} {BOLD}{}{RESET} {DIM}{}{RESET}",
            outcome_marker(&node.outcome),
            node.id,
            node.outcome
        );
        if !node.outcome.is_success() {
            continue;
        }
        if let Some(outputs) = report.outputs_of(&node.id) {
            for line in output_lines(outputs) {
                eprintln!("        {DIM}{line}{RESET}");
            }
        }
    }
}

/// One `key = value` line per output; strings print bare, everything else
/// as compact JSON.
#[must_use]
pub fn output_lines(outputs: &Outputs) -> Vec<String> {
    outputs
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key} = {text}"),
            other => format!("{key} = {other}"),
        })
        .collect()
}

/// Converts failed or skipped instances into a non-zero exit.
///
/// # Errors
///
/// Returns an error naming the failures when the report has any.
pub fn fail_on_errors(report: &RunReport) -> anyhow::Result<()> {
    if !report.has_failures() {
        return Ok(());
    }
    let failed = report.failed();
    let skipped = report.skipped().len();
    Err(anyhow::anyhow!(
        "{} instance(s) failed, {skipped} skipped: {}",
        failed.len(),
        failed
            .iter()
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

/// Symbol used in plans, `terraform`-style.
#[must_use]
pub const fn change_symbol(change: &Change) -> &'static str {
    match change {
        Change::Create => "+",
        Change::Update => "~",
        Change::Replace { .. } => "-/+",
        Change::Unchanged => " ",
    }
}

pub fn print_plan(plan: &Plan) {
    for step in &plan.steps {
        println!(
            "  {} {} ({}) {}",
            change_symbol(&step.change),
            step.id,
            step.component_type,
            step.change
        );
    }
    for orphan in &plan.orphans {
        println!("  - {orphan} (no longer declared)");
    }

    println!();
    let create = plan.count(|c| *c == Change::Create);
    let update = plan.count(|c| *c == Change::Update);
    let replace = plan.count(|c| matches!(c, Change::Replace { .. }));
    println!(
        "  {create} to create, {update} to update, {replace} to replace, {} to remove.",
        plan.orphans.len()
    );
    if !plan.has_changes() {
        println!("  No changes. State matches the manifest.");
    }
}

#[cfg(test)]
mod tests {
    use cairn_common::types::InstanceId;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn change_symbols() {
        assert_eq!(change_symbol(&Change::Create), "+");
        assert_eq!(
            change_symbol(&Change::Replace {
                previous_type: "Static".into()
            }),
            "-/+"
        );
    }

    #[test]
    fn outputs_print_in_declaration_order() {
        let outputs: Outputs = serde_json::json!({
            "url": "http://vpc-1.internal",
            "ports": [80, 443],
            "ready": true
        })
        .as_object()
        .cloned()
        .expect("object");
        assert_eq!(
            output_lines(&outputs),
            vec!["url = http://vpc-1.internal", "ports = [80,443]", "ready = true"]
        );
        assert!(output_lines(&Outputs::new()).is_empty());
    }

    #[test]
    fn clean_report_exits_zero() {
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Deploy);
        report.record(InstanceId::from_persisted("app"), Outcome::Created, Some(Outputs::new()));
        assert!(fail_on_errors(&report).is_ok());
    }

    #[test]
    fn failures_become_errors() {
        let mut report = RunReport::new(Uuid::new_v4(), RunMode::Deploy);
        report.record(
            InstanceId::from_persisted("app.db"),
            Outcome::Failed {
                error: "timeout".into(),
            },
            None,
        );
        report.record(
            InstanceId::from_persisted("app.api"),
            Outcome::Skipped {
                blocked_by: InstanceId::from_persisted("app.db"),
            },
            None,
        );
        let err = fail_on_errors(&report).unwrap_err();
        assert_eq!(err.to_string(), "1 instance(s) failed, 1 skipped: app.db");
    }
}
