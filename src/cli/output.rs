//! CLI output formatting

use crate::core::{RunState, RunStatus};
use crate::execution::RunEvent;
use console::Emoji;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One history line
pub fn format_run_summary(run: &RunState) -> String {
    let status_icon = match run.status {
        RunStatus::Completed => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    let mut line = format!(
        "{} {} - {} - {} - {}",
        status_icon,
        style(short_id(&run.run_id)).dim(),
        style(&run.pipeline_key).bold(),
        format_status(run.status),
        style(run.submitted_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if let Some(error) = &run.error {
        line.push_str(&format!(" - {}", style(error).red()));
    }
    line
}

/// Format a run event for display
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted { run_id, pipeline } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline).bold(),
            style(short_id(run_id)).dim()
        ),
        RunEvent::ParamsStarted { index, params, .. } => format!(
            "{} Parameter set #{} {}",
            INFO,
            index + 1,
            style(serde_json::Value::Object(params.clone())).dim()
        ),
        RunEvent::FlowStarted { flow_id, desc, .. } => {
            if desc.is_empty() {
                format!("{} {}", SPINNER, style(flow_id).cyan())
            } else {
                format!("{} {} ({})", SPINNER, style(flow_id).cyan(), style(desc).dim())
            }
        }
        RunEvent::BatchRead { batch_index, rows, .. } => {
            format!("  batch {} - {} rows", style(batch_index).cyan(), rows)
        }
        RunEvent::RowsWritten { writer, action, rows, .. } => format!(
            "  {} {} {} rows to {}",
            CHECK,
            style(action).dim(),
            rows,
            style(writer).green()
        ),
        RunEvent::WriterSkipped { writer, reason, .. } => {
            format!("  {} {} skipped ({})", INFO, style(writer).dim(), reason)
        }
        RunEvent::RecordsFailed { writer, rows, .. } => format!(
            "  {} {} rows failed in {}",
            WARN,
            style(rows).red(),
            style(writer).yellow()
        ),
        RunEvent::RunCompleted { run_id, pipeline } => format!(
            "{} {} ({}) completed {}",
            CHECK,
            style(pipeline).bold(),
            style(short_id(run_id)).dim(),
            style("successfully").green()
        ),
        RunEvent::RunFailed { run_id, pipeline, error } => format!(
            "{} {} ({}) {}: {}",
            CROSS,
            style(pipeline).bold(),
            style(short_id(run_id)).dim(),
            style("failed").red(),
            style(error).dim()
        ),
    }
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
