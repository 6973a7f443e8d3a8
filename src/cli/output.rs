//! CLI output formatting

use crate::{
    core::{RunStatus, StageStatus},
    execution::{ExecutionEvent, RunOutcome},
    persistence::ExecutionSummary,
};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Aborted => style("ABORTED").yellow().to_string(),
    }
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::Pending => style("pending").dim().to_string(),
        StageStatus::Running => style("running").yellow().to_string(),
        StageStatus::Succeeded => style("ok").green().to_string(),
        StageStatus::Failed => style("failed").red().to_string(),
        StageStatus::Aborted => style("aborted").yellow().to_string(),
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Aborted => STOP,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    let failed_at = summary
        .failed_stage
        .as_ref()
        .map(|stage| format!(" at {}", style(stage).red()))
        .unwrap_or_default();

    format!(
        "{} {} - {} - {}{} ({}/{} stages)",
        status_icon,
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        failed_at,
        summary.completed_stages,
        summary.total_stages,
    )
}

/// Format an execution event for display. Returns None for events that
/// are not worth a console line.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_stages,
        } => format!(
            "{} Starting pipeline {} ({}, {} stages)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim(),
            total_stages
        ),
        ExecutionEvent::StageStarted { stage, index } => format!(
            "\n{} Stage {}: {}",
            SPINNER,
            style(index + 1).dim(),
            style(stage).cyan().bold()
        ),
        ExecutionEvent::StageRetrying {
            stage,
            attempt,
            max_attempts,
        } => format!(
            "{} {} (attempt {}/{})",
            WARN,
            style(stage).yellow(),
            attempt,
            max_attempts
        ),
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepFinished {
            step,
            success: true,
            ..
        } => format!("  {} {}", CHECK, step),
        ExecutionEvent::StepFinished {
            step,
            best_effort: true,
            error,
            ..
        } => format!(
            "  {} {} {}",
            WARN,
            style(step).yellow(),
            style(error.as_deref().unwrap_or("failed")).dim()
        ),
        ExecutionEvent::StepFinished { step, error, .. } => format!(
            "  {} {}: {}",
            CROSS,
            style(step).red(),
            style(error.as_deref().unwrap_or("failed")).dim()
        ),
        ExecutionEvent::BranchSelected {
            branch, variant, ..
        } => format!(
            "  {} {} → {}",
            INFO,
            style(branch).dim(),
            style(variant.as_deref().unwrap_or("otherwise")).cyan()
        ),
        ExecutionEvent::StageFinished {
            stage,
            status,
            duration,
            ..
        } => format!(
            "{} {} {} ({})",
            match status {
                StageStatus::Succeeded => CHECK,
                StageStatus::Aborted => STOP,
                _ => CROSS,
            },
            style(stage).bold(),
            format_stage_status(*status),
            style(format_duration(*duration)).dim()
        ),
        ExecutionEvent::HooksDispatched {
            scope,
            count,
            failures,
        } => {
            if *failures > 0 {
                format!(
                    "{} {} post action(s) for {}, {} failed",
                    WARN,
                    count,
                    style(scope).dim(),
                    style(failures).red()
                )
            } else {
                format!("{} {} post action(s) for {}", INFO, count, style(scope).dim())
            }
        }
        ExecutionEvent::PipelineFinished { .. } => return None,
    };
    Some(line)
}

/// Final report for a run
pub fn format_outcome(outcome: &RunOutcome) -> String {
    let mut lines = Vec::new();

    let headline = match outcome.status {
        RunStatus::Succeeded => format!(
            "{} {} completed {}",
            CHECK,
            style(&outcome.pipeline).bold(),
            style("successfully").green()
        ),
        RunStatus::Aborted => format!(
            "{} {} {}",
            STOP,
            style(&outcome.pipeline).bold(),
            style("aborted").yellow()
        ),
        _ => format!(
            "{} {} {}",
            CROSS,
            style(&outcome.pipeline).bold(),
            style("failed").red()
        ),
    };
    lines.push(format!("{} in {}", headline, format_duration(outcome.duration)));

    if let Some(failure) = &outcome.error {
        lines.push(format!(
            "  Stage {} step {}: {}",
            style(outcome.failed_stage.as_deref().unwrap_or("-")).red(),
            style(&failure.step).red(),
            failure.error
        ));
    }

    for stage in &outcome.stages {
        for failure in &stage.best_effort_failures {
            lines.push(format!(
                "  {} {} / {} (best effort): {}",
                WARN,
                stage.stage,
                failure.step,
                style(&failure.error).dim()
            ));
        }
    }

    for (name, path) in &outcome.artifacts {
        lines.push(format!("  {} {}: {}", INFO, name, style(path.display()).dim()));
    }

    lines.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
