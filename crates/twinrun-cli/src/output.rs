//! Rendering of phase results in the selected output format.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;
use tabled::{Table, Tabled};

use twinrun_flow::compare::DiffReport;
use twinrun_flow::dispatch::DispatchSummary;
use twinrun_flow::drain::{format_hms, DrainOutcome, ReduceOutput};
use twinrun_flow::provision::{PipelineVariant, ProvisionedRun};
use twinrun_flow::runner::FullRunReport;
use twinrun_flow::teardown::TeardownSummary;

use crate::OutputFormat;

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn row(field: &str, value: impl ToString) -> Row {
    Row {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn to_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

/// Renders a completed deploy.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn provisioned(run: &ProvisionedRun, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(&json!(run)),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "{}", "Deployment complete!".green());
            let _ = writeln!(out);
            let _ = writeln!(out, "  Completion queue: {}", run.completion_queue.url);
            for pipeline in [&run.benchmark, &run.test] {
                let _ = writeln!(out, "  {}:", pipeline.variant);
                let _ = writeln!(out, "    Source:         {}", pipeline.source_ref);
                let _ = writeln!(out, "    Function:       {}", pipeline.compute_endpoint_id);
                let _ = writeln!(out, "    Input queue:    {}", pipeline.input_queue.url);
                let _ = writeln!(out, "    Artifact:       {}", pipeline.packaged_artifact_path.display());
            }
            Ok(out)
        }
        OutputFormat::Table => {
            let mut rows = vec![row("Completion queue", &run.completion_queue.url)];
            for pipeline in [&run.benchmark, &run.test] {
                rows.extend(pipeline_rows(pipeline));
            }
            Ok(format!("{}\n", Table::new(rows)))
        }
    }
}

fn pipeline_rows(pipeline: &PipelineVariant) -> [Row; 4] {
    let v = pipeline.variant;
    [
        row(&format!("{v} source"), &pipeline.source_ref),
        row(&format!("{v} function"), &pipeline.compute_endpoint_id),
        row(&format!("{v} input queue"), &pipeline.input_queue.url),
        row(&format!("{v} artifact"), pipeline.packaged_artifact_path.display()),
    ]
}

/// Renders a completed dispatch.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn dispatch(summary: &DispatchSummary, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(&json!(summary)),
        OutputFormat::Text => Ok(format!(
            "Pushed {} work items to {} queues ({} messages in {} batches per queue)\n",
            summary.items, summary.queues, summary.messages_sent, summary.batches_per_queue
        )),
        OutputFormat::Table => Ok(format!(
            "{}\n",
            Table::new([
                row("Work items", summary.items),
                row("Queues", summary.queues),
                row("Batches per queue", summary.batches_per_queue),
                row("Messages sent", summary.messages_sent),
            ])
        )),
    }
}

/// Renders a drain result with its comparison report and process time.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn reduce(output: &ReduceOutput, idle_threshold: Duration, format: &OutputFormat) -> Result<String> {
    let process_time = format_hms(output.elapsed);
    match format {
        OutputFormat::Json => to_json(&json!({
            "outcome": output.result.as_ref().ok(),
            "error": output.result.as_ref().err().map(ToString::to_string),
            "report": output.diff,
            "stats": output.stats,
            "process_time": process_time,
        })),
        OutputFormat::Text | OutputFormat::Table => {
            let mut out = String::new();
            match &output.result {
                Ok(DrainOutcome::Completed) => {}
                Ok(DrainOutcome::TimedOut { unresolved }) => {
                    let _ = writeln!(
                        out,
                        "{}",
                        format!(
                            "No new signals in {} seconds, terminating. {} work items unresolved.",
                            idle_threshold.as_secs(),
                            unresolved.len()
                        )
                        .yellow()
                    );
                }
                Err(e) => {
                    let _ = writeln!(out, "{} {e}", "Drain stopped:".red());
                }
            }
            if *format == OutputFormat::Table {
                out.push_str(&diff_table(&output.diff));
            } else {
                let _ = write!(out, "{}", output.diff);
            }
            let _ = writeln!(out, "Process time: {process_time}");
            Ok(out)
        }
    }
}

fn diff_table(report: &DiffReport) -> String {
    #[derive(Tabled)]
    struct FieldRow {
        #[tabled(rename = "Field")]
        name: String,
        #[tabled(rename = "Mean diff")]
        mean: String,
        #[tabled(rename = "Count")]
        count: usize,
    }

    let mut out = format!(
        "Total test cases: {}\nTotal test cases with differences: {}\n",
        report.cases_seen, report.cases_with_diff
    );
    if !report.fields.is_empty() {
        let rows = report.fields.iter().map(|f| FieldRow {
            name: f.name.clone(),
            mean: f.diff_mean.map_or_else(String::new, |m| format!("{m:.2}")),
            count: f.count,
        });
        let _ = writeln!(out, "{}", Table::new(rows));
    }
    out
}

/// Renders a completed teardown.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn teardown(summary: &TeardownSummary, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(&json!(summary)),
        OutputFormat::Text => Ok(format!(
            "{} {} deleted, {} already absent, {} skipped\n",
            "Cleanup complete:".green(),
            summary.deleted,
            summary.already_absent,
            summary.skipped
        )),
        OutputFormat::Table => Ok(format!(
            "{}\n",
            Table::new([
                row("Deleted", summary.deleted),
                row("Already absent", summary.already_absent),
                row("Skipped", summary.skipped),
            ])
        )),
    }
}

/// Renders every phase of a full run that produced a result.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn full_run(report: &FullRunReport, idle_threshold: Duration, format: &OutputFormat) -> Result<String> {
    if *format == OutputFormat::Json {
        let drain = match &report.reduce {
            Some(output) => Some(serde_json::from_str::<serde_json::Value>(&reduce(
                output,
                idle_threshold,
                format,
            )?)?),
            None => None,
        };
        return to_json(&json!({
            "deploy": report.provisioned,
            "trigger": report.dispatch,
            "reduce": drain,
            "cleanup": report.teardown,
            "error": report.error.as_ref().map(ToString::to_string),
        }));
    }

    let mut out = String::new();
    if let Some(run) = &report.provisioned {
        out.push_str(&provisioned(run, format)?);
    }
    if let Some(summary) = &report.dispatch {
        out.push_str(&dispatch(summary, format)?);
    }
    if let Some(output) = &report.reduce {
        out.push_str(&reduce(output, idle_threshold, format)?);
    }
    if let Some(summary) = &report.teardown {
        out.push_str(&teardown(summary, format)?);
    }
    Ok(out)
}
