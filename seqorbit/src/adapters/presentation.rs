// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::Write;

use tokio::sync::watch;

use crate::app::progress::ProgressObservation;
use crate::app::services::report::ReportSummary;
use crate::app::types::PipelineRun;

/// Prints every observation the reporter publishes until the run finishes
/// or the reporter is dropped.
pub async fn print_progress(mut rx: watch::Receiver<ProgressObservation>, json: bool) {
    while rx.changed().await.is_ok() {
        let obs = rx.borrow_and_update().clone();
        let line = if json {
            match serde_json::to_string(&obs) {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!("failed to encode progress: {err}");
                    continue;
                }
            }
        } else {
            format_observation(&obs)
        };
        {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        if obs.is_final() {
            break;
        }
    }
}

pub(crate) fn format_observation(obs: &ProgressObservation) -> String {
    let mut line = format!("[{:>3}%] {}", obs.value, obs.state);
    if let (Some(job_id), Some(state)) = (&obs.job_id, obs.job_state) {
        line.push_str(&format!(" (job {job_id}: {})", state.as_str()));
    }
    if let Some(transfer) = &obs.transfer {
        line.push_str(&format!(
            " {} {}/{}",
            transfer.path,
            human_bytes(transfer.transferred),
            human_bytes(transfer.total)
        ));
    }
    if let Some(error) = &obs.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

pub(crate) fn format_run(run: &PipelineRun) -> String {
    let mut out = format!("{} run {} finished", run.kind, run.id);
    for artifact in run.artifacts() {
        out.push_str(&format!("\n  {}", artifact.local_path.display()));
    }
    out
}

pub(crate) fn format_summary(summary: &ReportSummary) -> String {
    let mut out = format!("organisms: {}", summary.organisms);
    if let (Some(metric), Some(percent)) = (&summary.max_abundance, summary.max_abundance_percent) {
        out.push_str(&format!(
            "\nmax abundance: {} ({:.4}, {percent:.2}%)",
            metric.name, metric.value
        ));
    }
    let counts = [
        ("max reads", &summary.max_num_reads),
        ("max unique reads", &summary.max_num_unique_reads),
        ("max genome size", &summary.max_genome_size),
    ];
    for (label, metric) in counts {
        if let Some(metric) = metric {
            out.push_str(&format!("\n{label}: {} ({})", metric.name, metric.value));
        }
    }
    out
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
