// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use adapters::cli::{Cmd, Opts, RemoteArgs};
use app::errors::{AppError, AppErrorKind, AppResult, codes};
use app::orchestrator::PipelineOrchestrator;
use app::progress::ProgressReporter;
use app::services::report::{parse_report, summarize};
use app::services::validation::is_report_file;
use app::types::{
    AggregationRequest, ClassificationRequest, ExtractionRequest, PipelineRun, ReadMode,
    RemoteCredentials,
};

mod adapters;
mod app;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    for value in &report.values {
        tracing::info!(
            "config {}: {} (source={})",
            value.name,
            value.value,
            value.source.as_str()
        );
    }
}

/// Reads the login secret from `var`, or from one line of stdin when unset.
async fn read_secret(var: &str) -> AppResult<String> {
    if let Some(secret) = std::env::var_os(var) {
        return secret.into_string().map_err(|_| {
            AppError::validation(format!("{var} does not hold valid UTF-8"))
        });
    }
    tracing::debug!("{var} is unset; reading the secret from stdin");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|err| {
            AppError::with_message(
                AppErrorKind::Io,
                codes::LOCAL_ERROR,
                format!("failed to read the secret from stdin: {err}"),
            )
        })?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(AppError::validation(format!(
            "no secret provided: set {var} or pipe it on stdin"
        )));
    }
    Ok(secret)
}

async fn credentials(args: &RemoteArgs) -> AppResult<RemoteCredentials> {
    Ok(RemoteCredentials {
        host: args.host.clone(),
        username: args.username.clone(),
        secret: read_secret(&args.secret_env).await?,
        account: args.account.clone(),
    })
}

/// A remote pipeline invocation with its credentials resolved.
enum Job {
    Classify(ClassificationRequest),
    Aggregate(AggregationRequest),
    Extract(ExtractionRequest),
}

async fn run_job(
    orchestrator: &PipelineOrchestrator,
    job: Job,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> AppResult<PipelineRun> {
    match job {
        Job::Classify(request) => orchestrator.classify(request, progress, cancel).await,
        Job::Aggregate(request) => orchestrator.aggregate(request, progress, cancel).await,
        Job::Extract(request) => orchestrator.extract(request, progress, cancel).await,
    }
}

fn summarize_report(path: &Path, json: bool) -> AppResult<()> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if !is_report_file(name) {
        return Err(AppError::validation(format!(
            "{} is not a .tsv report",
            path.display()
        )));
    }
    let records = parse_report(path)?;
    let summary = summarize(&records);
    if json {
        let line = serde_json::to_string(&summary).map_err(|err| {
            AppError::with_message(AppErrorKind::Io, codes::LOCAL_ERROR, err.to_string())
        })?;
        println!("{line}");
    } else {
        println!("{}", adapters::presentation::format_summary(&summary));
    }
    Ok(())
}

async fn run(opts: Opts, verbose_override: Option<bool>) -> AppResult<()> {
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            download_dir: opts.download_dir,
            staging_dir: opts.staging_dir,
            verbose: verbose_override,
        },
    )
    .map_err(|err| AppError::configuration(format!("{err:#}")))?;
    logging::init(config.verbose);
    log_config_report(&report);

    let job = match opts.cmd {
        Cmd::Summarize(args) => return summarize_report(&args.report, opts.json_progress),
        Cmd::Classify(args) => {
            let read_mode = if args.paired {
                ReadMode::PairedEnd
            } else {
                ReadMode::SingleEnd
            };
            Job::Classify(ClassificationRequest {
                credentials: credentials(&args.remote).await?,
                read_mode,
                reads: args.reads,
                domains: args.domains,
            })
        }
        Cmd::Aggregate(args) => Job::Aggregate(AggregationRequest {
            credentials: credentials(&args).await?,
        }),
        Cmd::Extract(args) => Job::Extract(ExtractionRequest {
            credentials: credentials(&args).await?,
        }),
    };

    let sessions = Arc::new(adapters::ssh::SshSessionFactory::new(config.ssh_settings()));
    let clock = Arc::new(adapters::time::SystemClock::new());
    let telemetry = Arc::new(adapters::telemetry::TracingTelemetry::new());
    let orchestrator =
        PipelineOrchestrator::new(sessions, clock, telemetry, config.pipeline_settings());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling the run");
            on_interrupt.cancel();
        }
    });

    let progress = ProgressReporter::new();
    let printer = tokio::spawn(adapters::presentation::print_progress(
        progress.subscribe(),
        opts.json_progress,
    ));
    let result = run_job(&orchestrator, job, &progress, &cancel).await;
    drop(progress);
    let _ = printer.await;

    let run = result?;
    tracing::info!(run_id = %run.id, pipeline = %run.kind, "run finished");
    if !opts.json_progress {
        println!("{}", adapters::presentation::format_run(&run));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let parsed = adapters::cli::parse_opts();
    match run(parsed.opts, parsed.verbose_override).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind().as_str(), code = err.code(), "{err}");
            eprintln!("error: {err}");
            let code = err.disposition().exit_code();
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
