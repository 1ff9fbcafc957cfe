// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::pipelines::{PipelineSettings, artifacts, preparation_commands, stage_percent};
use crate::app::poller::JobPoller;
use crate::app::ports::{ClockPort, RemoteSession, SessionFactoryPort, TelemetryEvent, TelemetryPort};
use crate::app::progress::{ProgressReporter, TransferDetail};
use crate::app::runner::RemoteCommandRunner;
use crate::app::services::random::generate_run_id;
use crate::app::services::report::parse_report;
use crate::app::services::script::{JobSpec, JobSpecBuilder, render};
use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::services::validation::{
    is_read_file, is_safe_remote_name, validate_credentials, validate_domains, validate_reads,
};
use crate::app::submitter::JobSubmitter;
use crate::app::types::{
    AggregationRequest, Artifact, ClassificationRequest, ExtractionRequest, JobHandle, JobState,
    PipelineKind, PipelineRun, PipelineStage, ReadMode, RemoteCredentials, TransferTask,
};

/// How the staging directory is populated before preparation.
enum Staging {
    /// Start from an empty staging directory and upload local reads.
    Fresh { reads: Vec<PathBuf>, spec: JobSpec },
    /// Reuse what an earlier classification run left behind.
    Reuse { spec: JobSpec },
    /// Reuse the staging directory and build the job around the reads found there.
    Discover,
}

struct RunPlan {
    kind: PipelineKind,
    credentials: RemoteCredentials,
    domains: Vec<String>,
    staging: Staging,
}

/// Drives a pipeline run through upload, preparation, submission, polling and
/// download. Each entry point owns one run; nothing is shared between runs.
pub struct PipelineOrchestrator {
    sessions: Arc<dyn SessionFactoryPort>,
    clock: Arc<dyn ClockPort>,
    telemetry: Arc<dyn TelemetryPort>,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionFactoryPort>,
        clock: Arc<dyn ClockPort>,
        telemetry: Arc<dyn TelemetryPort>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            sessions,
            clock,
            telemetry,
            settings,
        }
    }

    pub async fn classify(
        &self,
        request: ClassificationRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<PipelineRun> {
        let kind = PipelineKind::Classification;
        let checked = validate_credentials(&request.credentials)
            .and_then(|_| validate_domains(&request.domains))
            .and_then(|domains| {
                let names = validate_reads(request.read_mode, &request.reads)?;
                let spec = self.spec_builder(kind, &request.credentials).reads(names).build()?;
                Ok((domains, spec))
            });
        let (domains, spec) = reject_early(checked, progress)?;
        self.execute(
            RunPlan {
                kind,
                credentials: request.credentials,
                domains,
                staging: Staging::Fresh {
                    reads: request.reads,
                    spec,
                },
            },
            progress,
            cancel,
        )
        .await
    }

    pub async fn aggregate(
        &self,
        request: AggregationRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<PipelineRun> {
        let kind = PipelineKind::Aggregation;
        let checked = validate_credentials(&request.credentials)
            .and_then(|_| self.spec_builder(kind, &request.credentials).build());
        let spec = reject_early(checked, progress)?;
        self.execute(
            RunPlan {
                kind,
                credentials: request.credentials,
                domains: Vec::new(),
                staging: Staging::Reuse { spec },
            },
            progress,
            cancel,
        )
        .await
    }

    pub async fn extract(
        &self,
        request: ExtractionRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<PipelineRun> {
        reject_early(validate_credentials(&request.credentials), progress)?;
        self.execute(
            RunPlan {
                kind: PipelineKind::Extraction,
                credentials: request.credentials,
                domains: Vec::new(),
                staging: Staging::Discover,
            },
            progress,
            cancel,
        )
        .await
    }

    fn spec_builder(&self, kind: PipelineKind, credentials: &RemoteCredentials) -> JobSpecBuilder {
        JobSpecBuilder::new()
            .kind(kind)
            .resources(self.settings.resources.for_kind(kind).clone())
            .account(credentials.account.clone())
    }

    async fn execute(
        &self,
        plan: RunPlan,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<PipelineRun> {
        let mut run = PipelineRun::new(generate_run_id(), plan.kind);
        let span = tracing::info_span!(
            "pipeline",
            run_id = %run.id,
            pipeline = plan.kind.as_str(),
            host = %plan.credentials.host
        );
        async move {
            self.telemetry.event(
                "run_started",
                TelemetryEvent {
                    host: Some(plan.credentials.host.clone()),
                    ..self.fields(&run)
                },
            );
            self.enter(&mut run, progress, PipelineStage::Uploading);

            let result = match self.connect(&plan.credentials, cancel).await {
                Ok(session) => {
                    let result = self
                        .drive(&mut run, session.as_ref(), &plan, progress, cancel)
                        .await;
                    if matches!(&result, Err(err) if err.kind() == AppErrorKind::Cancelled) {
                        self.cancel_job(&run, session.as_ref()).await;
                    }
                    session.close().await;
                    result
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => {
                    self.enter(&mut run, progress, PipelineStage::Done);
                    self.telemetry.event("run_finished", self.fields(&run));
                    Ok(run)
                }
                Err(err) => {
                    let err = match run.active_job() {
                        Some(job) if err.context().is_none() => {
                            err.with_context(format!("job {}", job.job_id()))
                        }
                        _ => err,
                    };
                    run.fail();
                    progress.fail(&err);
                    self.telemetry.event(
                        "run_failed",
                        TelemetryEvent {
                            error_kind: Some(err.kind().as_str()),
                            ..self.fields(&run)
                        },
                    );
                    tracing::error!(kind = err.kind().as_str(), "run failed: {err}");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        session: &dyn RemoteSession,
        plan: &RunPlan,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let settings = &self.settings;
        let quick = RemoteCommandRunner::new(session, settings.command_timeout, cancel);
        let scratch = self.resolve_scratch(&quick).await?;
        let work_dir = remote_join(&scratch, &settings.staging_dir);

        let spec = match &plan.staging {
            Staging::Fresh { reads, spec } => {
                quick
                    .run_checked(&[
                        format!("rm -rf {}", sh_escape(&work_dir)),
                        format!("mkdir -p {}", sh_escape(&work_dir)),
                    ])
                    .await?;
                for path in reads {
                    let name = file_name(path)?;
                    let task = TransferTask::upload(path.clone(), remote_join(&work_dir, &name));
                    self.transfer(session, task, progress, cancel).await?;
                }
                spec.clone()
            }
            Staging::Reuse { spec } => spec.clone(),
            Staging::Discover => {
                let names = self.discover_reads(session, &work_dir).await?;
                self.spec_builder(run.kind, &plan.credentials)
                    .reads(names)
                    .build()?
            }
        };
        let local_script = self.write_script(&run.id, &spec).await?;
        let remote_script = remote_join(&work_dir, spec.script_name());
        let task = TransferTask::upload(local_script, remote_script.clone());
        self.transfer(session, task, progress, cancel).await?;

        self.enter(run, progress, PipelineStage::PreparingRemote);
        let mut commands = vec![format!("cd {}", sh_escape(&work_dir))];
        commands.extend(preparation_commands(run.kind, &scratch, &plan.domains));
        RemoteCommandRunner::new(session, settings.prepare_timeout, cancel)
            .run_checked(&commands)
            .await?;

        self.enter(run, progress, PipelineStage::Submitting);
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        let submitted =
            JobSubmitter::new(session, self.clock.as_ref(), settings.command_timeout, cancel)
                .submit(&work_dir, &remote_script)
                .await;
        let handle = match submitted {
            Ok(handle) => handle,
            Err(err) => {
                if err.kind() == AppErrorKind::Cancelled {
                    tracing::warn!(
                        script = %remote_script,
                        "cancelled while sbatch was in flight; a job may have been created but could not be cancelled"
                    );
                }
                return Err(err);
            }
        };
        progress.job_state(handle.job_id(), handle.last_known_state());
        self.telemetry.event(
            "job_submitted",
            TelemetryEvent {
                job_id: Some(handle.job_id().to_string()),
                ..self.fields(run)
            },
        );
        run.attach_job(handle);

        self.enter(run, progress, PipelineStage::Polling);
        let poller = JobPoller::new(session, settings.poll, cancel);
        let telemetry = self.telemetry.as_ref();
        let run_id = run.id.clone();
        let pipeline = run.kind.as_str();
        let handle = run.active_job_mut().ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::SubmissionParse,
                codes::SUBMISSION_PARSE,
                "no job attached to the run",
            )
        })?;
        let final_state = poller
            .poll(handle, &mut |h: &JobHandle| {
                progress.job_state(h.job_id(), h.last_known_state());
                telemetry.event(
                    "job_state",
                    TelemetryEvent {
                        run_id: Some(run_id.clone()),
                        pipeline: Some(pipeline),
                        job_id: Some(h.job_id().to_string()),
                        job_state: Some(h.last_known_state().as_str()),
                        ..TelemetryEvent::default()
                    },
                );
            })
            .await?;
        if final_state != JobState::Completed {
            return Err(AppError::with_message(
                AppErrorKind::JobFailed,
                codes::JOB_FAILED,
                format!("job ended in state {final_state}"),
            ));
        }

        self.enter(run, progress, PipelineStage::Downloading);
        for artifact in artifacts(run.kind) {
            let remote_path = remote_join(&work_dir, &artifact.remote_relative);
            let local_path = settings.download_dir.join(&artifact.local_name);
            let task = TransferTask::download(local_path.clone(), remote_path.clone());
            self.transfer(session, task, progress, cancel).await?;
            run.push_artifact(Artifact {
                name: artifact.local_name,
                remote_path,
                local_path,
            });
        }
        if run.kind == PipelineKind::Classification {
            for artifact in run.artifacts() {
                let records = parse_report(&artifact.local_path)?;
                tracing::info!(rows = records.len(), "classification report parsed");
            }
        }
        Ok(())
    }

    async fn connect(
        &self,
        credentials: &RemoteCredentials,
        cancel: &CancellationToken,
    ) -> AppResult<Box<dyn RemoteSession>> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut delay = self.settings.connect_backoff;
        let mut attempt = 1;
        loop {
            match self.sessions.open(credentials, cancel).await {
                Ok(session) => return Ok(session),
                Err(err) if err.kind() == AppErrorKind::Connection && attempt < attempts => {
                    tracing::warn!(attempt, attempts, "connect failed, retrying: {err}");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn resolve_scratch(&self, runner: &RemoteCommandRunner<'_>) -> AppResult<String> {
        let var = &self.settings.scratch_env_var;
        let out = runner.run_one(&format!("printf '%s' \"${{{var}}}\"")).await?;
        let scratch = out.stdout.trim().trim_end_matches('/');
        if !out.success() || !scratch.starts_with('/') {
            return Err(AppError::configuration(format!(
                "remote variable {var} does not name an absolute scratch directory"
            )));
        }
        Ok(scratch.to_string())
    }

    async fn discover_reads(
        &self,
        session: &dyn RemoteSession,
        work_dir: &str,
    ) -> AppResult<Vec<String>> {
        let entries = session.list_dir(work_dir).await.map_err(|err| {
            if err.kind() == AppErrorKind::NotFound {
                AppError::validation(format!(
                    "no staged classification run at {work_dir}; run classification first"
                ))
            } else {
                err
            }
        })?;
        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|name| is_read_file(name) && is_safe_remote_name(name))
            .collect();
        names.sort();
        if ReadMode::from_file_count(names.len()).is_none() {
            return Err(AppError::validation(format!(
                "expected one or two staged read files in {work_dir}, found {}",
                names.len()
            )));
        }
        Ok(names)
    }

    async fn write_script(&self, run_id: &str, spec: &JobSpec) -> AppResult<PathBuf> {
        let dir = &self.settings.scripts_dir;
        let path = dir.join(format!("{run_id}-{}", spec.script_name()));
        let local_error = |err: std::io::Error| {
            AppError::with_message(
                AppErrorKind::Io,
                codes::LOCAL_ERROR,
                format!("failed to write batch script {}: {err}", path.display()),
            )
        };
        tokio::fs::create_dir_all(dir).await.map_err(local_error)?;
        tokio::fs::write(&path, render(spec))
            .await
            .map_err(local_error)?;
        Ok(path)
    }

    async fn transfer(
        &self,
        session: &dyn RemoteSession,
        task: TransferTask,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> AppResult<TransferTask> {
        let path = task.remote_path.clone();
        let direction = task.direction;
        let report = |transferred: u64, total: u64| {
            progress.transfer(TransferDetail {
                path: path.clone(),
                direction,
                transferred,
                total,
            })
        };
        let done = session.transfer(task, &report, cancel).await?;
        tracing::info!(
            remote_path = %done.remote_path,
            bytes = done.total_bytes,
            "transfer finished"
        );
        Ok(done)
    }

    /// Best-effort scancel for a run that was cancelled with a job in flight.
    async fn cancel_job(&self, run: &PipelineRun, session: &dyn RemoteSession) {
        let Some(job) = run.active_job() else {
            return;
        };
        if job.last_known_state().is_terminal() {
            return;
        }
        let fresh = CancellationToken::new();
        let command = crate::app::services::slurm::scancel_command(job.job_id());
        match session
            .run_query(&command, self.settings.command_timeout, &fresh)
            .await
        {
            Ok(out) if out.success() => {
                tracing::info!(job_id = job.job_id(), "cancelled remote job");
            }
            Ok(out) => tracing::warn!(
                job_id = job.job_id(),
                exit_code = out.exit_code,
                "scancel failed: {}",
                out.stderr.trim()
            ),
            Err(err) => tracing::warn!(job_id = job.job_id(), "scancel failed: {err}"),
        }
    }

    fn enter(&self, run: &mut PipelineRun, progress: &ProgressReporter, stage: PipelineStage) {
        let percent = stage_percent(stage);
        run.enter(stage, percent);
        progress.stage(stage, percent);
        tracing::info!(stage = stage.label(), percent, "stage entered");
        self.telemetry.event(
            "stage_entered",
            TelemetryEvent {
                stage: Some(stage.label()),
                ..self.fields(run)
            },
        );
    }

    fn fields(&self, run: &PipelineRun) -> TelemetryEvent {
        TelemetryEvent {
            run_id: Some(run.id.clone()),
            pipeline: Some(run.kind.as_str()),
            job_id: run.active_job().map(|j| j.job_id().to_string()),
            ..TelemetryEvent::default()
        }
    }
}

/// Validation failures end the run before any network traffic.
fn reject_early<T>(checked: AppResult<T>, progress: &ProgressReporter) -> AppResult<T> {
    checked.inspect_err(|err| progress.fail(err))
}

fn file_name(path: &Path) -> AppResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation(format!("{} has no file name", path.display())))
}
