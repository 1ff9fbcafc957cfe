// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, RemoteSession};
use crate::app::services::slurm::{parse_job_id, sbatch_command};
use crate::app::types::JobHandle;

/// Submits a staged batch script exactly once.
///
/// There is no retry here: a submit whose acknowledgement was lost may still
/// have created a job, and submitting again would create a second one.
pub struct JobSubmitter<'a> {
    session: &'a dyn RemoteSession,
    clock: &'a dyn ClockPort,
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(
        session: &'a dyn RemoteSession,
        clock: &'a dyn ClockPort,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session,
            clock,
            timeout,
            cancel,
        }
    }

    #[tracing::instrument(name = "submit", level = "debug", skip(self))]
    pub async fn submit(&self, work_dir: &str, script_remote_path: &str) -> AppResult<JobHandle> {
        let command = sbatch_command(work_dir, script_remote_path);
        let output = self
            .session
            .run_command(&command, self.timeout, self.cancel)
            .await?;
        let Some(job_id) = parse_job_id(&output.stdout) else {
            let stderr = output.stderr.trim();
            return Err(AppError::with_message(
                AppErrorKind::SubmissionParse,
                codes::SUBMISSION_PARSE,
                format!(
                    "sbatch did not acknowledge a job id (exit status {})",
                    output.exit_code
                ),
            )
            .with_context(if stderr.is_empty() {
                output.stdout.trim().to_string()
            } else {
                stderr.to_string()
            }));
        };
        tracing::info!(job_id = %job_id, script = script_remote_path, "job submitted");
        Ok(JobHandle::new(job_id, self.clock.now_utc()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{FixedClock, ScriptedSession};
    use crate::app::types::JobState;

    #[tokio::test]
    async fn parses_acknowledged_job_id() {
        let session = ScriptedSession::new();
        session.respond("sbatch", ScriptedSession::ok("Submitted batch job 12345\n"));
        let cancel = CancellationToken::new();
        let submitter = JobSubmitter::new(&session, &FixedClock, Duration::from_secs(5), &cancel);
        let handle = submitter
            .submit("/scratch/u/dec", "/scratch/u/dec/cen_script.sh")
            .await
            .unwrap();
        assert_eq!(handle.job_id(), "12345");
        assert_eq!(handle.last_known_state(), JobState::Pending);
        assert_eq!(
            session.commands(),
            vec!["sbatch --chdir '/scratch/u/dec' '/scratch/u/dec/cen_script.sh'"]
        );
    }

    #[tokio::test]
    async fn missing_token_is_a_parse_error_and_not_retried() {
        let session = ScriptedSession::new();
        session.respond(
            "sbatch",
            ScriptedSession::failed(1, "sbatch: error: invalid account"),
        );
        let cancel = CancellationToken::new();
        let submitter = JobSubmitter::new(&session, &FixedClock, Duration::from_secs(5), &cancel);
        let err = submitter
            .submit("/scratch/u/dec", "/scratch/u/dec/cen_script.sh")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::SubmissionParse);
        assert_eq!(err.context(), Some("sbatch: error: invalid account"));
        assert_eq!(session.count_commands("sbatch"), 1);
    }

    #[tokio::test]
    async fn timeout_is_reported_without_resubmitting() {
        let session = ScriptedSession::new();
        session.respond("sbatch", ScriptedSession::timeout());
        let cancel = CancellationToken::new();
        let submitter = JobSubmitter::new(&session, &FixedClock, Duration::from_secs(5), &cancel);
        let err = submitter.submit("/s", "/s/x.sh").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::ProtocolTimeout);
        assert_eq!(session.count_commands("sbatch"), 1);
    }
}
