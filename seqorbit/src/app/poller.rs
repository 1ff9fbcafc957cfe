// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::RemoteSession;
use crate::app::services::slurm::{
    first_state_token, map_slurm_state, sacct_command, squeue_command,
};
use crate::app::types::{JobHandle, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Consecutive failed queries tolerated before giving up.
    pub max_failures: u32,
    pub max_wait: Duration,
    pub query_timeout: Duration,
}

/// Polls a submitted job until the scheduler reports a terminal state.
///
/// Completed, Failed and Cancelled all end the loop successfully; what they
/// mean for the run is the caller's decision. A failed query leaves the
/// handle's last known state untouched.
pub struct JobPoller<'a> {
    session: &'a dyn RemoteSession,
    policy: PollPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(
        session: &'a dyn RemoteSession,
        policy: PollPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session,
            policy,
            cancel,
        }
    }

    #[tracing::instrument(name = "poll", level = "debug", skip_all, fields(job_id = %handle.job_id()))]
    pub async fn poll(
        &self,
        handle: &mut JobHandle,
        on_observe: &mut (dyn FnMut(&JobHandle) + Send),
    ) -> AppResult<JobState> {
        let started = Instant::now();
        let mut failures: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::cancelled());
            }
            match self.query(handle.job_id()).await {
                Ok(state) if state != JobState::Unknown => {
                    failures = 0;
                    handle.observe(state);
                    on_observe(handle);
                    tracing::debug!(state = %state, "job state observed");
                    if state.is_terminal() {
                        return Ok(state);
                    }
                }
                Err(err) if err.kind() == AppErrorKind::Cancelled => return Err(err),
                outcome => {
                    failures += 1;
                    match outcome {
                        Err(err) => tracing::warn!(failures, "job state query failed: {err}"),
                        _ => tracing::warn!(failures, "job state query returned no usable state"),
                    }
                    if failures > self.policy.max_failures {
                        return Err(AppError::with_message(
                            AppErrorKind::PollingExhausted,
                            codes::POLLING_EXHAUSTED,
                            format!(
                                "job {} state could not be queried {failures} times in a row",
                                handle.job_id()
                            ),
                        ));
                    }
                }
            }

            if started.elapsed() >= self.policy.max_wait {
                return Err(AppError::with_message(
                    AppErrorKind::PollingExhausted,
                    codes::POLLING_EXHAUSTED,
                    format!(
                        "job {} did not finish within {}s (last state {})",
                        handle.job_id(),
                        self.policy.max_wait.as_secs(),
                        handle.last_known_state()
                    ),
                ));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AppError::cancelled()),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }

    /// One state query. squeue first; a job that has left the queue is looked
    /// up in accounting, and counts as Completed if accounting has nothing.
    async fn query(&self, job_id: &str) -> AppResult<JobState> {
        let timeout = self.policy.query_timeout;
        let out = self
            .session
            .run_query(&squeue_command(job_id), timeout, self.cancel)
            .await?;
        let left_queue = if out.success() {
            match first_state_token(&out.stdout) {
                Some(token) => return Ok(map_slurm_state(token)),
                None => true,
            }
        } else {
            out.stderr.contains("Invalid job id")
        };
        if !left_queue {
            return Ok(JobState::Unknown);
        }

        let acct = self
            .session
            .run_query(&sacct_command(job_id), timeout, self.cancel)
            .await?;
        if acct.success() {
            if let Some(token) = first_state_token(&acct.stdout) {
                return Ok(map_slurm_state(token));
            }
        }
        Ok(JobState::Completed)
    }
}
