// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::app::errors::AppResult;
use crate::app::types::{RemoteCredentials, TransferTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Called with `(transferred, total)` as a transfer advances.
pub type TransferProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

#[async_trait]
/// One authenticated session to the cluster login node.
/// Commands share a single ordered shell; transfers share a single file channel.
/// Implementations serialize both and release everything on `close` or drop.
pub trait RemoteSession: Send + Sync {
    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput>;

    /// Runs a self-contained command on a channel of its own, outside the
    /// shared shell. For idempotent scheduler queries that need no prepared
    /// environment; a timed-out or interrupted query leaves the shell usable.
    async fn run_query(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput>;

    /// Moves one file in `task.direction`. Progress is monotonic and ends with
    /// a call where transferred equals total.
    async fn transfer(
        &self,
        task: TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<TransferTask>;

    /// File names (not paths) directly under `remote_dir`.
    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>>;

    async fn close(&self);
}

#[async_trait]
/// Opens authenticated sessions.
pub trait SessionFactoryPort: Send + Sync {
    async fn open(
        &self,
        credentials: &RemoteCredentials,
        cancel: &CancellationToken,
    ) -> AppResult<Box<dyn RemoteSession>>;
}
