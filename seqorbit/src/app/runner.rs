// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{CommandOutput, RemoteSession};

const STDERR_EXCERPT: usize = 400;

/// Issues shell commands one at a time on the session's shared shell.
/// Order matters: later commands depend on directories, modules and
/// exports set up by earlier ones.
pub struct RemoteCommandRunner<'a> {
    session: &'a dyn RemoteSession,
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> RemoteCommandRunner<'a> {
    pub fn new(
        session: &'a dyn RemoteSession,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session,
            timeout,
            cancel,
        }
    }

    pub async fn run_one(&self, command: &str) -> AppResult<CommandOutput> {
        tracing::debug!(command, "running remote command");
        self.session
            .run_command(command, self.timeout, self.cancel)
            .await
    }

    /// Runs `commands` in order and returns one output per command.
    /// A transport failure stops the sequence.
    pub async fn run(&self, commands: &[String]) -> AppResult<Vec<CommandOutput>> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(self.run_one(command).await?);
        }
        Ok(outputs)
    }

    /// Like `run`, but a non-zero exit status also stops the sequence.
    pub async fn run_checked(&self, commands: &[String]) -> AppResult<Vec<CommandOutput>> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            let output = self.run_one(command).await?;
            if !output.success() {
                return Err(command_failed(command, &output));
            }
            outputs.push(output);
        }
        Ok(outputs)
    }
}

fn command_failed(command: &str, output: &CommandOutput) -> AppError {
    let stderr = output.stderr.trim();
    let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
    AppError::with_message(
        AppErrorKind::RemoteCommand,
        codes::REMOTE_ERROR,
        format!(
            "remote command exited with status {}: {command}",
            output.exit_code
        ),
    )
    .with_context(excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::ScriptedSession;

    #[tokio::test]
    async fn runs_commands_in_order() {
        let session = ScriptedSession::new();
        session.respond("pwd", ScriptedSession::ok("/scratch/u/dec\n"));
        let cancel = CancellationToken::new();
        let runner = RemoteCommandRunner::new(&session, Duration::from_secs(5), &cancel);
        let commands = vec!["cd /scratch/u/dec".to_string(), "pwd".to_string()];
        let outputs = runner.run(&commands).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].stdout, "/scratch/u/dec\n");
        assert_eq!(session.commands(), commands);
    }

    #[tokio::test]
    async fn checked_run_stops_at_first_failure() {
        let session = ScriptedSession::new();
        session.respond(
            "module load",
            ScriptedSession::failed(1, "module: command not found"),
        );
        let cancel = CancellationToken::new();
        let runner = RemoteCommandRunner::new(&session, Duration::from_secs(5), &cancel);
        let commands = vec![
            "module load profile/bioinf".to_string(),
            "mkdir -p reports".to_string(),
        ];
        let err = runner.run_checked(&commands).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::RemoteCommand);
        assert_eq!(err.context(), Some("module: command not found"));
        assert_eq!(session.commands(), vec!["module load profile/bioinf"]);
    }

    #[tokio::test]
    async fn unchecked_run_keeps_non_zero_outputs() {
        let session = ScriptedSession::new();
        session.respond("false", ScriptedSession::failed(1, ""));
        let cancel = CancellationToken::new();
        let runner = RemoteCommandRunner::new(&session, Duration::from_secs(5), &cancel);
        let outputs = runner
            .run(&["false".to_string(), "true".to_string()])
            .await
            .unwrap();
        assert_eq!(outputs[0].exit_code, 1);
        assert_eq!(outputs[1].exit_code, 0);
    }
}
