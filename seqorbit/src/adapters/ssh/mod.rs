// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{CommandOutput, RemoteSession, SessionFactoryPort, TransferProgressFn};
use crate::app::services::random::generate_marker_token;
use crate::app::types::{RemoteCredentials, TransferDirection, TransferTask};

mod error;
mod session;

pub use error::{
    AuthenticationFailure, LocalFileError, OperationCancelled, QueryTimedOut, ShellPoisoned,
};
pub use session::{SshParams, SshSession};

/// Transport settings shared by every session the factory opens.
#[derive(Clone, Debug)]
pub struct SshSettings {
    pub port: u16,
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub keepalive: Duration,
    pub transfer_chunk_bytes: usize,
}

/// Opens authenticated sessions against the cluster login node.
#[derive(Clone)]
pub struct SshSessionFactory {
    settings: SshSettings,
}

impl SshSessionFactory {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    async fn resolve(&self, host: &str) -> AppResult<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((host, self.settings.port))
            .await
            .map_err(|err| {
                AppError::with_message(
                    AppErrorKind::Connection,
                    codes::CONNECTION_FAILURE,
                    format!("cannot resolve {host}: {err}"),
                )
            })?;
        addrs.next().ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::Connection,
                codes::CONNECTION_FAILURE,
                format!("{host} resolved to no addresses"),
            )
        })
    }
}

#[async_trait]
impl SessionFactoryPort for SshSessionFactory {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, credentials, cancel),
        fields(op = "open", host = %credentials.host, user = %credentials.username)
    )]
    async fn open(
        &self,
        credentials: &RemoteCredentials,
        cancel: &CancellationToken,
    ) -> AppResult<Box<dyn RemoteSession>> {
        let addr = self.resolve(&credentials.host).await?;
        let params = SshParams {
            host: credentials.host.clone(),
            addr,
            username: credentials.username.clone(),
            secret: credentials.secret.clone(),
            known_hosts: self.settings.known_hosts.clone(),
            keepalive: self.settings.keepalive,
            transfer_chunk_bytes: self.settings.transfer_chunk_bytes,
        };
        let marker = format!("SEQORBIT_{}", generate_marker_token());
        let timeout = self.settings.connect_timeout;
        let session = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::cancelled()),
            res = tokio::time::timeout(timeout, SshSession::connect(params, marker)) => match res {
                Ok(res) => res.map_err(map_connect_error)?,
                Err(_) => {
                    return Err(AppError::with_message(
                        AppErrorKind::Connection,
                        codes::CONNECTION_FAILURE,
                        format!(
                            "timed out connecting to {} after {}s",
                            credentials.host,
                            timeout.as_secs()
                        ),
                    ));
                }
            },
        };
        Ok(Box::new(session))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command, cancel),
        fields(op = "run_command", timeout_secs = timeout.as_secs())
    )]
    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        let output = self
            .run_shell(command, timeout, cancel)
            .await
            .map_err(map_command_error)?;
        tracing::debug!(exit_code = output.exit_code, "remote command finished");
        Ok(output)
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command, cancel),
        fields(op = "run_query", timeout_secs = timeout.as_secs())
    )]
    async fn run_query(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        let output = self
            .exec_capture(command, timeout, cancel)
            .await
            .map_err(map_command_error)?;
        tracing::debug!(exit_code = output.exit_code, "remote query finished");
        Ok(output)
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, task, on_progress, cancel),
        fields(op = "transfer", direction = ?task.direction, path = %task.remote_path)
    )]
    async fn transfer(
        &self,
        mut task: TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<TransferTask> {
        let result = match task.direction {
            TransferDirection::Upload => self.upload(&mut task, on_progress, cancel).await,
            TransferDirection::Download => self.download(&mut task, on_progress, cancel).await,
        };
        result.map_err(|err| map_transfer_error(err, &task.remote_path))?;
        Ok(task)
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "list_dir"))]
    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>> {
        self.list_files(remote_dir)
            .await
            .map_err(|err| map_transfer_error(err, remote_dir))
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    let code = ssh_error_code(&err);
    let kind = if code == codes::AUTHENTICATION_FAILURE {
        AppErrorKind::Authentication
    } else {
        AppErrorKind::Connection
    };
    AppError::with_message(kind, code, format!("ssh connect failed: {err:#}"))
}

fn map_command_error(err: anyhow::Error) -> AppError {
    if is_cancelled(&err) {
        return AppError::cancelled();
    }
    if err
        .chain()
        .any(|cause| cause.is::<ShellPoisoned>() || cause.is::<QueryTimedOut>())
    {
        return AppError::with_message(
            AppErrorKind::ProtocolTimeout,
            codes::PROTOCOL_TIMEOUT,
            format!("remote command failed: {err}"),
        );
    }
    AppError::with_message(
        AppErrorKind::Connection,
        codes::REMOTE_ERROR,
        format!("remote command failed: {err:#}"),
    )
}

fn map_transfer_error(err: anyhow::Error, remote_path: &str) -> AppError {
    if is_cancelled(&err) {
        return AppError::cancelled();
    }
    if is_sftp_missing_path(&err) {
        return AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!("remote path missing: {remote_path}"),
        );
    }
    if err.chain().any(|cause| cause.is::<LocalFileError>()) {
        return AppError::with_message(AppErrorKind::Io, codes::LOCAL_ERROR, format!("{err:#}"));
    }
    AppError::with_message(
        AppErrorKind::Io,
        codes::TRANSFER_ERROR,
        format!("transfer of {remote_path} failed: {err:#}"),
    )
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<OperationCancelled>())
}

fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_sftp::protocol::{Status, StatusCode};

    fn sftp_status(code: StatusCode) -> anyhow::Error {
        anyhow::Error::new(russh_sftp::client::error::Error::Status(Status {
            id: 7,
            status_code: code,
            error_message: "no such file".to_string(),
            language_tag: "en".to_string(),
        }))
    }

    #[test]
    fn authentication_marker_anywhere_in_chain_selects_authentication() {
        let err = anyhow::Error::new(AuthenticationFailure).context("ssh handshake");
        let mapped = map_connect_error(err);
        assert_eq!(mapped.kind(), AppErrorKind::Authentication);
        assert_eq!(mapped.code(), codes::AUTHENTICATION_FAILURE);

        let mapped = map_connect_error(anyhow::anyhow!("connection refused"));
        assert_eq!(mapped.kind(), AppErrorKind::Connection);
    }

    #[test]
    fn missing_remote_file_maps_to_not_found() {
        let err = sftp_status(StatusCode::NoSuchFile).context("stat /s/dec/centrifuge_report.tsv");
        let mapped = map_transfer_error(err, "/s/dec/centrifuge_report.tsv");
        assert_eq!(mapped.kind(), AppErrorKind::NotFound);
        assert!(mapped.message().contains("/s/dec/centrifuge_report.tsv"));

        let mapped = map_transfer_error(sftp_status(StatusCode::PermissionDenied), "/s/x");
        assert_eq!(mapped.kind(), AppErrorKind::Io);
        assert_eq!(mapped.code(), codes::TRANSFER_ERROR);
    }

    #[test]
    fn local_file_errors_are_reported_as_local() {
        let err = anyhow::Error::new(LocalFileError {
            path: PathBuf::from("reads/a.fastq"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        let mapped = map_transfer_error(err, "/s/dec/a.fastq");
        assert_eq!(mapped.code(), codes::LOCAL_ERROR);
        assert!(mapped.message().contains("reads/a.fastq"));
    }

    #[test]
    fn poisoned_shell_is_a_protocol_timeout() {
        let mapped = map_command_error(ShellPoisoned { timeout_secs: 60 }.into());
        assert_eq!(mapped.kind(), AppErrorKind::ProtocolTimeout);

        let mapped = map_command_error(QueryTimedOut { timeout_secs: 10 }.into());
        assert_eq!(mapped.kind(), AppErrorKind::ProtocolTimeout);

        let mapped = map_command_error(OperationCancelled.into());
        assert_eq!(mapped.kind(), AppErrorKind::Cancelled);

        let mapped = map_command_error(anyhow::anyhow!("remote shell closed the channel"));
        assert_eq!(mapped.kind(), AppErrorKind::Connection);
    }
}
