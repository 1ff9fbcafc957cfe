// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use russh::client::{Config, Handle, Msg};
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh::{Channel, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapters::ssh::{OperationCancelled, ShellPoisoned};
use crate::app::ports::{CommandOutput, TransferProgressFn};
use crate::app::types::TransferTask;

mod auth;
mod exec;
mod sftp;
mod shell;


/// russh client handler; only the server key check is customised.
#[derive(Clone, Debug)]
pub(super) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts: Option<PathBuf>,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts.as_deref(),
        )
    }
}

/// Parameters for one cluster connection.
#[derive(Clone)]
pub struct SshParams {
    /// Hostname as given, used for known_hosts lookup.
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub secret: String,
    pub known_hosts: Option<PathBuf>,
    pub keepalive: Duration,
    pub transfer_chunk_bytes: usize,
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts keys already recorded for the host name or its address, learns
/// keys for hosts seen for the first time, and rejects changed keys.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host];
    if ip_host != host {
        candidates.push(&ip_host);
    }
    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                log::warn!("server key validation failed for {host}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    log::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Why the shell was retired.
enum Poison {
    Timeout(u64),
    Interrupted,
    Broken(String),
}

impl Poison {
    fn to_error(&self) -> anyhow::Error {
        match self {
            Poison::Timeout(timeout_secs) => ShellPoisoned {
                timeout_secs: *timeout_secs,
            }
            .into(),
            Poison::Interrupted => OperationCancelled.into(),
            Poison::Broken(reason) => anyhow!("remote shell unusable: {reason}"),
        }
    }
}

enum ShellSlot {
    Ready(Channel<Msg>),
    Poisoned(Poison),
    Closed,
}

/// One authenticated connection with a long-lived interactive shell and a
/// lazily opened SFTP channel.
pub struct SshSession {
    params: SshParams,
    handle: Mutex<Option<Handle<ClientHandler>>>,
    shell: Mutex<ShellSlot>,
    sftp: Mutex<Option<Arc<SftpSession>>>,
    /// Per-session completion marker for shell commands.
    marker: String,
    closed: AtomicBool,
}

impl SshSession {
    /// Connects, authenticates and opens the shell channel.
    pub async fn connect(params: SshParams, marker: String) -> Result<Self> {
        let config = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(params.keepalive),
            keepalive_max: 3,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        let handler = ClientHandler {
            host: params.host.clone(),
            addr: params.addr,
            known_hosts: params.known_hosts.clone(),
        };
        log::info!(
            "connecting to {}@{} ({})",
            params.username,
            params.host,
            params.addr
        );
        let mut handle = russh::client::connect(Arc::new(config), params.addr, handler)
            .await
            .context("SSH connect failed")?;
        auth::authenticate(&mut handle, &params).await?;

        let channel = handle
            .channel_open_session()
            .await
            .context("opening shell channel")?;
        channel
            .request_shell(true)
            .await
            .context("requesting remote shell")?;
        log::info!("remote shell ready on {}", params.host);

        Ok(Self {
            params,
            handle: Mutex::new(Some(handle)),
            shell: Mutex::new(ShellSlot::Ready(channel)),
            sftp: Mutex::new(None),
            marker,
            closed: AtomicBool::new(false),
        })
    }

    /// Runs one command on the shared shell. A command that does not finish
    /// cleanly leaves the shell mid-output, so the shell is retired and every
    /// later command fails with the same cause.
    pub(super) async fn run_shell(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let mut slot = self.shell.lock().await;
        let channel = match &mut *slot {
            ShellSlot::Ready(channel) => channel,
            ShellSlot::Poisoned(poison) => return Err(poison.to_error()),
            ShellSlot::Closed => return Err(anyhow!("session is closed")),
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Poison::Interrupted),
            res = tokio::time::timeout(timeout, shell::exchange(channel, command, &self.marker)) => {
                match res {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(err)) => Err(Poison::Broken(format!("{err:#}"))),
                    Err(_) => Err(Poison::Timeout(timeout.as_secs())),
                }
            }
        };
        match outcome {
            Ok(output) => Ok(output),
            Err(poison) => {
                let err = poison.to_error();
                log::warn!("retiring remote shell on {}: {err}", self.params.host);
                if let ShellSlot::Ready(channel) =
                    std::mem::replace(&mut *slot, ShellSlot::Poisoned(poison))
                {
                    let _ = channel.close().await;
                }
                Err(err)
            }
        }
    }

    async fn sftp(&self) -> Result<Arc<SftpSession>> {
        let mut slot = self.sftp.lock().await;
        if let Some(sftp) = slot.as_ref() {
            return Ok(sftp.clone());
        }
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost before opening SFTP"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = Arc::new(SftpSession::new(channel.into_stream()).await?);
        *slot = Some(sftp.clone());
        Ok(sftp)
    }

    pub(super) async fn upload(
        &self,
        task: &mut TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sftp = self.sftp().await?;
        sftp::upload(&sftp, task, self.params.transfer_chunk_bytes, on_progress, cancel).await
    }

    pub(super) async fn download(
        &self,
        task: &mut TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sftp = self.sftp().await?;
        sftp::download(&sftp, task, self.params.transfer_chunk_bytes, on_progress, cancel).await
    }

    pub(super) async fn list_files(&self, remote_dir: &str) -> Result<Vec<String>> {
        let sftp = self.sftp().await?;
        sftp::list_files(&sftp, remote_dir).await
    }

    /// Releases the channels and the connection. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let ShellSlot::Ready(channel) =
            std::mem::replace(&mut *self.shell.lock().await, ShellSlot::Closed)
        {
            let _ = channel.eof().await;
            let _ = channel.close().await;
        }
        if let Some(sftp) = self.sftp.lock().await.take() {
            let _ = sftp.close().await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                log::debug!("error while disconnecting from {}: {err}", self.params.host);
            }
        }
        log::info!("closed session to {}", self.params.host);
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            // Dropping the handle tears the connection down.
            log::debug!("session to {} dropped without close", self.params.host);
        }
    }
}
