// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use russh_sftp::client::SftpSession;
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::adapters::ssh::{LocalFileError, OperationCancelled};
use crate::app::ports::TransferProgressFn;
use crate::app::types::TransferTask;

fn local_error(path: &Path) -> impl FnOnce(std::io::Error) -> LocalFileError {
    let path = path.to_path_buf();
    move |source| LocalFileError { path, source }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(OperationCancelled.into());
    }
    Ok(())
}

/// Streams a local file to the remote path in `chunk` sized writes,
/// replacing whatever is there.
pub(super) async fn upload(
    sftp: &SftpSession,
    task: &mut TransferTask,
    chunk: usize,
    on_progress: TransferProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let local_path = task.local_path.clone();
    let mut local = tokiofs::File::open(&local_path)
        .await
        .map_err(local_error(&local_path))?;
    let size = local
        .metadata()
        .await
        .map_err(local_error(&local_path))?
        .len();
    task.reset(size);
    on_progress(0, size);
    log::debug!(
        "uploading {} -> {} ({size} bytes)",
        local_path.display(),
        task.remote_path
    );

    let mut remote = sftp
        .create(&task.remote_path)
        .await
        .with_context(|| format!("creating remote file {}", task.remote_path))?;
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        check_cancel(cancel)?;
        let n = local
            .read(&mut buf)
            .await
            .map_err(local_error(&local_path))?;
        if n == 0 {
            break;
        }
        remote
            .write_all(&buf[..n])
            .await
            .with_context(|| format!("writing {}", task.remote_path))?;
        let done = task.advance(n as u64);
        on_progress(done, size);
    }
    remote.flush().await?;
    remote.shutdown().await?;
    Ok(())
}

/// Fetches the remote file into a `.part` sibling and renames it into place,
/// so an interrupted download never leaves a truncated artifact behind.
pub(super) async fn download(
    sftp: &SftpSession,
    task: &mut TransferTask,
    chunk: usize,
    on_progress: TransferProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let meta = sftp
        .metadata(&task.remote_path)
        .await
        .with_context(|| format!("stat {}", task.remote_path))?;
    let size = meta.size.unwrap_or(0);
    task.reset(size);
    on_progress(0, size);

    let local_path = task.local_path.clone();
    if let Some(parent) = local_path.parent() {
        tokiofs::create_dir_all(parent)
            .await
            .map_err(local_error(parent))?;
    }
    let partial = partial_path(&local_path);
    let mut remote = sftp
        .open(&task.remote_path)
        .await
        .with_context(|| format!("opening remote file {}", task.remote_path))?;
    let mut local = tokiofs::File::create(&partial)
        .await
        .map_err(local_error(&partial))?;

    let copied = async {
        let mut buf = vec![0u8; chunk.max(1)];
        loop {
            check_cancel(cancel)?;
            let n = remote
                .read(&mut buf)
                .await
                .with_context(|| format!("reading {}", task.remote_path))?;
            if n == 0 {
                break;
            }
            local
                .write_all(&buf[..n])
                .await
                .map_err(local_error(&partial))?;
            let done = task.advance(n as u64);
            on_progress(done, size.max(done));
        }
        local.flush().await.map_err(local_error(&partial))?;
        if !task.is_complete() {
            anyhow::bail!(
                "{} ended after {} of {size} bytes",
                task.remote_path,
                task.transferred_bytes()
            );
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(err) = copied {
        let _ = tokiofs::remove_file(&partial).await;
        return Err(err);
    }
    tokiofs::rename(&partial, &local_path)
        .await
        .map_err(local_error(&local_path))?;
    Ok(())
}

/// Names of the non-directory entries in `remote_dir`.
pub(super) async fn list_files(sftp: &SftpSession, remote_dir: &str) -> Result<Vec<String>> {
    let entries = sftp
        .read_dir(remote_dir)
        .await
        .with_context(|| format!("listing {remote_dir}"))?;
    let mut names: Vec<String> = entries
        .filter(|entry| !entry.metadata().is_dir())
        .map(|entry| entry.file_name())
        .filter(|name| name != "." && name != "..")
        .collect();
    names.sort();
    Ok(names)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
