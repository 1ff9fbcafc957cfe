// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;
use tokio_util::sync::CancellationToken;

use super::SshSession;
use crate::adapters::ssh::{OperationCancelled, QueryTimedOut};
use crate::app::ports::CommandOutput;

/// Folds one exec channel message into the captured output.
/// Returns true once the channel is done.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut Option<i32>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::ExitSignal { .. } => {
            if code.is_none() {
                *code = Some(-1);
            }
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

fn into_output(out: Vec<u8>, err: Vec<u8>, code: Option<i32>) -> Result<CommandOutput> {
    let exit_code = code.ok_or_else(|| anyhow!("exec channel closed without an exit status"))?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
        exit_code,
    })
}

impl SshSession {
    /// Runs `cmd` on a channel of its own. The shared shell is never touched,
    /// so a slow or interrupted query leaves later commands unaffected.
    pub(crate) async fn exec_capture(
        &self,
        cmd: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let mut chan = {
            let guard = self.handle.lock().await;
            let handle = guard.as_ref().ok_or_else(|| anyhow!("SSH handle lost"))?;
            handle.channel_open_session().await?
        };
        log::debug!("executing '{cmd}'");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;
        let collect = async {
            while let Some(msg) = chan.wait().await {
                if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                    break;
                }
            }
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::Error::new(OperationCancelled)),
            res = tokio::time::timeout(timeout, collect) => res.map_err(|_| {
                anyhow::Error::new(QueryTimedOut {
                    timeout_secs: timeout.as_secs(),
                })
            }),
        };
        let _ = chan.close().await;
        outcome?;
        into_output(out, err, code)
    }
}
