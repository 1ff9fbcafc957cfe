// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::{Channel, ChannelMsg, client::Msg};

use crate::app::ports::CommandOutput;

/// Wraps `command` so the shell brackets its output on both streams.
/// The marker is emitted in two halves so the command text itself never
/// contains it.
pub(super) fn wrap_command(command: &str, marker: &str) -> String {
    let (head, tail) = marker.split_at(marker.len() / 2);
    format!(
        "printf '%s%s:begin\\n' '{head}' '{tail}'\n\
         printf '%s%s:begin\\n' '{head}' '{tail}' >&2\n\
         {{ {command}\n}} </dev/null\n\
         printf '\\n%s%s %d\\n' '{head}' '{tail}' \"$?\"\n\
         printf '\\n%s%s\\n' '{head}' '{tail}' >&2\n"
    )
}

/// Output of one stream between its start and end sentinels.
struct Stream {
    begin_marker: Vec<u8>,
    buf: Vec<u8>,
    start: Option<usize>,
}

impl Stream {
    fn new(marker: &str) -> Self {
        Self {
            begin_marker: format!("{marker}:begin\n").into_bytes(),
            buf: Vec::new(),
            start: None,
        }
    }

    /// Appends `data` and returns the bytes after the start sentinel once it
    /// has been seen. Anything earlier is shell noise.
    fn push(&mut self, data: &[u8]) -> Option<&[u8]> {
        self.buf.extend_from_slice(data);
        if self.start.is_none() {
            self.start = find(&self.buf, &self.begin_marker).map(|i| i + self.begin_marker.len());
        }
        self.start.map(|start| &self.buf[start..])
    }

    fn body(&self, len: usize) -> &[u8] {
        let start = self.start.unwrap_or(0);
        &self.buf[start..start + len]
    }
}

/// Collects shell output until both end sentinels have been seen.
pub(super) struct SentinelScanner {
    stdout_marker: Vec<u8>,
    stderr_marker: Vec<u8>,
    stdout: Stream,
    stderr: Stream,
    /// Body length and exit code.
    exit: Option<(usize, i32)>,
    stderr_len: Option<usize>,
}

impl SentinelScanner {
    pub(super) fn new(marker: &str) -> Self {
        Self {
            stdout_marker: format!("\n{marker} ").into_bytes(),
            stderr_marker: format!("\n{marker}\n").into_bytes(),
            stdout: Stream::new(marker),
            stderr: Stream::new(marker),
            exit: None,
            stderr_len: None,
        }
    }

    pub(super) fn push_stdout(&mut self, data: &[u8]) {
        if self.exit.is_some() {
            return;
        }
        let Some(body) = self.stdout.push(data) else {
            return;
        };
        let Some(end) = find(body, &self.stdout_marker) else {
            return;
        };
        let rest = &body[end + self.stdout_marker.len()..];
        let Some(eol) = rest.iter().position(|b| *b == b'\n') else {
            return;
        };
        let code = std::str::from_utf8(&rest[..eol])
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .unwrap_or(-1);
        self.exit = Some((end, code));
    }

    pub(super) fn push_stderr(&mut self, data: &[u8]) {
        if self.stderr_len.is_some() {
            return;
        }
        if let Some(body) = self.stderr.push(data) {
            self.stderr_len = find(body, &self.stderr_marker);
        }
    }

    /// Output of the command once both streams are complete.
    pub(super) fn finish(&mut self) -> Option<CommandOutput> {
        let (stdout_len, exit_code) = self.exit?;
        let stderr_len = self.stderr_len?;
        Some(CommandOutput {
            stdout: String::from_utf8_lossy(self.stdout.body(stdout_len)).into_owned(),
            stderr: String::from_utf8_lossy(self.stderr.body(stderr_len)).into_owned(),
            exit_code,
        })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Writes one wrapped command to the shell and reads until its sentinels.
pub(super) async fn exchange(
    channel: &mut Channel<Msg>,
    command: &str,
    marker: &str,
) -> Result<CommandOutput> {
    let script = wrap_command(command, marker);
    channel
        .data(script.as_bytes())
        .await
        .context("writing to remote shell")?;
    let mut scanner = SentinelScanner::new(marker);
    loop {
        let Some(msg) = channel.wait().await else {
            return Err(anyhow!("remote shell channel closed"));
        };
        match msg {
            ChannelMsg::Data { data } => scanner.push_stdout(&data),
            ChannelMsg::ExtendedData { data, ext: 1 } => scanner.push_stderr(&data),
            ChannelMsg::ExitStatus { exit_status } => {
                return Err(anyhow!("remote shell exited with status {exit_status}"));
            }
            ChannelMsg::Eof | ChannelMsg::Close => {
                return Err(anyhow!("remote shell closed the channel"));
            }
            _ => {}
        }
        if let Some(output) = scanner.finish() {
            return Ok(output);
        }
    }
}
