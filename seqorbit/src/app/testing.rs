// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory stand-ins for the remote session ports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, CommandOutput, RemoteSession, SessionFactoryPort, TransferProgressFn,
};
use crate::app::types::{RemoteCredentials, TransferDirection, TransferTask};

type Hook = Box<dyn Fn() + Send + Sync>;

/// Scripted remote session. Responses are matched by command prefix (longest
/// prefix wins); the last queued response for a prefix is reused. Commands
/// without a scripted response succeed with empty output. A shell command
/// that times out retires the shell like the real one does; queries run
/// outside it.
#[derive(Default)]
pub struct ScriptedSession {
    responses: Mutex<Vec<(String, VecDeque<AppResult<CommandOutput>>)>>,
    hooks: Mutex<Vec<(String, Hook)>>,
    commands: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    retired: Mutex<Option<AppError>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    remote_files: Mutex<HashMap<String, Vec<u8>>>,
    listings: Mutex<HashMap<String, Vec<String>>>,
    progress: Mutex<Vec<(String, u64, u64)>>,
    closed: AtomicBool,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(stdout: &str) -> AppResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    pub fn failed(exit_code: i32, stderr: &str) -> AppResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        })
    }

    pub fn timeout() -> AppResult<CommandOutput> {
        Err(AppError::with_message(
            AppErrorKind::ProtocolTimeout,
            codes::PROTOCOL_TIMEOUT,
            "sentinel not observed",
        ))
    }

    pub fn respond(&self, prefix: &str, response: AppResult<CommandOutput>) {
        let mut responses = self.responses.lock().unwrap();
        match responses.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(response),
            None => responses.push((prefix.to_string(), VecDeque::from([response]))),
        }
    }

    pub fn on_command(&self, prefix: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap()
            .push((prefix.to_string(), Box::new(hook)));
    }

    pub fn put_remote_file(&self, remote_path: &str, contents: &[u8]) {
        self.remote_files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), contents.to_vec());
    }

    pub fn set_listing(&self, remote_dir: &str, names: &[&str]) {
        self.listings.lock().unwrap().insert(
            remote_dir.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Commands that went through `run_query`.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn progress_calls(&self) -> Vec<(String, u64, u64)> {
        self.progress.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_response(&self, command: &str) -> AppResult<CommandOutput> {
        let mut responses = self.responses.lock().unwrap();
        let best = responses
            .iter_mut()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        match best {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some((_, queue)) => queue.front().cloned().unwrap(),
            None => Self::ok(""),
        }
    }

    fn dispatch(&self, command: &str) -> AppResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        for (prefix, hook) in self.hooks.lock().unwrap().iter() {
            if command.starts_with(prefix.as_str()) {
                hook();
            }
        }
        self.next_response(command)
    }

    fn report(&self, on_progress: TransferProgressFn<'_>, path: &str, done: u64, total: u64) {
        self.progress
            .lock()
            .unwrap()
            .push((path.to_string(), done, total));
        on_progress(done, total);
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn run_command(
        &self,
        command: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        if let Some(err) = self.retired.lock().unwrap().clone() {
            return Err(err);
        }
        let response = self.dispatch(command);
        if let Err(err) = &response {
            if err.kind() == AppErrorKind::ProtocolTimeout {
                *self.retired.lock().unwrap() = Some(err.clone());
            }
        }
        response
    }

    async fn run_query(
        &self,
        command: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        self.queries.lock().unwrap().push(command.to_string());
        self.dispatch(command)
    }

    async fn transfer(
        &self,
        mut task: TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<TransferTask> {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        match task.direction {
            TransferDirection::Upload => {
                let bytes = tokio::fs::read(&task.local_path).await.map_err(|err| {
                    AppError::with_message(AppErrorKind::Io, codes::LOCAL_ERROR, err.to_string())
                })?;
                task.reset(bytes.len() as u64);
                let half = task.advance(bytes.len() as u64 / 2);
                self.report(on_progress, &task.remote_path, half, task.total_bytes);
                let done = task.advance(bytes.len() as u64);
                self.report(on_progress, &task.remote_path, done, task.total_bytes);
                self.uploads
                    .lock()
                    .unwrap()
                    .push((task.remote_path.clone(), bytes));
            }
            TransferDirection::Download => {
                let bytes = self
                    .remote_files
                    .lock()
                    .unwrap()
                    .get(&task.remote_path)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::with_message(
                            AppErrorKind::NotFound,
                            codes::NOT_FOUND,
                            format!("remote path not found: {}", task.remote_path),
                        )
                    })?;
                task.reset(bytes.len() as u64);
                if let Some(parent) = task.local_path.parent() {
                    tokio::fs::create_dir_all(parent).await.unwrap();
                }
                tokio::fs::write(&task.local_path, &bytes).await.unwrap();
                let done = task.advance(bytes.len() as u64);
                self.report(on_progress, &task.remote_path, done, task.total_bytes);
            }
        }
        Ok(task)
    }

    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>> {
        self.listings
            .lock()
            .unwrap()
            .get(remote_dir)
            .cloned()
            .ok_or_else(|| {
                AppError::with_message(
                    AppErrorKind::NotFound,
                    codes::NOT_FOUND,
                    format!("remote directory not found: {remote_dir}"),
                )
            })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct SharedSession(Arc<ScriptedSession>);

#[async_trait]
impl RemoteSession for SharedSession {
    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        self.0.run_command(command, timeout, cancel).await
    }

    async fn run_query(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<CommandOutput> {
        self.0.run_query(command, timeout, cancel).await
    }

    async fn transfer(
        &self,
        task: TransferTask,
        on_progress: TransferProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<TransferTask> {
        self.0.transfer(task, on_progress, cancel).await
    }

    async fn list_dir(&self, remote_dir: &str) -> AppResult<Vec<String>> {
        self.0.list_dir(remote_dir).await
    }

    async fn close(&self) {
        self.0.close().await
    }
}

/// Hands out the same scripted session; queued errors are returned first.
pub struct ScriptedFactory {
    pub session: Arc<ScriptedSession>,
    open_errors: Mutex<VecDeque<AppError>>,
    opens: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(session: Arc<ScriptedSession>) -> Self {
        Self {
            session,
            open_errors: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_open(&self, err: AppError) {
        self.open_errors.lock().unwrap().push_back(err);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactoryPort for ScriptedFactory {
    async fn open(
        &self,
        _credentials: &RemoteCredentials,
        _cancel: &CancellationToken,
    ) -> AppResult<Box<dyn RemoteSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.open_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Box::new(SharedSession(self.session.clone())))
    }
}

/// Factory that must never be reached.
pub struct UnreachableFactory;

#[async_trait]
impl SessionFactoryPort for UnreachableFactory {
    async fn open(
        &self,
        _credentials: &RemoteCredentials,
        _cancel: &CancellationToken,
    ) -> AppResult<Box<dyn RemoteSession>> {
        panic!("open should not be called when the request is invalid");
    }
}

pub struct FixedClock;

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }
}
