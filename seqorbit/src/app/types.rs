// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use time::OffsetDateTime;

use crate::app::errors::AppError;

/// Login material for one run. Lives only as long as the run that uses it.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub host: String,
    pub username: String,
    pub secret: String,
    /// Scheduler account the jobs are charged to.
    pub account: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Classification,
    Aggregation,
    Extraction,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Classification => "classification",
            PipelineKind::Aggregation => "aggregation",
            PipelineKind::Extraction => "extraction",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" | "centrifuge" => Ok(PipelineKind::Classification),
            "aggregation" | "recentrifuge" => Ok(PipelineKind::Aggregation),
            "extraction" | "rextract" => Ok(PipelineKind::Extraction),
            other => Err(AppError::configuration(format!(
                "unrecognized job kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    SingleEnd,
    PairedEnd,
}

impl ReadMode {
    pub fn expected_files(self) -> usize {
        match self {
            ReadMode::SingleEnd => 1,
            ReadMode::PairedEnd => 2,
        }
    }

    pub fn from_file_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ReadMode::SingleEnd),
            2 => Some(ReadMode::PairedEnd),
            _ => None,
        }
    }
}

/// Scheduler-side job state. `Unknown` marks a failed query and is never stored
/// as the last known state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Configuring,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Configuring => "CONFIGURING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    job_id: String,
    submitted_at: OffsetDateTime,
    last_known_state: JobState,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, submitted_at: OffsetDateTime) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at,
            last_known_state: JobState::Pending,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn submitted_at(&self) -> OffsetDateTime {
        self.submitted_at
    }

    pub fn last_known_state(&self) -> JobState {
        self.last_known_state
    }

    /// Records a successfully queried state. Returns false when the state was
    /// not applied: `Unknown` is ignored and a terminal state is final.
    pub fn observe(&mut self, state: JobState) -> bool {
        if state == JobState::Unknown || self.last_known_state.is_terminal() {
            return false;
        }
        self.last_known_state = state;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: TransferDirection,
    pub total_bytes: u64,
    transferred_bytes: u64,
}

impl TransferTask {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self::new(local_path, remote_path, TransferDirection::Upload)
    }

    pub fn download(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self::new(local_path, remote_path, TransferDirection::Download)
    }

    fn new(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        direction: TransferDirection,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction,
            total_bytes: 0,
            transferred_bytes: 0,
        }
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    /// Restart from zero with a freshly measured size.
    pub fn reset(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
        self.transferred_bytes = 0;
    }

    /// Counts `n` more bytes, clamped to `total_bytes`.
    pub fn advance(&mut self, n: u64) -> u64 {
        self.transferred_bytes = self
            .transferred_bytes
            .saturating_add(n)
            .min(self.total_bytes);
        self.transferred_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes == self.total_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Uploading,
    PreparingRemote,
    Submitting,
    Polling,
    Downloading,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Uploading => "Uploading",
            PipelineStage::PreparingRemote => "Preparing remote environment",
            PipelineStage::Submitting => "Submitting",
            PipelineStage::Polling => "Executing",
            PipelineStage::Downloading => "Downloading",
            PipelineStage::Done => "Done",
            PipelineStage::Failed => "Failed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

/// A file the run produced locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub remote_path: String,
    pub local_path: PathBuf,
}

/// Per-run context, owned by the caller of a pipeline entry point.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: String,
    pub kind: PipelineKind,
    stage: PipelineStage,
    progress_percent: u8,
    active_job: Option<JobHandle>,
    artifacts: Vec<Artifact>,
}

impl PipelineRun {
    pub fn new(id: impl Into<String>, kind: PipelineKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stage: PipelineStage::Uploading,
            progress_percent: 0,
            active_job: None,
            artifacts: Vec::new(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn active_job(&self) -> Option<&JobHandle> {
        self.active_job.as_ref()
    }

    pub fn active_job_mut(&mut self) -> Option<&mut JobHandle> {
        self.active_job.as_mut()
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Moves to `stage`. Percent never goes down and only Done reaches 100.
    pub fn enter(&mut self, stage: PipelineStage, percent: u8) {
        if self.stage.is_finished() {
            return;
        }
        let capped = if stage == PipelineStage::Done {
            100
        } else {
            percent.min(99)
        };
        self.stage = stage;
        self.progress_percent = self.progress_percent.max(capped);
    }

    pub fn fail(&mut self) {
        if !self.stage.is_finished() {
            self.stage = PipelineStage::Failed;
        }
    }

    /// Attaches the submitted job. A run holds at most one job; a second
    /// attach is refused.
    pub fn attach_job(&mut self, handle: JobHandle) -> bool {
        if self.active_job.is_some() {
            return false;
        }
        self.active_job = Some(handle);
        true
    }

    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub credentials: RemoteCredentials,
    pub read_mode: ReadMode,
    pub reads: Vec<PathBuf>,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub credentials: RemoteCredentials,
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub credentials: RemoteCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = RemoteCredentials {
            host: "login.example.org".into(),
            username: "alice".into(),
            secret: "hunter2".into(),
            account: "proj01".into(),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn unknown_kind_is_configuration_error() {
        let err = "assembly".parse::<PipelineKind>().unwrap_err();
        assert_eq!(err.kind(), crate::app::errors::AppErrorKind::Configuration);
        assert_eq!(
            "Classification".parse::<PipelineKind>().unwrap(),
            PipelineKind::Classification
        );
    }

    #[test]
    fn job_handle_ignores_unknown_and_keeps_terminal() {
        let mut handle = JobHandle::new("42", OffsetDateTime::UNIX_EPOCH);
        assert_eq!(handle.last_known_state(), JobState::Pending);
        assert!(!handle.observe(JobState::Unknown));
        assert_eq!(handle.last_known_state(), JobState::Pending);
        assert!(handle.observe(JobState::Running));
        assert!(handle.observe(JobState::Failed));
        assert!(!handle.observe(JobState::Running));
        assert_eq!(handle.last_known_state(), JobState::Failed);
    }

    #[test]
    fn transfer_progress_is_clamped() {
        let mut task = TransferTask::upload("/tmp/a.fastq", "/scratch/dec/a.fastq");
        task.reset(10);
        assert_eq!(task.advance(4), 4);
        assert_eq!(task.advance(100), 10);
        assert!(task.is_complete());
        task.reset(3);
        assert_eq!(task.transferred_bytes(), 0);
    }

    #[test]
    fn run_progress_is_monotonic_and_hundred_only_when_done() {
        let mut run = PipelineRun::new("r1", PipelineKind::Aggregation);
        run.enter(PipelineStage::Polling, 60);
        run.enter(PipelineStage::Downloading, 40);
        assert_eq!(run.progress_percent(), 60);
        run.enter(PipelineStage::Downloading, 100);
        assert_eq!(run.progress_percent(), 99);
        run.enter(PipelineStage::Done, 100);
        assert_eq!(run.progress_percent(), 100);
        run.fail();
        assert_eq!(run.stage(), PipelineStage::Done);
    }

    #[test]
    fn run_holds_a_single_job() {
        let mut run = PipelineRun::new("r1", PipelineKind::Extraction);
        assert!(run.attach_job(JobHandle::new("1", OffsetDateTime::UNIX_EPOCH)));
        assert!(!run.attach_job(JobHandle::new("2", OffsetDateTime::UNIX_EPOCH)));
        assert_eq!(run.active_job().map(|j| j.job_id()), Some("1"));
    }
}
