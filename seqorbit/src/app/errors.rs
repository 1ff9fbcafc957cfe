// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const PROTOCOL_TIMEOUT: &str = "protocol_timeout";
    pub const INVALID_JOB_SPEC: &str = "invalid_job_spec";
    pub const SUBMISSION_PARSE: &str = "submission_parse";
    pub const POLLING_EXHAUSTED: &str = "polling_exhausted";
    pub const NOT_FOUND: &str = "not_found";
    pub const TRANSFER_ERROR: &str = "transfer_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const JOB_FAILED: &str = "job_failed";
    pub const CANCELED: &str = "canceled";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    Validation,
    Authentication,
    Connection,
    ProtocolTimeout,
    Configuration,
    SubmissionParse,
    PollingExhausted,
    NotFound,
    Io,
    RemoteCommand,
    JobFailed,
    Cancelled,
}

impl AppErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AppErrorKind::Validation => "validation",
            AppErrorKind::Authentication => "authentication",
            AppErrorKind::Connection => "connection",
            AppErrorKind::ProtocolTimeout => "protocol_timeout",
            AppErrorKind::Configuration => "configuration",
            AppErrorKind::SubmissionParse => "submission_parse",
            AppErrorKind::PollingExhausted => "polling_exhausted",
            AppErrorKind::NotFound => "not_found",
            AppErrorKind::Io => "io",
            AppErrorKind::RemoteCommand => "remote_command",
            AppErrorKind::JobFailed => "job_failed",
            AppErrorKind::Cancelled => "cancelled",
        }
    }

    /// What the caller should do about a run that failed with this kind.
    pub fn disposition(self) -> Disposition {
        match self {
            AppErrorKind::NotFound => Disposition::NoSuchArtifact,
            AppErrorKind::Validation
            | AppErrorKind::Configuration
            | AppErrorKind::Authentication => Disposition::FixRequest,
            AppErrorKind::Connection
            | AppErrorKind::ProtocolTimeout
            | AppErrorKind::SubmissionParse
            | AppErrorKind::PollingExhausted
            | AppErrorKind::Io
            | AppErrorKind::RemoteCommand
            | AppErrorKind::JobFailed
            | AppErrorKind::Cancelled => Disposition::RetryRun,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// An expected remote artifact does not exist.
    NoSuchArtifact,
    /// Transient failure; the whole run may be retried.
    RetryRun,
    /// The request itself is invalid and must be fixed before resubmitting.
    FixRequest,
}

impl Disposition {
    pub fn exit_code(self) -> i32 {
        match self {
            Disposition::FixRequest => 2,
            Disposition::NoSuchArtifact => 3,
            Disposition::RetryRun => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Validation, codes::INVALID_ARGUMENT, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Configuration, codes::INVALID_JOB_SPEC, message)
    }

    pub fn cancelled() -> Self {
        Self::with_message(AppErrorKind::Cancelled, codes::CANCELED, "run cancelled")
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn disposition(&self) -> Disposition {
        self.kind.disposition()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
