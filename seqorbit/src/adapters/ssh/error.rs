// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

/// The shell stopped answering within the command timeout and was abandoned.
#[derive(Debug, ThisError)]
#[error("no sentinel within {timeout_secs}s; remote shell abandoned")]
pub struct ShellPoisoned {
    pub timeout_secs: u64,
}

/// A one-shot query produced no exit status within its timeout.
#[derive(Debug, ThisError)]
#[error("query did not finish within {timeout_secs}s")]
pub struct QueryTimedOut {
    pub timeout_secs: u64,
}

#[derive(Debug, ThisError)]
#[error("operation cancelled")]
pub struct OperationCancelled;

#[derive(Debug, ThisError)]
#[error("{}: {source}", path.display())]
pub struct LocalFileError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
