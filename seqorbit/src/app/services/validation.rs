// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{ReadMode, RemoteCredentials};

/// RefSeq domains understood by the reference download step.
pub const KNOWN_DOMAINS: &[&str] = &[
    "archaea",
    "bacteria",
    "viral",
    "fungi",
    "protozoa",
    "vertebrate_mammalian",
    "vertebrate_other",
    "invertebrate",
    "plant",
];

const READ_EXTENSIONS: &[&str] = &["fastq", "fq", "fastq.gz", "fq.gz"];

/// Lowercased extension of `file_name`; a trailing `.gz` keeps the part before it.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if ext == "gz" {
        if let Some((_, inner)) = stem.rsplit_once('.') {
            return Some(format!("{}.gz", inner.to_ascii_lowercase()));
        }
    }
    Some(ext)
}

pub fn is_read_file(file_name: &str) -> bool {
    file_extension(file_name)
        .map(|ext| READ_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_report_file(file_name: &str) -> bool {
    file_extension(file_name).as_deref() == Some("tsv")
}

/// Names that travel to the remote shell must be plain tokens.
pub fn is_safe_remote_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

pub fn validate_credentials(credentials: &RemoteCredentials) -> AppResult<()> {
    let fields = [
        ("host", credentials.host.as_str()),
        ("username", credentials.username.as_str()),
        ("account", credentials.account.as_str()),
        ("secret", credentials.secret.as_str()),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(AppError::validation(format!("{name} must not be empty")));
        }
    }
    if !is_safe_remote_name(&credentials.account) {
        return Err(AppError::validation(format!(
            "account '{}' may only contain letters, digits, '.', '_' and '-'",
            credentials.account
        )));
    }
    Ok(())
}

/// Normalizes the domain selection: lowercased, deduplicated, order kept.
pub fn validate_domains(domains: &[String]) -> AppResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            continue;
        }
        if !KNOWN_DOMAINS.contains(&domain.as_str()) {
            return Err(AppError::validation(format!(
                "unknown domain '{domain}'; expected one of {}",
                KNOWN_DOMAINS.join(", ")
            )));
        }
        if !out.contains(&domain) {
            out.push(domain);
        }
    }
    if out.is_empty() {
        return Err(AppError::validation("select at least one domain"));
    }
    Ok(out)
}

/// Checks count, names and presence of the local read files. Returns the
/// remote file names in input order.
pub fn validate_reads(mode: ReadMode, reads: &[PathBuf]) -> AppResult<Vec<String>> {
    let expected = mode.expected_files();
    if reads.len() != expected {
        return Err(AppError::validation(format!(
            "{} mode needs {expected} read file(s), got {}",
            match mode {
                ReadMode::SingleEnd => "single-end",
                ReadMode::PairedEnd => "paired-end",
            },
            reads.len()
        )));
    }
    let mut names = Vec::with_capacity(reads.len());
    for path in reads {
        let name = file_name(path)?;
        if !is_read_file(&name) {
            return Err(AppError::validation(format!(
                "{name}: allowed extensions are {}",
                READ_EXTENSIONS.join(", ")
            )));
        }
        if !is_safe_remote_name(&name) {
            return Err(AppError::validation(format!(
                "{name}: file names may only contain letters, digits, '.', '_' and '-'"
            )));
        }
        if !path.is_file() {
            return Err(AppError::validation(format!(
                "{} does not exist or is not a regular file",
                path.display()
            )));
        }
        if names.contains(&name) {
            return Err(AppError::validation(format!(
                "{name} is given twice"
            )));
        }
        names.push(name);
    }
    Ok(names)
}

fn file_name(path: &Path) -> AppResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation(format!("{} has no file name", path.display())))
}
