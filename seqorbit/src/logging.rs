// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_ENV: &str = "SEQORBIT_LOG";
const LOG_FORMAT_ENV: &str = "SEQORBIT_LOG_FORMAT";
const LOG_SPAN_EVENTS_ENV: &str = "SEQORBIT_LOG_SPAN_EVENTS";
const LOG_FILE_ENV: &str = "SEQORBIT_LOG_FILE";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Logs go to stderr; stdout carries
/// progress and results.
pub fn init(verbose: bool) {
    let filter = build_filter(verbose);
    let span_events = parse_span_events(env::var(LOG_SPAN_EVENTS_ENV).ok().as_deref());
    let format = parse_format(env::var(LOG_FORMAT_ENV).ok().as_deref());
    let registry = Registry::default()
        .with(filter)
        .with(tracing_error::ErrorLayer::default());

    match format {
        LogFormat::Json => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            if let Some((writer, guard)) = build_file_writer() {
                let file_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_span_events(span_events)
                    .with_writer(writer);
                registry.with(stderr_layer).with(file_layer).init();
                let _ = FILE_GUARD.set(guard);
            } else {
                registry.with(stderr_layer).init();
            }
        }
        LogFormat::Pretty => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            if let Some((writer, guard)) = build_file_writer() {
                let file_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_span_events(span_events)
                    .with_writer(writer);
                registry.with(stderr_layer).with(file_layer).init();
                let _ = FILE_GUARD.set(guard);
            } else {
                registry.with(stderr_layer).init();
            }
        }
        LogFormat::Compact => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone());
            if let Some((writer, guard)) = build_file_writer() {
                let file_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_span_events(span_events)
                    .with_writer(writer);
                registry.with(stderr_layer).with(file_layer).init();
                let _ = FILE_GUARD.set(guard);
            } else {
                registry.with(stderr_layer).init();
            }
        }
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(LOG_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => EnvFilter::new(default_directive(verbose)),
    }
}

/// Dependencies stay at warn unless verbose; russh is chatty at info.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn,seqorbit=info"
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(LOG_FILE_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Some((writer, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_are_case_insensitive() {
        assert_eq!(parse_format(Some(" JSON ")), LogFormat::Json);
        assert_eq!(parse_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(parse_format(Some("")), LogFormat::Compact);
        assert_eq!(parse_format(Some("xml")), LogFormat::Compact);
        assert_eq!(parse_format(None), LogFormat::Compact);
    }

    #[test]
    fn span_events_default_to_none() {
        assert_eq!(parse_span_events(Some("Close")), FmtSpan::CLOSE);
        assert_eq!(parse_span_events(Some("bogus")), FmtSpan::NONE);
        assert_eq!(parse_span_events(None), FmtSpan::NONE);
    }

    #[test]
    fn verbose_widens_the_default_filter() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "warn,seqorbit=info");
    }
}
