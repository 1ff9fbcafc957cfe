// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

#[derive(Clone, Debug, Default)]
pub struct TelemetryEvent {
    pub run_id: Option<String>,
    pub pipeline: Option<&'static str>,
    pub stage: Option<&'static str>,
    pub job_id: Option<String>,
    pub job_state: Option<&'static str>,
    pub host: Option<String>,
    pub error_kind: Option<&'static str>,
}

pub trait TelemetryPort: Send + Sync {
    fn event(&self, name: &'static str, fields: TelemetryEvent);
}

// Dummy telemetry port for tests.
#[derive(Clone, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn event(&self, _name: &'static str, _fields: TelemetryEvent) {}
}
