// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

/// Forwards run events to the `seqorbit::telemetry` tracing target.
#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            run_id,
            pipeline,
            stage,
            job_id,
            job_state,
            host,
            error_kind,
        } = fields;

        tracing::info!(
            target: "seqorbit::telemetry",
            event = name,
            run_id = run_id.as_deref(),
            pipeline,
            stage,
            job_id = job_id.as_deref(),
            job_state,
            host = host.as_deref(),
            error_kind,
        );
    }
}
