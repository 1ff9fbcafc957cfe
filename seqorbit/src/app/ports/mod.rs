// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod remote_session;
pub mod telemetry;

pub use clock::ClockPort;
pub use remote_session::{CommandOutput, RemoteSession, SessionFactoryPort, TransferProgressFn};
#[allow(unused_imports)]
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
