// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod errors;
pub mod orchestrator;
pub mod pipelines;
pub mod poller;
pub mod ports;
pub mod progress;
pub mod runner;
pub mod services;
pub mod submitter;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
