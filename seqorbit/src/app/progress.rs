// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde::Serialize;
use tokio::sync::watch;

use crate::app::errors::AppError;
use crate::app::types::{JobState, PipelineStage, TransferDirection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferDetail {
    pub path: String,
    pub direction: TransferDirection,
    pub transferred: u64,
    pub total: u64,
}

/// What observers of a run see. `state` and `value` are the whole contract;
/// the rest is detail for richer consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressObservation {
    pub state: String,
    pub value: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferDetail>,
}

impl ProgressObservation {
    fn initial() -> Self {
        Self {
            state: String::new(),
            value: 0,
            stage: None,
            job_id: None,
            job_state: None,
            error_kind: None,
            error: None,
            transfer: None,
        }
    }

    /// Observers stop once this is true.
    pub fn is_final(&self) -> bool {
        self.value == 100 || self.stage == Some(PipelineStage::Failed)
    }
}

/// Progress of one run. Each run gets its own reporter; observers subscribe
/// through `subscribe` and see the latest observation.
pub struct ProgressReporter {
    tx: watch::Sender<ProgressObservation>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressObservation::initial());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressObservation> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ProgressObservation {
        self.tx.borrow().clone()
    }

    /// Stage boundary. Percent is kept non-decreasing and held below 100
    /// until the run is Done. Ignored once the run has finished.
    pub fn stage(&self, stage: PipelineStage, percent: u8) {
        self.tx.send_if_modified(|obs| {
            if obs.is_final() {
                return false;
            }
            let value = if stage == PipelineStage::Done {
                100
            } else {
                percent.min(99)
            };
            obs.state = stage.label().to_string();
            obs.value = obs.value.max(value);
            obs.stage = Some(stage);
            obs.transfer = None;
            true
        });
    }

    pub fn transfer(&self, detail: TransferDetail) {
        self.tx.send_if_modified(|obs| {
            if obs.is_final() {
                return false;
            }
            obs.transfer = Some(detail);
            true
        });
    }

    pub fn job_state(&self, job_id: &str, state: JobState) {
        self.tx.send_if_modified(|obs| {
            if obs.is_final() {
                return false;
            }
            obs.job_id = Some(job_id.to_string());
            obs.job_state = Some(state);
            true
        });
    }

    /// Terminal failure carrying the error that ended the run.
    pub fn fail(&self, err: &AppError) {
        self.tx.send_if_modified(|obs| {
            if obs.is_final() {
                return false;
            }
            obs.state = PipelineStage::Failed.label().to_string();
            obs.stage = Some(PipelineStage::Failed);
            obs.error_kind = Some(err.kind().as_str());
            obs.error = Some(err.to_string());
            obs.transfer = None;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_never_decreases_and_hits_100_only_on_done() {
        let reporter = ProgressReporter::new();
        reporter.stage(PipelineStage::Uploading, 10);
        reporter.stage(PipelineStage::Polling, 60);
        reporter.stage(PipelineStage::Submitting, 50);
        assert_eq!(reporter.current().value, 60);
        reporter.stage(PipelineStage::Downloading, 100);
        assert_eq!(reporter.current().value, 99);
        reporter.stage(PipelineStage::Done, 100);
        let obs = reporter.current();
        assert_eq!(obs.value, 100);
        assert_eq!(obs.state, "Done");
        assert!(obs.is_final());
    }

    #[test]
    fn failure_is_terminal_and_carries_kind() {
        let reporter = ProgressReporter::new();
        reporter.stage(PipelineStage::Submitting, 50);
        reporter.fail(&AppError::validation("bad"));
        reporter.stage(PipelineStage::Done, 100);
        let obs = reporter.current();
        assert_eq!(obs.stage, Some(PipelineStage::Failed));
        assert_eq!(obs.error_kind, Some("validation"));
        assert_eq!(obs.value, 50);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let reporter = ProgressReporter::new();
        let mut rx = reporter.subscribe();
        reporter.stage(PipelineStage::Uploading, 10);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, "Uploading");
        reporter.transfer(TransferDetail {
            path: "reads.fastq".into(),
            direction: TransferDirection::Upload,
            transferred: 5,
            total: 10,
        });
        rx.changed().await.unwrap();
        let obs = rx.borrow_and_update().clone();
        assert_eq!(obs.value, 10);
        assert_eq!(obs.transfer.map(|t| t.transferred), Some(5));
    }

    #[test]
    fn serializes_state_and_value() {
        let reporter = ProgressReporter::new();
        reporter.stage(PipelineStage::Polling, 60);
        let json = serde_json::to_value(reporter.current()).unwrap();
        assert_eq!(json["state"], "Executing");
        assert_eq!(json["value"], 60);
        assert_eq!(json["stage"], "polling");
        assert!(json.get("error").is_none());
    }
}
