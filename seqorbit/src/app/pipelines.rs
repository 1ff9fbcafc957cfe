// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! What each pipeline stages, prepares and retrieves.

use std::path::PathBuf;
use std::time::Duration;

use crate::app::poller::PollPolicy;
use crate::app::services::script::{
    AGGREGATION_SUBDIR, EXTRACTION_ARCHIVE, EXTRACTION_DIR, Resources,
};
use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::types::{PipelineKind, PipelineStage};

pub const CLASSIFICATION_REPORT: &str = "centrifuge_report.tsv";
pub const AGGREGATION_REPORT: &str = "centrifuge_output.txt.rcf.html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProfiles {
    pub classification: Resources,
    pub aggregation: Resources,
    pub extraction: Resources,
}

impl ResourceProfiles {
    pub fn for_kind(&self, kind: PipelineKind) -> &Resources {
        match kind {
            PipelineKind::Classification => &self.classification,
            PipelineKind::Aggregation => &self.aggregation,
            PipelineKind::Extraction => &self.extraction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Remote variable naming the scratch directory.
    pub scratch_env_var: String,
    /// Staging directory name under scratch.
    pub staging_dir: String,
    pub download_dir: PathBuf,
    /// Local directory the rendered scripts are written to before upload.
    pub scripts_dir: PathBuf,
    pub poll: PollPolicy,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub command_timeout: Duration,
    pub prepare_timeout: Duration,
    pub resources: ResourceProfiles,
}

/// Percent reported when a stage begins.
pub fn stage_percent(stage: PipelineStage) -> u8 {
    match stage {
        PipelineStage::Uploading => 10,
        PipelineStage::PreparingRemote => 30,
        PipelineStage::Submitting => 50,
        PipelineStage::Polling => 60,
        PipelineStage::Downloading => 90,
        PipelineStage::Done => 100,
        PipelineStage::Failed => 0,
    }
}

/// A file to fetch once the job has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPlan {
    /// Path relative to the staging directory.
    pub remote_relative: String,
    /// File name under the local download directory.
    pub local_name: String,
}

pub fn artifacts(kind: PipelineKind) -> Vec<ArtifactPlan> {
    match kind {
        PipelineKind::Classification => vec![ArtifactPlan {
            remote_relative: CLASSIFICATION_REPORT.to_string(),
            local_name: CLASSIFICATION_REPORT.to_string(),
        }],
        PipelineKind::Aggregation => vec![ArtifactPlan {
            remote_relative: format!("{AGGREGATION_SUBDIR}/{AGGREGATION_REPORT}"),
            local_name: "recentrifuge_output.html".to_string(),
        }],
        PipelineKind::Extraction => vec![ArtifactPlan {
            remote_relative: EXTRACTION_ARCHIVE.to_string(),
            local_name: EXTRACTION_ARCHIVE.to_string(),
        }],
    }
}

fn bioinformatics_profile() -> Vec<String> {
    vec![
        "module load profile/bioinf".to_string(),
        "module load autoload gcc".to_string(),
    ]
}

fn recentrifuge_environment() -> Vec<String> {
    let mut commands = bioinformatics_profile();
    commands.extend([
        "module load python/3.8.12--gcc--10.2.0".to_string(),
        "python3 -m venv recenv".to_string(),
        "source recenv/bin/activate".to_string(),
        "pip install recentrifuge xlrd".to_string(),
    ]);
    commands
}

fn centrifuge_on_path(scratch: &str) -> String {
    let tools = remote_join(scratch, "centrifuge");
    format!("export PATH={}:\"$PATH\"", sh_escape(&tools))
}

/// Environment setup run on the shared shell, in order, after `cd` into the
/// staging directory. `domains` is only used by classification.
pub fn preparation_commands(kind: PipelineKind, scratch: &str, domains: &[String]) -> Vec<String> {
    match kind {
        PipelineKind::Classification => {
            let mut commands = bioinformatics_profile();
            commands.extend([
                "module load autoload python".to_string(),
                centrifuge_on_path(scratch),
                "mkdir -p taxonomy library database reports".to_string(),
                "centrifuge-download -o taxonomy taxonomy".to_string(),
                format!(
                    "centrifuge-download -v -l -P 4 -o library -d {} refseq > seqid2taxid.map",
                    sh_escape(&domains.join(","))
                ),
                "cat library/*/*.fna > sequences.fna".to_string(),
            ]);
            commands
        }
        PipelineKind::Aggregation => {
            let mut commands = recentrifuge_environment();
            commands.push(centrifuge_on_path(scratch));
            commands.push(format!("mkdir -p {AGGREGATION_SUBDIR}"));
            commands
        }
        PipelineKind::Extraction => {
            let mut commands = recentrifuge_environment();
            commands.push(format!("mkdir -p {EXTRACTION_DIR}"));
            commands
        }
    }
}
