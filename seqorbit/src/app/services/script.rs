// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Batch script rendering.
//!
//! A [`JobSpec`] is a tagged value with one variant per pipeline kind. It can
//! only be obtained through [`JobSpecBuilder::build`], which rejects missing
//! fields instead of filling in defaults, so [`render`] never fails and is a
//! pure function of its input.

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::app::errors::{AppError, AppResult};
use crate::app::services::slurm::parse_slurm_duration;
use crate::app::types::{PipelineKind, ReadMode};

pub const CENTRIFUGE_INDEX: &str = "database/abv";
pub const CLASSIFICATION_OUTPUT: &str = "reports/centrifuge_output.txt";
pub const AGGREGATION_SUBDIR: &str = "reports/recentrifuge_reports";
pub const EXTRACTION_DIR: &str = "cleaned_sequences";
pub const EXTRACTION_ARCHIVE: &str = "cleaned_sequences.tar.gz";

/// Wall-clock limit, rendered as `H:MM:SS` with unbounded hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walltime {
    seconds: u64,
}

impl Walltime {
    pub fn from_secs(seconds: u64) -> AppResult<Self> {
        if seconds == 0 {
            return Err(AppError::configuration("walltime must be positive"));
        }
        Ok(Self { seconds })
    }

    pub fn as_secs(self) -> u64 {
        self.seconds
    }
}

impl FromStr for Walltime {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let seconds = parse_slurm_duration(s).ok_or_else(|| {
            AppError::configuration(format!(
                "walltime '{s}' must look like HH:MM:SS or D-HH:MM:SS"
            ))
        })?;
        Self::from_secs(seconds)
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.seconds / 3600;
        let m = (self.seconds % 3600) / 60;
        let s = self.seconds % 60;
        write!(f, "{h:02}:{m:02}:{s:02}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub partition: String,
    pub walltime: Walltime,
    pub nodes: u32,
    pub tasks: u32,
    pub memory_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFiles {
    Single(String),
    Paired(String, String),
}

impl ReadFiles {
    pub fn mode(&self) -> ReadMode {
        match self {
            ReadFiles::Single(_) => ReadMode::SingleEnd,
            ReadFiles::Paired(_, _) => ReadMode::PairedEnd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommon {
    pub resources: Resources,
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    Classification { common: JobCommon, reads: ReadFiles },
    Aggregation { common: JobCommon },
    Extraction { common: JobCommon, reads: ReadFiles },
}

impl JobSpec {
    pub fn kind(&self) -> PipelineKind {
        match self {
            JobSpec::Classification { .. } => PipelineKind::Classification,
            JobSpec::Aggregation { .. } => PipelineKind::Aggregation,
            JobSpec::Extraction { .. } => PipelineKind::Extraction,
        }
    }

    pub fn common(&self) -> &JobCommon {
        match self {
            JobSpec::Classification { common, .. }
            | JobSpec::Aggregation { common }
            | JobSpec::Extraction { common, .. } => common,
        }
    }

    pub fn script_name(&self) -> &'static str {
        match self.kind() {
            PipelineKind::Classification => "cen_script.sh",
            PipelineKind::Aggregation => "rec_script.sh",
            PipelineKind::Extraction => "rex_script.sh",
        }
    }

    fn job_name(&self) -> &'static str {
        match self.kind() {
            PipelineKind::Classification => "centrifuge",
            PipelineKind::Aggregation => "recentrifuge",
            PipelineKind::Extraction => "rextract",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobSpecBuilder {
    kind: Option<String>,
    resources: Option<Resources>,
    account: Option<String>,
    reads: Option<Vec<String>>,
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: PipelineKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    /// Kind by name, checked in `build`.
    pub fn kind_name(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn reads(mut self, reads: Vec<String>) -> Self {
        self.reads = Some(reads);
        self
    }

    pub fn build(self) -> AppResult<JobSpec> {
        let kind: PipelineKind = self
            .kind
            .as_deref()
            .ok_or_else(|| missing("kind"))?
            .parse()?;
        let resources = self.resources.ok_or_else(|| missing("resources"))?;
        check_resources(&resources)?;
        let account = self.account.ok_or_else(|| missing("account"))?;
        check_token("account", &account)?;
        let common = JobCommon { resources, account };

        match kind {
            PipelineKind::Aggregation => {
                if self.reads.as_ref().is_some_and(|r| !r.is_empty()) {
                    return Err(AppError::configuration(
                        "aggregation jobs do not take read files",
                    ));
                }
                Ok(JobSpec::Aggregation { common })
            }
            PipelineKind::Classification => {
                let reads = read_files(self.reads)?;
                Ok(JobSpec::Classification { common, reads })
            }
            PipelineKind::Extraction => {
                let reads = read_files(self.reads)?;
                Ok(JobSpec::Extraction { common, reads })
            }
        }
    }
}

fn missing(field: &str) -> AppError {
    AppError::configuration(format!("job specification is missing '{field}'"))
}

fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn check_token(field: &str, value: &str) -> AppResult<()> {
    if is_safe_token(value) {
        Ok(())
    } else {
        Err(AppError::configuration(format!(
            "{field} '{value}' may only contain letters, digits, '.', '_' and '-'"
        )))
    }
}

fn check_resources(resources: &Resources) -> AppResult<()> {
    check_token("partition", &resources.partition)?;
    if resources.nodes == 0 {
        return Err(AppError::configuration("node count must be positive"));
    }
    if resources.tasks == 0 {
        return Err(AppError::configuration("task count must be positive"));
    }
    if resources.memory_gb == 0 {
        return Err(AppError::configuration("memory must be positive"));
    }
    Ok(())
}

fn read_files(reads: Option<Vec<String>>) -> AppResult<ReadFiles> {
    let reads = reads.ok_or_else(|| missing("reads"))?;
    for name in &reads {
        check_token("read file name", name)?;
    }
    let mut it = reads.into_iter();
    match (it.next(), it.next(), it.next()) {
        (Some(first), None, None) => Ok(ReadFiles::Single(first)),
        (Some(first), Some(second), None) => Ok(ReadFiles::Paired(first, second)),
        _ => Err(AppError::configuration(
            "expected one (single-end) or two (paired-end) read files",
        )),
    }
}

/// Renders the batch script for `spec`.
pub fn render(spec: &JobSpec) -> String {
    let common = spec.common();
    let res = &common.resources;
    let mut out = String::new();
    out.push_str("#!/bin/bash\n\n");
    let _ = writeln!(out, "#SBATCH --job-name={}", spec.job_name());
    let _ = writeln!(out, "#SBATCH --time={}", res.walltime);
    let _ = writeln!(out, "#SBATCH -p {}", res.partition);
    let _ = writeln!(out, "#SBATCH -N {}", res.nodes);
    let _ = writeln!(out, "#SBATCH -n {}", res.tasks);
    let _ = writeln!(out, "#SBATCH --mem={}G", res.memory_gb);
    let _ = writeln!(out, "#SBATCH --account {}", common.account);
    out.push('\n');

    match spec {
        JobSpec::Classification { reads, .. } => {
            let threads = res.tasks;
            let _ = writeln!(
                out,
                "centrifuge-build -p {threads} --conversion-table seqid2taxid.map \
                 --taxonomy-tree taxonomy/nodes.dmp --name-table taxonomy/names.dmp \
                 sequences.fna {CENTRIFUGE_INDEX}"
            );
            let inputs = match reads {
                ReadFiles::Single(r) => format!("-U {r}"),
                ReadFiles::Paired(r1, r2) => format!("-1 {r1} -2 {r2}"),
            };
            let _ = writeln!(
                out,
                "centrifuge -x {CENTRIFUGE_INDEX} {inputs} -S {CLASSIFICATION_OUTPUT} -p {threads}"
            );
        }
        JobSpec::Aggregation { .. } => {
            let _ = writeln!(out, "rcf -f {CLASSIFICATION_OUTPUT} -n taxonomy -e CSV");
            let _ = writeln!(out, "mv reports/*rcf* {AGGREGATION_SUBDIR}");
        }
        JobSpec::Extraction { reads, .. } => {
            let inputs = match reads {
                ReadFiles::Single(r) => format!("-q {r}"),
                ReadFiles::Paired(r1, r2) => format!("-1 {r1} -2 {r2}"),
            };
            let _ = writeln!(
                out,
                "rextract -f {CLASSIFICATION_OUTPUT} -n taxonomy {inputs} -c -u -d"
            );
            let _ = writeln!(out, "mkdir -p {EXTRACTION_DIR}");
            let _ = writeln!(out, "mv *rxtr* {EXTRACTION_DIR}/");
            let _ = writeln!(out, "tar -czf {EXTRACTION_ARCHIVE} {EXTRACTION_DIR}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;

    fn resources(partition: &str, memory_gb: u32) -> Resources {
        Resources {
            partition: partition.to_string(),
            walltime: "24:00:00".parse().unwrap(),
            nodes: 1,
            tasks: 48,
            memory_gb,
        }
    }

    fn classification(reads: &[&str]) -> AppResult<JobSpec> {
        JobSpecBuilder::new()
            .kind(PipelineKind::Classification)
            .resources(resources("g100_usr_prod", 100))
            .account("proj01")
            .reads(reads.iter().map(|r| r.to_string()).collect())
            .build()
    }

    #[test]
    fn renders_single_end_classification() {
        let spec = classification(&["sample.fastq"]).unwrap();
        let expected = "#!/bin/bash\n\n\
#SBATCH --job-name=centrifuge\n\
#SBATCH --time=24:00:00\n\
#SBATCH -p g100_usr_prod\n\
#SBATCH -N 1\n\
#SBATCH -n 48\n\
#SBATCH --mem=100G\n\
#SBATCH --account proj01\n\
\n\
centrifuge-build -p 48 --conversion-table seqid2taxid.map --taxonomy-tree taxonomy/nodes.dmp --name-table taxonomy/names.dmp sequences.fna database/abv\n\
centrifuge -x database/abv -U sample.fastq -S reports/centrifuge_output.txt -p 48\n";
        assert_eq!(render(&spec), expected);
    }

    #[test]
    fn renders_paired_end_classification() {
        let spec = classification(&["r_1.fq.gz", "r_2.fq.gz"]).unwrap();
        let script = render(&spec);
        assert!(script.contains(
            "centrifuge -x database/abv -1 r_1.fq.gz -2 r_2.fq.gz -S reports/centrifuge_output.txt -p 48\n"
        ));
    }

    #[test]
    fn render_is_deterministic() {
        let a = classification(&["a.fastq", "b.fastq"]).unwrap();
        let b = classification(&["a.fastq", "b.fastq"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(render(&a), render(&b));
        assert_eq!(render(&a), render(&a));
    }

    #[test]
    fn renders_aggregation() {
        let spec = JobSpecBuilder::new()
            .kind(PipelineKind::Aggregation)
            .resources(resources("g100_usr_bmem", 500))
            .account("proj01")
            .build()
            .unwrap();
        let script = render(&spec);
        assert!(script.contains("#SBATCH --job-name=recentrifuge\n"));
        assert!(script.contains("#SBATCH --mem=500G\n"));
        assert!(script.ends_with(
            "rcf -f reports/centrifuge_output.txt -n taxonomy -e CSV\n\
             mv reports/*rcf* reports/recentrifuge_reports\n"
        ));
        assert_eq!(spec.script_name(), "rec_script.sh");
    }

    #[test]
    fn renders_extraction_with_archive() {
        let spec = JobSpecBuilder::new()
            .kind_name("extraction")
            .resources(resources("g100_usr_prod", 100))
            .account("proj01")
            .reads(vec!["s.fastq".into()])
            .build()
            .unwrap();
        let script = render(&spec);
        assert!(script.contains(
            "rextract -f reports/centrifuge_output.txt -n taxonomy -q s.fastq -c -u -d\n"
        ));
        assert!(script.ends_with("tar -czf cleaned_sequences.tar.gz cleaned_sequences\n"));
    }

    #[test]
    fn missing_fields_are_configuration_errors() {
        let err = JobSpecBuilder::new()
            .kind(PipelineKind::Aggregation)
            .account("proj01")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Configuration);
        assert!(err.message().contains("resources"));

        let err = JobSpecBuilder::new()
            .kind(PipelineKind::Classification)
            .resources(resources("p", 1))
            .account("proj01")
            .build()
            .unwrap_err();
        assert!(err.message().contains("reads"));

        let err = JobSpecBuilder::new().build().unwrap_err();
        assert!(err.message().contains("kind"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = JobSpecBuilder::new()
            .kind_name("assembly")
            .resources(resources("p", 1))
            .account("proj01")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Configuration);
    }

    #[test]
    fn unsafe_values_are_rejected() {
        assert!(classification(&["a b.fastq"]).is_err());
        assert!(classification(&["$(rm -rf ~).fastq"]).is_err());
        assert!(classification(&["a.fastq", "b.fastq", "c.fastq"]).is_err());
        let err = JobSpecBuilder::new()
            .kind(PipelineKind::Aggregation)
            .resources(resources("p", 1))
            .account("proj;id")
            .build()
            .unwrap_err();
        assert!(err.message().contains("account"));
    }

    #[test]
    fn walltime_formats_hours_past_a_day() {
        let w: Walltime = "1-12:30:00".parse().unwrap();
        assert_eq!(w.to_string(), "36:30:00");
        assert!("00:00:00".parse::<Walltime>().is_err());
    }
}
