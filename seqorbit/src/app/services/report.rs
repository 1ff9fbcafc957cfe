// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};

/// One row of the classification report.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportRecord {
    pub name: String,
    #[serde(rename = "taxID")]
    pub tax_id: String,
    #[serde(rename = "taxRank")]
    pub tax_rank: String,
    #[serde(rename = "genomeSize")]
    pub genome_size: u64,
    #[serde(rename = "numReads")]
    pub num_reads: u64,
    #[serde(rename = "numUniqueReads")]
    pub num_unique_reads: u64,
    pub abundance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric<T> {
    pub name: String,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub organisms: usize,
    pub max_abundance: Option<Metric<f64>>,
    pub max_abundance_percent: Option<f64>,
    pub max_num_reads: Option<Metric<u64>>,
    pub max_num_unique_reads: Option<Metric<u64>>,
    pub max_genome_size: Option<Metric<u64>>,
}

pub fn parse_report(path: &Path) -> AppResult<Vec<ReportRecord>> {
    let file = std::fs::File::open(path).map_err(|err| {
        AppError::with_message(
            AppErrorKind::Io,
            codes::LOCAL_ERROR,
            format!("failed to open report {}: {err}", path.display()),
        )
    })?;
    parse_report_from(file)
}

pub fn parse_report_from<R: Read>(reader: R) -> AppResult<Vec<ReportRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);
    let mut records = Vec::new();
    for (idx, row) in rdr.deserialize::<ReportRecord>().enumerate() {
        let row_no = idx + 1;
        let record = row.map_err(|err| {
            AppError::validation(format!("report row {row_no} is malformed: {err}"))
        })?;
        if !(0.0..=1.0).contains(&record.abundance) {
            return Err(AppError::validation(format!(
                "report row {row_no}: abundance {} is outside [0, 1]",
                record.abundance
            )));
        }
        records.push(record);
    }
    Ok(records)
}

fn max_by<T: PartialOrd + Copy>(
    records: &[ReportRecord],
    field: impl Fn(&ReportRecord) -> T,
) -> Option<Metric<T>> {
    let mut best: Option<&ReportRecord> = None;
    for record in records {
        match best {
            Some(current) if field(record) <= field(current) => {}
            _ => best = Some(record),
        }
    }
    best.map(|r| Metric {
        name: r.name.clone(),
        value: field(r),
    })
}

pub fn summarize(records: &[ReportRecord]) -> ReportSummary {
    let max_abundance = max_by(records, |r| r.abundance);
    let max_abundance_percent = max_abundance
        .as_ref()
        .map(|m| (m.value * 10_000.0).round() / 100.0);
    ReportSummary {
        organisms: records.len(),
        max_abundance,
        max_abundance_percent,
        max_num_reads: max_by(records, |r| r.num_reads),
        max_num_unique_reads: max_by(records, |r| r.num_unique_reads),
        max_genome_size: max_by(records, |r| r.genome_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n\
Escherichia coli\t562\tspecies\t5231428\t1200\t800\t0.62\n\
Salmonella enterica\t28901\tspecies\t4951383\t300\t120\t0.25\n\
Homo sapiens\t9606\tspecies\t3100000000\t50\t10\t0.13\n";

    #[test]
    fn parses_every_row() {
        let records = parse_report_from(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "Escherichia coli");
        assert_eq!(records[0].tax_id, "562");
        assert_eq!(records[2].genome_size, 3_100_000_000);
        assert_eq!(records[1].num_unique_reads, 120);
    }

    #[test]
    fn empty_report_has_no_rows() {
        let header = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n";
        assert!(parse_report_from(header.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn rejects_negative_counts_and_bad_abundance() {
        let negative = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n\
x\t1\tspecies\t10\t-1\t0\t0.1\n";
        let err = parse_report_from(negative.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Validation);
        assert!(err.message().contains("row 1"));

        let too_big = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n\
x\t1\tspecies\t10\t1\t0\t0.1\n\
y\t2\tspecies\t10\t1\t0\t1.5\n";
        let err = parse_report_from(too_big.as_bytes()).unwrap_err();
        assert!(err.message().contains("row 2"));
    }

    #[test]
    fn summary_picks_maxima() {
        let records = parse_report_from(SAMPLE.as_bytes()).unwrap();
        let summary = summarize(&records);
        assert_eq!(summary.organisms, 3);
        assert_eq!(
            summary.max_abundance.as_ref().map(|m| m.name.as_str()),
            Some("Escherichia coli")
        );
        assert_eq!(summary.max_abundance_percent, Some(62.0));
        assert_eq!(summary.max_num_reads.as_ref().map(|m| m.value), Some(1200));
        assert_eq!(
            summary.max_genome_size.as_ref().map(|m| m.name.as_str()),
            Some("Homo sapiens")
        );
    }

    #[test]
    fn summary_of_nothing_is_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.organisms, 0);
        assert!(summary.max_abundance.is_none());
        assert!(summary.max_abundance_percent.is_none());
    }

    #[test]
    fn reads_report_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("centrifuge_report.tsv");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(parse_report(&path).unwrap().len(), 3);
        let err = parse_report(&dir.path().join("missing.tsv")).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Io);
    }
}
