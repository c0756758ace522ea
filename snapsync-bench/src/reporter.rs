// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON report files.

use crate::metrics::BenchmarkReport;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Report I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Writes reports as pretty JSON under one directory.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Save a report as `<label>_<timestamp>_<run id prefix>.json`.
    ///
    /// The label is the single category the report covers, or `mixed`.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let mut categories = report.results.iter().map(|r| r.category);
        let label = match categories.next() {
            Some(first) if categories.all(|c| c == first) => first.to_string(),
            _ => "mixed".to_string(),
        };

        let run_id = report.run_id.simple().to_string();
        let filename = format!(
            "{}_{}_{}.json",
            label,
            report.timestamp.format("%Y-%m-%dT%H-%M-%SZ"),
            &run_id[..8]
        );
        let filepath = self.output_dir.join(filename);

        let writer = BufWriter::new(File::create(&filepath)?);
        serde_json::to_writer_pretty(writer, report)?;

        tracing::debug!(path = %filepath.display(), results = report.results.len(), "Report written");
        Ok(filepath)
    }

    /// Existing report files, oldest name first.
    pub fn list_reports(&self) -> Result<Vec<PathBuf>, ReporterError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                reports.push(path);
            }
        }
        reports.sort();
        Ok(reports)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<BenchmarkReport, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BenchmarkCategory, BenchmarkResult};
    use tempfile::TempDir;

    #[test]
    fn test_reporter_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();

        let mut report = BenchmarkReport::new();
        report.add_result(BenchmarkResult::latency(
            "wake_datagram",
            BenchmarkCategory::Wake,
            vec![100, 200, 300],
            false,
        ));

        let path = reporter.save(&report).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("wake_"));

        let loaded = JsonReporter::load(&path).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].name, "wake_datagram");
    }

    #[test]
    fn test_mixed_reports_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();

        let mut first = BenchmarkReport::new();
        first.add_result(BenchmarkResult::latency("a", BenchmarkCategory::Codec, vec![1], false));
        first.add_result(BenchmarkResult::latency("b", BenchmarkCategory::Round, vec![1], false));
        let mut second = first.clone();
        second.run_id = uuid::Uuid::new_v4();

        let path = reporter.save(&first).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("mixed_"));
        reporter.save(&second).unwrap();

        assert_eq!(reporter.list_reports().unwrap().len(), 2);
    }
}
