use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::target::TargetOutcome;
use crate::targets::TargetRegion;

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub outcome: TargetOutcome,
}

impl TargetReport {
    pub fn new(region: &TargetRegion, outcome: TargetOutcome) -> Self {
        TargetReport {
            name: region.name.clone(),
            chrom: region.chrom.clone(),
            start: region.start,
            end: region.end,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_targets: usize,
    pub targets_with_calls: usize,
    pub targets_without_calls: usize,
    pub targets_without_reads: usize,
    pub failed_targets: usize,
    pub total_calls: usize,
    pub kmer_size: usize,
    pub runtime_seconds: f64,
    pub targets: Vec<TargetReport>,
}

impl RunSummary {
    pub fn new(kmer_size: usize, targets: Vec<TargetReport>) -> Self {
        let mut summary = RunSummary {
            total_targets: targets.len(),
            kmer_size,
            ..Default::default()
        };
        for report in &targets {
            match &report.outcome {
                TargetOutcome::NothingToAnalyze => summary.targets_without_reads += 1,
                TargetOutcome::NoFindings => summary.targets_without_calls += 1,
                TargetOutcome::Findings { calls } => {
                    summary.targets_with_calls += 1;
                    summary.total_calls += calls;
                }
                TargetOutcome::Failed { .. } => summary.failed_targets += 1,
            }
        }
        summary.targets = targets;
        summary
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Stage;

    fn report(name: &str, outcome: TargetOutcome) -> TargetReport {
        TargetReport {
            name: name.into(),
            chrom: "chr1".into(),
            start: 0,
            end: 10,
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::new(
            15,
            vec![
                report("A", TargetOutcome::Findings { calls: 2 }),
                report("B", TargetOutcome::NoFindings),
                report("C", TargetOutcome::NothingToAnalyze),
                report(
                    "D",
                    TargetOutcome::Failed {
                        stage: Stage::Cluster,
                        message: "boom".into(),
                    },
                ),
            ],
        );
        assert_eq!(summary.total_targets, 4);
        assert_eq!(summary.targets_with_calls, 1);
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.targets_without_calls, 1);
        assert_eq!(summary.targets_without_reads, 1);
        assert_eq!(summary.failed_targets, 1);
    }

    #[test]
    fn test_write_summary_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary::new(15, vec![report("A", TargetOutcome::Findings { calls: 1 })]);
        write_summary(&path, &summary).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_calls"], 1);
        assert_eq!(value["targets"][0]["outcome"]["status"], "findings");
        assert_eq!(value["targets"][0]["outcome"]["calls"], 1);
    }
}
