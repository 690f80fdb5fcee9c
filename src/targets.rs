//! Target regions loaded from a BED file.
//!
//! Several BED intervals may share one target name (e.g. the exons of a
//! gene); they are merged into a single region spanning the minimum start
//! and maximum end of the group.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::error::Error;

/// One BED interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

/// A genomic region analysed as one independent unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRegion {
    pub name: String,
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub intervals: Vec<Interval>,
}

impl TargetRegion {
    /// Build a region from its intervals, widening start/end to cover all.
    pub fn from_intervals(name: &str, intervals: Vec<Interval>) -> Result<Self, Error> {
        let first = intervals.first().ok_or_else(|| {
            Error::Parameter(format!("target {} has no intervals", name))
        })?;

        let mut region = TargetRegion {
            name: name.to_string(),
            chrom: first.chrom.clone(),
            start: first.start,
            end: first.end,
            intervals: Vec::with_capacity(intervals.len()),
        };
        for iv in intervals {
            if iv.chrom != region.chrom {
                return Err(Error::Parameter(format!(
                    "target {} spans chromosomes {} and {}",
                    name, region.chrom, iv.chrom
                )));
            }
            region.start = region.start.min(iv.start);
            region.end = region.end.max(iv.end);
            region.intervals.push(iv);
        }
        Ok(region)
    }

    /// Region widened by `buffer` on both sides, clamped at zero.
    pub fn padded(&self, buffer: i64) -> (i64, i64) {
        ((self.start - buffer).max(0), self.end + buffer)
    }
}

/// Read targets from a BED file (`chrom start end name`), in order of first
/// appearance of each name.
pub fn load_targets(bed: &Path) -> Result<Vec<TargetRegion>, Error> {
    let file = File::open(bed).map_err(|e| Error::io(e, bed))?;

    let mut names: Vec<String> = Vec::new();
    let mut grouped: ahash::AHashMap<String, Vec<Interval>> = ahash::AHashMap::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, bed))?;
        let line = line.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(Error::parse(bed, idx + 1, "expected chrom, start, end, name"));
        }
        let start: i64 = fields[1]
            .parse()
            .map_err(|_| Error::parse(bed, idx + 1, format!("bad start '{}'", fields[1])))?;
        let end: i64 = fields[2]
            .parse()
            .map_err(|_| Error::parse(bed, idx + 1, format!("bad end '{}'", fields[2])))?;
        if end < start {
            return Err(Error::parse(bed, idx + 1, "end before start"));
        }

        let name = fields[3].to_string();
        let entry = grouped.entry(name.clone()).or_default();
        if entry.is_empty() {
            names.push(name);
        }
        entry.push(Interval {
            chrom: fields[0].to_string(),
            start,
            end,
        });
    }

    names
        .into_iter()
        .map(|name| {
            let intervals = grouped.remove(&name).unwrap_or_default();
            TargetRegion::from_intervals(&name, intervals)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_intervals() {
        let dir = tempfile::TempDir::new().unwrap();
        let bed = dir.path().join("targets.bed");
        std::fs::write(
            &bed,
            "# header\nchr2\t500\t600\tGENE1\nchr1\t10\t20\tGENE2\nchr2\t100\t200\tGENE1\n",
        )
        .unwrap();

        let targets = load_targets(&bed).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "GENE1");
        assert_eq!(targets[0].chrom, "chr2");
        assert_eq!(targets[0].start, 100);
        assert_eq!(targets[0].end, 600);
        assert_eq!(targets[0].intervals.len(), 2);
        assert_eq!(targets[1].name, "GENE2");
    }

    #[test]
    fn test_reject_mixed_chromosomes() {
        let intervals = vec![
            Interval { chrom: "chr1".into(), start: 1, end: 5 },
            Interval { chrom: "chr2".into(), start: 1, end: 5 },
        ];
        assert!(TargetRegion::from_intervals("T", intervals).is_err());
    }

    #[test]
    fn test_short_line_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let bed = dir.path().join("bad.bed");
        std::fs::write(&bed, "chr1\t10\t20\n").unwrap();
        assert!(matches!(load_targets(&bed), Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn test_padded_clamps_at_zero() {
        let t = TargetRegion::from_intervals(
            "T",
            vec![Interval { chrom: "chr1".into(), start: 50, end: 80 }],
        )
        .unwrap();
        assert_eq!(t.padded(200), (0, 280));
        assert_eq!(t.padded(10), (40, 90));
    }
}
