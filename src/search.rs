//! Reference search of contig sequences.
//!
//! Hits are PSL-shaped: ungapped blocks with query and target starts. Target
//! coordinates are relative to the searched locus; [`AlignmentHit::t_offset`]
//! carries the genomic position of the locus so callers can translate.
use log::debug;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Error;
use crate::process::run_tool;
use crate::reference::{write_fasta, ReferenceLocus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentHit {
    pub matches: u32,
    pub mismatches: u32,
    pub strand: Strand,
    pub q_name: String,
    pub q_size: u32,
    pub q_start: u32,
    pub q_end: u32,
    pub t_name: String,
    pub t_size: u32,
    pub t_start: u32,
    pub t_end: u32,
    pub block_sizes: Vec<u32>,
    /// Block starts on the query; reverse-strand hits count from the end of
    /// the query, as in PSL.
    pub q_starts: Vec<u32>,
    pub t_starts: Vec<u32>,
    /// Genomic position of target coordinate 0.
    pub t_offset: i64,
}

impl AlignmentHit {
    pub fn identity(&self) -> f64 {
        let aligned = self.matches + self.mismatches;
        if aligned == 0 {
            return 0.0;
        }
        self.matches as f64 / aligned as f64
    }

    pub fn score(&self) -> i64 {
        self.matches as i64 - self.mismatches as i64
    }

    pub fn q_span(&self) -> u32 {
        self.q_end.saturating_sub(self.q_start)
    }

    pub fn genomic_start(&self) -> i64 {
        self.t_offset + self.t_start as i64
    }

    pub fn genomic_end(&self) -> i64 {
        self.t_offset + self.t_end as i64
    }
}

/// Contig to be searched.
#[derive(Debug, Clone, Copy)]
pub struct ContigQuery<'a> {
    pub id: &'a str,
    pub seq: &'a str,
    /// Scratch directory for query and hit files.
    pub work_dir: &'a Path,
}

pub trait ReferenceSearcher: Send + Sync {
    /// All hits of `query` against `locus`. No hits is an empty vector.
    fn search(&self, query: &ContigQuery, locus: &ReferenceLocus)
        -> Result<Vec<AlignmentHit>, Error>;
}

fn parse_list(field: &str) -> Result<Vec<u32>, std::num::ParseIntError> {
    field
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Parse one 21-column PSL line.
pub fn parse_psl_line(line: &str) -> Result<AlignmentHit, String> {
    let f: Vec<&str> = line.split('\t').collect();
    if f.len() < 21 {
        return Err(format!("expected 21 PSL columns, found {}", f.len()));
    }
    let num = |i: usize| -> Result<u32, String> {
        f[i].parse::<u32>()
            .map_err(|_| format!("bad number '{}' in column {}", f[i], i + 1))
    };
    let list = |i: usize| -> Result<Vec<u32>, String> {
        parse_list(f[i]).map_err(|_| format!("bad list '{}' in column {}", f[i], i + 1))
    };
    let strand = match f[8] {
        "+" | "++" => Strand::Forward,
        "-" | "+-" | "-+" => Strand::Reverse,
        other => return Err(format!("bad strand '{}'", other)),
    };

    let hit = AlignmentHit {
        matches: num(0)?,
        mismatches: num(1)?,
        strand,
        q_name: f[9].to_string(),
        q_size: num(10)?,
        q_start: num(11)?,
        q_end: num(12)?,
        t_name: f[13].to_string(),
        t_size: num(14)?,
        t_start: num(15)?,
        t_end: num(16)?,
        block_sizes: list(18)?,
        q_starts: list(19)?,
        t_starts: list(20)?,
        t_offset: 0,
    };
    let n_blocks = num(17)? as usize;
    if hit.block_sizes.len() != n_blocks
        || hit.q_starts.len() != n_blocks
        || hit.t_starts.len() != n_blocks
    {
        return Err(format!("block count {} does not match block lists", n_blocks));
    }
    Ok(hit)
}

/// Parse a header-less PSL file.
pub fn read_psl(path: &Path) -> Result<Vec<AlignmentHit>, Error> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut hits = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, path))?;
        if line.trim().is_empty() {
            continue;
        }
        hits.push(parse_psl_line(&line).map_err(|m| Error::parse(path, idx + 1, m))?);
    }
    Ok(hits)
}

/// BLAT against the target's forward reference window.
#[derive(Debug, Clone)]
pub struct Blat {
    pub exe: PathBuf,
    pub min_score: u32,
    pub min_identity: u32,
}

impl Blat {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Blat {
            exe: exe.into(),
            min_score: 20,
            min_identity: 90,
        }
    }

    /// Set BLAT's percent identity filter from a `0..=1` fraction, rounding
    /// down so BLAT never drops a hit the call thresholds would keep.
    pub fn with_min_identity(mut self, fraction: f64) -> Self {
        self.min_identity = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
        self
    }

    fn filter_args(&self) -> [String; 2] {
        [
            format!("-minScore={}", self.min_score),
            format!("-minIdentity={}", self.min_identity),
        ]
    }
}

impl ReferenceSearcher for Blat {
    fn search(
        &self,
        query: &ContigQuery,
        locus: &ReferenceLocus,
    ) -> Result<Vec<AlignmentHit>, Error> {
        fs::create_dir_all(query.work_dir).map_err(|e| Error::io(e, query.work_dir))?;
        let query_fa = query.work_dir.join(format!("{}.fa", query.id));
        let psl = query.work_dir.join(format!("{}_ref.psl", query.id));
        write_fasta(&query_fa, query.id, query.seq.as_bytes())?;

        let mut cmd = Command::new(&self.exe);
        cmd.args(["-t=dna", "-q=dna", "-stepSize=5", "-noHead", "-out=psl"])
            .args(self.filter_args())
            .arg(&locus.forward)
            .arg(&query_fa)
            .arg(&psl);
        run_tool("blat", &mut cmd)?;

        let mut hits = read_psl(&psl)?;
        for hit in &mut hits {
            // Target names are "chrom:start-end" windows
            hit.t_name = locus.chrom.clone();
            hit.t_offset = locus.start;
        }
        debug!("blat: {} hits for {}", hits.len(), query.id);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PSL: &str = "58\t2\t0\t0\t0\t0\t1\t30\t+\tcontig1\t60\t0\t60\tchr1:100-620\t520\t220\t310\t2\t30,30,\t0,30,\t220,280,";

    #[test]
    fn test_parse_psl_line() {
        let hit = parse_psl_line(PSL).unwrap();
        assert_eq!(hit.matches, 58);
        assert_eq!(hit.mismatches, 2);
        assert_eq!(hit.strand, Strand::Forward);
        assert_eq!(hit.q_name, "contig1");
        assert_eq!(hit.q_size, 60);
        assert_eq!(hit.t_start, 220);
        assert_eq!(hit.t_end, 310);
        assert_eq!(hit.block_sizes, vec![30, 30]);
        assert_eq!(hit.t_starts, vec![220, 280]);
        assert!((hit.identity() - 58.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_blat_identity_follows_threshold() {
        let blat = Blat::new("blat");
        assert_eq!(blat.filter_args()[1], "-minIdentity=90");
        let relaxed = Blat::new("blat").with_min_identity(0.75);
        assert_eq!(relaxed.min_identity, 75);
        assert_eq!(relaxed.filter_args(), ["-minScore=20", "-minIdentity=75"]);
        assert_eq!(Blat::new("blat").with_min_identity(0.9).min_identity, 90);
        assert_eq!(Blat::new("blat").with_min_identity(1.5).min_identity, 100);
    }

    #[test]
    fn test_parse_psl_rejects_short_line() {
        assert!(parse_psl_line("1\t2\t3").is_err());
    }

    #[test]
    fn test_parse_psl_block_count_mismatch() {
        let bad = PSL.replace("\t2\t30,30,", "\t3\t30,30,");
        assert!(parse_psl_line(&bad).is_err());
    }

    #[test]
    fn test_read_psl_missing_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(read_psl(&dir.path().join("none.psl")).unwrap().is_empty());
    }

    #[test]
    fn test_genomic_coordinates() {
        let mut hit = parse_psl_line(PSL).unwrap();
        hit.t_offset = 100;
        assert_eq!(hit.genomic_start(), 320);
        assert_eq!(hit.genomic_end(), 410);
    }
}
