//! K-mer counting over FASTA/FASTQ files.
//!
//! Counting is reached through the [`KmerCounter`] trait so the pipeline can
//! shell out to jellyfish in production and count in-process elsewhere.
//! Both backends agree on the contract: a missing or sequence-free input
//! yields an empty map, and only a failed tool invocation is an error.
use ahash::AHashMap;
use log::debug;
use needletail::parse_fastx_file;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Error;
use crate::kmer;
use crate::process::run_tool;

/// Map from k-mer string to observed count.
pub type KmerCounts = AHashMap<String, u32>;

pub trait KmerCounter: Send + Sync {
    /// Count every k-mer of length `k` in `seq_file`.
    fn count_kmers(&self, seq_file: &Path, k: usize) -> Result<KmerCounts, Error>;
}

/// Whether `path` exists and holds at least one byte.
fn has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Load `kmer count` lines from a counter dump, adding into `counts`.
///
/// Counts for a k-mer seen in several dumps are summed, which is how the
/// forward and reverse reference strands are merged into one set. A missing
/// dump file contributes nothing.
pub fn load_kmers(path: &Path, counts: &mut KmerCounts) -> Result<(), Error> {
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, path))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (mer, count) = match (fields.next(), fields.next()) {
            (Some(mer), Some(count)) => (mer, count),
            _ => return Err(Error::parse(path, idx + 1, "expected '<kmer> <count>'")),
        };
        let count: u32 = count
            .parse()
            .map_err(|_| Error::parse(path, idx + 1, format!("bad count '{count}'")))?;
        *counts.entry(mer.to_string()).or_insert(0) += count;
    }
    Ok(())
}

/// Add every entry of `other` into `counts`.
pub fn merge_counts(counts: &mut KmerCounts, other: KmerCounts) {
    if counts.is_empty() {
        *counts = other;
        return;
    }
    for (mer, n) in other {
        *counts.entry(mer).or_insert(0) += n;
    }
}

/// External jellyfish counter (`count` followed by `dump`).
#[derive(Debug, Clone)]
pub struct Jellyfish {
    pub exe: PathBuf,
    pub threads: usize,
    pub hash_size: String,
}

impl Jellyfish {
    pub fn new(exe: impl Into<PathBuf>, threads: usize) -> Self {
        Jellyfish {
            exe: exe.into(),
            threads: threads.max(1),
            hash_size: "100M".to_string(),
        }
    }
}

impl KmerCounter for Jellyfish {
    fn count_kmers(&self, seq_file: &Path, k: usize) -> Result<KmerCounts, Error> {
        let mut counts = KmerCounts::new();
        if !has_content(seq_file) {
            debug!("No sequences in {}, skipping jellyfish", seq_file.display());
            return Ok(counts);
        }

        let jf_db = PathBuf::from(format!("{}_{}.jf", seq_file.display(), k));
        let dump = PathBuf::from(format!("{}_dump", seq_file.display()));

        let mut count_cmd = Command::new(&self.exe);
        count_cmd
            .arg("count")
            .args(["-m", &k.to_string()])
            .args(["-s", &self.hash_size])
            .args(["-t", &self.threads.to_string()])
            .arg("-o")
            .arg(&jf_db)
            .arg(seq_file);
        run_tool("jellyfish", &mut count_cmd)?;

        // jellyfish writes no database at all when nothing was counted
        if !jf_db.exists() {
            return Ok(counts);
        }

        let mut dump_cmd = Command::new(&self.exe);
        dump_cmd.args(["dump", "-c", "-t", "-o"]).arg(&dump).arg(&jf_db);
        run_tool("jellyfish", &mut dump_cmd)?;

        load_kmers(&dump, &mut counts)?;
        debug!(
            "jellyfish counted {} distinct {}-mers in {}",
            counts.len(),
            k,
            seq_file.display()
        );
        Ok(counts)
    }
}

/// In-process exact k-mer counter.
#[derive(Debug, Clone, Default)]
pub struct NativeCounter;

impl KmerCounter for NativeCounter {
    fn count_kmers(&self, seq_file: &Path, k: usize) -> Result<KmerCounts, Error> {
        let mut counts = KmerCounts::new();
        if !has_content(seq_file) {
            return Ok(counts);
        }

        let mut reader = parse_fastx_file(seq_file).map_err(|e| Error::Fastx {
            path: seq_file.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut n_records = 0u64;
        while let Some(record) = reader.next() {
            let record = record.map_err(|e| Error::Fastx {
                path: seq_file.to_path_buf(),
                message: e.to_string(),
            })?;
            n_records += 1;
            for mer in kmer::extract_kmers(&record.seq(), k) {
                *counts.entry(mer).or_insert(0) += 1;
            }
        }

        debug!(
            "Counted {} distinct {}-mers in {} records of {}",
            counts.len(),
            k,
            n_records,
            seq_file.display()
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_kmers_sums_across_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a_dump");
        let b = dir.path().join("b_dump");
        std::fs::write(&a, "ACG\t2\nCGT\t1\n").unwrap();
        std::fs::write(&b, "ACG 3\n\nTTT 4\n").unwrap();

        let mut counts = KmerCounts::new();
        load_kmers(&a, &mut counts).unwrap();
        load_kmers(&b, &mut counts).unwrap();

        assert_eq!(counts.len(), 3);
        assert_eq!(counts["ACG"], 5);
        assert_eq!(counts["CGT"], 1);
        assert_eq!(counts["TTT"], 4);
    }

    #[test]
    fn test_load_kmers_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut counts = KmerCounts::new();
        load_kmers(&dir.path().join("absent"), &mut counts).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_load_kmers_bad_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad_dump");
        std::fs::write(&path, "ACG\n").unwrap();
        let mut counts = KmerCounts::new();
        assert!(matches!(
            load_kmers(&path, &mut counts),
            Err(Error::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_native_counter_fasta() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seqs.fa");
        std::fs::write(&path, ">r1\nACGTA\n>r2\nacgNT\n").unwrap();

        let counts = NativeCounter.count_kmers(&path, 3).unwrap();
        // r1: ACG CGT GTA ; r2: ACG (CGN, GNT skipped)
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["ACG"], 2);
        assert_eq!(counts["CGT"], 1);
        assert_eq!(counts["GTA"], 1);
    }

    #[test]
    fn test_native_counter_fastq() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reads.fastq");
        std::fs::write(&path, "@r1\nAAAAC\n+\nIIIII\n").unwrap();
        let counts = NativeCounter.count_kmers(&path, 4).unwrap();
        assert_eq!(counts["AAAA"], 1);
        assert_eq!(counts["AAAC"], 1);
    }

    #[test]
    fn test_empty_or_missing_input_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let empty = dir.path().join("empty.fa");
        std::fs::write(&empty, "").unwrap();
        assert!(NativeCounter.count_kmers(&empty, 5).unwrap().is_empty());
        assert!(NativeCounter
            .count_kmers(&dir.path().join("missing.fa"), 5)
            .unwrap()
            .is_empty());

        // jellyfish is never invoked for an empty input, even if absent
        let jf = Jellyfish::new("/nonexistent/jellyfish", 1);
        assert!(jf.count_kmers(&empty, 5).unwrap().is_empty());
    }

    #[test]
    fn test_jellyfish_missing_binary_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seqs.fa");
        std::fs::write(&path, ">r1\nACGTACGT\n").unwrap();
        let jf = Jellyfish::new("/nonexistent/jellyfish", 1);
        assert!(matches!(
            jf.count_kmers(&path, 5),
            Err(Error::Tool { .. })
        ));
    }

    #[test]
    fn test_merge_counts() {
        let mut a = KmerCounts::new();
        a.insert("AAA".into(), 1);
        let mut b = KmerCounts::new();
        b.insert("AAA".into(), 2);
        b.insert("CCC".into(), 1);
        merge_counts(&mut a, b);
        assert_eq!(a["AAA"], 3);
        assert_eq!(a["CCC"], 1);
    }
}
