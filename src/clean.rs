//! Adapter trimming of extracted reads and re-association of the trimmed
//! FASTQ with the extracted read records.
use ahash::AHashMap;
use log::{debug, info};
use needletail::parse_fastx_file;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Error;
use crate::extract::{ExtractedReads, ReadRecord};
use crate::process::run_tool;

pub trait ReadCleaner: Send + Sync {
    /// Trim `input` FASTQ into `output` FASTQ.
    fn clean(&self, input: &Path, output: &Path) -> Result<(), Error>;
}

/// cutadapt driven by a configuration file of command-line options.
///
/// Each non-empty, non-comment line of the configuration file contributes
/// its whitespace-separated tokens as arguments, e.g. `-a AGATCGGAAGAGC`.
#[derive(Debug, Clone)]
pub struct Cutadapt {
    pub exe: PathBuf,
    pub config: PathBuf,
}

impl Cutadapt {
    pub fn new(exe: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Cutadapt {
            exe: exe.into(),
            config: config.into(),
        }
    }

    fn config_args(&self) -> Result<Vec<String>, Error> {
        let text = fs::read_to_string(&self.config).map_err(|e| Error::io(e, &self.config))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .flat_map(|l| l.split_whitespace().map(str::to_string))
            .collect())
    }
}

impl ReadCleaner for Cutadapt {
    fn clean(&self, input: &Path, output: &Path) -> Result<(), Error> {
        info!(
            "Cleaning reads using {} with configuration file {}",
            self.exe.display(),
            self.config.display()
        );
        let mut cmd = Command::new(&self.exe);
        cmd.args(self.config_args()?).arg("-o").arg(output).arg(input);
        let out = run_tool("cutadapt", &mut cmd)?;
        debug!("cutadapt: {}", String::from_utf8_lossy(&out.stdout).trim());
        Ok(())
    }
}

/// No trimming: the extracted reads are used as they are.
#[derive(Debug, Clone, Default)]
pub struct PassthroughCleaner;

impl ReadCleaner for PassthroughCleaner {
    fn clean(&self, input: &Path, output: &Path) -> Result<(), Error> {
        fs::copy(input, output).map_err(|e| Error::io(e, output))?;
        Ok(())
    }
}

/// Read the cleaned FASTQ back and match every record to its extracted read.
///
/// A read is dropped when trimming removed its soft-clipped bases (the clip
/// no longer occurs in the cleaned sequence) or when it is now shorter than
/// `k`. Returns the surviving records, in cleaned-file order, and the
/// longest cleaned read length.
pub fn load_cleaned_reads(
    cleaned_fq: &Path,
    extracted: &ExtractedReads,
    k: usize,
) -> Result<(Vec<ReadRecord>, usize), Error> {
    let empty = fs::metadata(cleaned_fq).map(|m| m.len() == 0).unwrap_or(true);
    if empty {
        return Ok((Vec::new(), 0));
    }

    let by_id: AHashMap<&str, &ReadRecord> = extracted
        .reads
        .iter()
        .map(|r| (r.id.as_str(), r))
        .collect();

    let mut reader = parse_fastx_file(cleaned_fq).map_err(|e| Error::Fastx {
        path: cleaned_fq.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut cleaned = Vec::new();
    let mut read_len = 0usize;
    let mut dropped = 0usize;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| Error::Fastx {
            path: cleaned_fq.to_path_buf(),
            message: e.to_string(),
        })?;

        let header = String::from_utf8_lossy(record.id());
        let id = header.split_whitespace().next().unwrap_or_default();
        let Some(original) = by_id.get(id) else {
            dropped += 1;
            continue;
        };

        let seq = String::from_utf8_lossy(&record.seq()).to_ascii_uppercase();
        if seq.len() < k || (!original.clip_seq.is_empty() && !seq.contains(&original.clip_seq))
        {
            dropped += 1;
            continue;
        }

        let qual = record
            .qual()
            .map(|q| q.to_vec())
            .unwrap_or_else(|| vec![b'I'; seq.len()]);
        read_len = read_len.max(seq.len());
        cleaned.push(ReadRecord {
            id: original.id.clone(),
            name: original.name.clone(),
            seq,
            qual,
            clip_seq: original.clip_seq.clone(),
            unmapped: original.unmapped,
        });
    }

    debug!(
        "{} cleaned reads kept, {} dropped from {}",
        cleaned.len(),
        dropped,
        cleaned_fq.display()
    );
    Ok((cleaned, read_len))
}
