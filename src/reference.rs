//! Reference sequence for a target locus.
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::kmer;

/// The reference window a target is analysed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLocus {
    pub chrom: String,
    /// 0-based genomic position of the first base in `forward`.
    pub start: i64,
    /// 0-based exclusive end.
    pub end: i64,
    /// Forward-strand FASTA of the window.
    pub forward: PathBuf,
    /// Reverse-complement FASTA of the window.
    pub reverse: PathBuf,
}

impl ReferenceLocus {
    pub fn fastas(&self) -> [&Path; 2] {
        [self.forward.as_path(), self.reverse.as_path()]
    }
}

pub trait RefseqExtractor: Send + Sync {
    /// Write `chrom:[start, end)` as forward and reverse-complement FASTA
    /// files and describe the resulting locus.
    fn extract(
        &self,
        chrom: &str,
        start: i64,
        end: i64,
        forward: &Path,
        reverse: &Path,
    ) -> Result<ReferenceLocus, Error>;
}

/// Write one FASTA record wrapped at 60 columns.
pub fn write_fasta(path: &Path, header: &str, seq: &[u8]) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, ">{}", header).map_err(|e| Error::io(e, path))?;
    for line in seq.chunks(60) {
        writer.write_all(line).map_err(|e| Error::io(e, path))?;
        writer.write_all(b"\n").map_err(|e| Error::io(e, path))?;
    }
    writer.flush().map_err(|e| Error::io(e, path))
}

/// Extraction from an indexed FASTA with htslib's faidx.
#[derive(Debug, Clone)]
pub struct FaidxExtractor {
    pub fasta: PathBuf,
}

impl FaidxExtractor {
    pub fn new(fasta: impl Into<PathBuf>) -> Self {
        FaidxExtractor {
            fasta: fasta.into(),
        }
    }
}

impl RefseqExtractor for FaidxExtractor {
    fn extract(
        &self,
        chrom: &str,
        start: i64,
        end: i64,
        forward: &Path,
        reverse: &Path,
    ) -> Result<ReferenceLocus, Error> {
        let reader = rust_htslib::faidx::Reader::from_path(&self.fasta)
            .map_err(|e| Error::htslib(e, &self.fasta))?;
        let start = start.max(0);
        // faidx end is inclusive and clamped to the contig length
        let seq = reader
            .fetch_seq_string(chrom, start as usize, (end - 1).max(start) as usize)
            .map_err(|e| Error::htslib(e, &self.fasta))?
            .to_ascii_uppercase();
        let end = start + seq.len() as i64;

        info!(
            "Extracted {} bp of reference {}:{}-{} from {}",
            seq.len(),
            chrom,
            start,
            end,
            self.fasta.display()
        );

        let header = format!("{}:{}-{}", chrom, start, end);
        write_fasta(forward, &header, seq.as_bytes())?;
        write_fasta(reverse, &header, &kmer::reverse_complement(seq.as_bytes()))?;

        Ok(ReferenceLocus {
            chrom: chrom.to_string(),
            start,
            end,
            forward: forward.to_path_buf(),
            reverse: reverse.to_path_buf(),
        })
    }
}
