//! Run configuration and the per-target directory layout derived from it.
use std::path::{Path, PathBuf};

use crate::calls::CallParams;
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Params {
    /// Root of `ref_data/`, `targets/` and `output/`.
    pub analysis_dir: PathBuf,
    pub targets_bed: PathBuf,
    pub sample_bam: PathBuf,
    pub normal_bam: Option<PathBuf>,
    /// Indexed reference FASTA (`.fai` alongside).
    pub reference_fasta: PathBuf,
    pub kmer_size: usize,
    /// Minimum distinct reads behind a contig.
    pub min_support: usize,
    /// Read fetch margin around each target.
    pub region_buffer: i64,
    pub min_indel_size: u32,
    pub min_segment_len: u32,
    pub min_identity: f64,
    pub min_coverage: f64,
    /// Normal count at which a sample k-mer is discarded.
    pub min_normal_count: u32,
    /// cutadapt executable; without it reads are used untrimmed.
    pub cutadapt: Option<PathBuf>,
    pub cutadapt_config: Option<PathBuf>,
    /// jellyfish executable; without it k-mers are counted in process.
    pub jellyfish: Option<PathBuf>,
    pub blat: PathBuf,
    /// Reuse existing reference window FASTA files.
    pub preset_ref_data: bool,
    pub threads: usize,
    /// JSON run summary.
    pub summary_path: Option<PathBuf>,
}

impl Default for Params {
    fn default() -> Self {
        let calls = CallParams::default();
        Params {
            analysis_dir: PathBuf::from("."),
            targets_bed: PathBuf::new(),
            sample_bam: PathBuf::new(),
            normal_bam: None,
            reference_fasta: PathBuf::new(),
            kmer_size: 15,
            min_support: 3,
            region_buffer: 200,
            min_indel_size: calls.min_indel_size,
            min_segment_len: calls.min_segment_len,
            min_identity: calls.min_identity,
            min_coverage: calls.min_coverage,
            min_normal_count: 1,
            cutadapt: None,
            cutadapt_config: None,
            jellyfish: None,
            blat: PathBuf::from("blat"),
            preset_ref_data: false,
            threads: 1,
            summary_path: None,
        }
    }
}

/// Directories used for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub ref_data: PathBuf,
    pub data: PathBuf,
    pub contigs: PathBuf,
    pub kmers: PathBuf,
    pub output: PathBuf,
}

impl TargetPaths {
    pub fn all(&self) -> [&Path; 5] {
        [
            self.ref_data.as_path(),
            self.data.as_path(),
            self.contigs.as_path(),
            self.kmers.as_path(),
            self.output.as_path(),
        ]
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), Error> {
        if self.kmer_size == 0 {
            return Err(Error::Parameter("kmer size must be positive".into()));
        }
        if self.min_support == 0 {
            return Err(Error::Parameter("minimum read support must be positive".into()));
        }
        if self.region_buffer < 0 {
            return Err(Error::Parameter("region buffer must not be negative".into()));
        }
        for (name, value) in [
            ("minimum identity", self.min_identity),
            ("minimum coverage", self.min_coverage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Parameter(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.min_normal_count == 0 {
            return Err(Error::Parameter("minimum normal count must be positive".into()));
        }
        if self.cutadapt.is_some() && self.cutadapt_config.is_none() {
            return Err(Error::Parameter(
                "cutadapt requires a configuration file".into(),
            ));
        }
        if self.threads == 0 {
            return Err(Error::Parameter("thread count must be positive".into()));
        }
        Ok(())
    }

    pub fn call_params(&self) -> CallParams {
        CallParams {
            min_indel_size: self.min_indel_size,
            min_segment_len: self.min_segment_len,
            min_identity: self.min_identity,
            min_coverage: self.min_coverage,
        }
    }

    pub fn target_paths(&self, target: &str) -> TargetPaths {
        let base = self.analysis_dir.join("targets").join(target);
        TargetPaths {
            ref_data: self.analysis_dir.join("ref_data").join(target),
            data: base.join("data"),
            contigs: base.join("contigs"),
            kmers: base.join("kmers"),
            output: self.analysis_dir.join("output").join(target),
        }
    }
}
