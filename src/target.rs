//! Per-target analysis: the stage sequence that takes one target region from
//! alignments to structural variant calls.
//!
//! Every target owns its reads, k-mer sets, contigs and results outright, so
//! targets can be processed in parallel without sharing state. A target that
//! fails, or finds nothing, leaves no output directory behind.
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::assembly::{write_clusters, Clusterer, KmerClusterer};
use crate::calls::SvResult;
use crate::clean::{load_cleaned_reads, Cutadapt, PassthroughCleaner, ReadCleaner};
use crate::contig::{write_results_atomic, Contig};
use crate::counter::{merge_counts, Jellyfish, KmerCounter, NativeCounter};
use crate::differ::{KmerSets, SampleKmers};
use crate::error::Error;
use crate::extract::{
    write_fastq_records, BamReadSource, ExtractRequest, ExtractedReads, ReadRecord, ReadSource,
};
use crate::params::{Params, TargetPaths};
use crate::reference::{FaidxExtractor, ReferenceLocus, RefseqExtractor};
use crate::resolve::{aggregate_path, ContigResolver};
use crate::search::{Blat, ReferenceSearcher};
use crate::targets::TargetRegion;

/// The two kinds of sample a target can draw reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Sample,
    Normal,
}

impl SampleKind {
    pub const ALL: [SampleKind; 2] = [SampleKind::Sample, SampleKind::Normal];

    /// Label used in intermediate file names.
    pub fn label(self) -> &'static str {
        match self {
            SampleKind::Sample => "sv",
            SampleKind::Normal => "norm",
        }
    }

    /// Whether every run has this kind.
    pub fn required(self) -> bool {
        matches!(self, SampleKind::Sample)
    }

    /// Whether the variant reads of this kind are kept as a BAM subset.
    pub fn writes_subset(self) -> bool {
        matches!(self, SampleKind::Sample)
    }

    fn index(self) -> usize {
        match self {
            SampleKind::Sample => 0,
            SampleKind::Normal => 1,
        }
    }
}

#[derive(Debug, Default)]
struct KindState {
    sv_reads: Option<ExtractedReads>,
    cleaned: Option<Vec<ReadRecord>>,
}

/// Aggregate per-target state, held separately for each sample kind so one
/// kind's reads can be released without touching the other's.
#[derive(Debug, Default)]
pub struct Variation {
    kinds: [KindState; 2],
    pub kmer_clusters: Vec<Contig>,
    pub results: Vec<SvResult>,
}

impl Variation {
    /// Start a kind afresh with its extracted reads.
    pub fn setup(&mut self, kind: SampleKind, reads: ExtractedReads) {
        self.kinds[kind.index()] = KindState {
            sv_reads: Some(reads),
            cleaned: None,
        };
    }

    pub fn sv_reads(&self, kind: SampleKind) -> Option<&ExtractedReads> {
        self.kinds[kind.index()].sv_reads.as_ref()
    }

    pub fn clear_sv_reads(&mut self, kind: SampleKind) {
        self.kinds[kind.index()].sv_reads = None;
    }

    pub fn set_cleaned_reads(&mut self, kind: SampleKind, reads: Vec<ReadRecord>) {
        self.kinds[kind.index()].cleaned = Some(reads);
    }

    pub fn cleaned_reads(&self, kind: SampleKind) -> &[ReadRecord] {
        self.kinds[kind.index()].cleaned.as_deref().unwrap_or(&[])
    }

    /// Drop the cleaned reads of every kind.
    pub fn clear_cleaned_reads(&mut self) {
        for state in &mut self.kinds {
            state.cleaned = None;
        }
    }

    /// Whether any cleaned reads of `kind` remain to analyse.
    pub fn continue_analysis_check(&self, kind: SampleKind) -> bool {
        !self.cleaned_reads(kind).is_empty()
    }

    pub fn add_result(&mut self, result: SvResult) {
        self.results.push(result);
    }
}

/// The collaborators a target analysis runs on. Shared between targets;
/// none of them keeps per-target state.
pub struct Toolkit {
    pub reads: Box<dyn ReadSource>,
    pub cleaner: Box<dyn ReadCleaner>,
    pub counter: Box<dyn KmerCounter>,
    pub reference: Box<dyn RefseqExtractor>,
    pub clusterer: Box<dyn Clusterer>,
    pub searcher: Box<dyn ReferenceSearcher>,
}

impl Toolkit {
    pub fn from_params(params: &Params) -> Self {
        let cleaner: Box<dyn ReadCleaner> = match (&params.cutadapt, &params.cutadapt_config) {
            (Some(exe), Some(config)) => Box::new(Cutadapt::new(exe, config)),
            _ => Box::new(PassthroughCleaner),
        };
        // Targets already run in parallel, so each tool gets one thread
        let counter: Box<dyn KmerCounter> = match &params.jellyfish {
            Some(exe) => Box::new(Jellyfish::new(exe, 1)),
            None => Box::new(NativeCounter),
        };
        Toolkit {
            reads: Box::new(BamReadSource::new(1)),
            cleaner,
            counter,
            reference: Box::new(FaidxExtractor::new(&params.reference_fasta)),
            clusterer: Box::new(KmerClusterer),
            searcher: Box::new(Blat::new(&params.blat).with_min_identity(params.min_identity)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    ReferenceData,
    Extract(SampleKind),
    Clean(SampleKind),
    KmerDifference,
    Cluster,
    Resolve,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::ReferenceData => write!(f, "reference data"),
            Stage::Extract(kind) => write!(f, "{} read extraction", kind.label()),
            Stage::Clean(kind) => write!(f, "{} read cleaning", kind.label()),
            Stage::KmerDifference => write!(f, "kmer differencing"),
            Stage::Cluster => write!(f, "clustering"),
            Stage::Resolve => write!(f, "contig resolution"),
            Stage::Finalize => write!(f, "finalize"),
        }
    }
}

/// How a target's analysis ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    /// No sample reads survived extraction and cleaning.
    NothingToAnalyze,
    NoFindings,
    Findings { calls: usize },
    Failed { stage: Stage, message: String },
}

pub struct TargetManager<'a> {
    params: &'a Params,
    tools: &'a Toolkit,
    pub region: TargetRegion,
    paths: TargetPaths,
    /// Sample kinds taking part, fixed at construction.
    kinds: Vec<SampleKind>,
    read_len: usize,
    locus: Option<ReferenceLocus>,
    variation: Variation,
}

impl<'a> TargetManager<'a> {
    pub fn new(region: TargetRegion, params: &'a Params, tools: &'a Toolkit) -> Self {
        let paths = params.target_paths(&region.name);
        let kinds = SampleKind::ALL
            .into_iter()
            .filter(|k| k.required() || params.normal_bam.is_some())
            .collect();
        TargetManager {
            params,
            tools,
            region,
            paths,
            kinds,
            read_len: 0,
            locus: None,
            variation: Variation::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.region.name
    }

    pub fn paths(&self) -> &TargetPaths {
        &self.paths
    }

    pub fn results(&self) -> &[SvResult] {
        &self.variation.results
    }

    fn has_normal(&self) -> bool {
        self.kinds.contains(&SampleKind::Normal)
    }

    fn data_file(&self, suffix: &str) -> PathBuf {
        self.paths.data.join(format!("{}_{}", self.region.name, suffix))
    }

    fn reads_fq(&self, kind: SampleKind) -> PathBuf {
        self.data_file(&format!("{}_reads.fastq", kind.label()))
    }

    fn sc_fa(&self, kind: SampleKind) -> PathBuf {
        self.data_file(&format!("{}_sc_seqs.fa", kind.label()))
    }

    fn cleaned_fq(&self, kind: SampleKind) -> PathBuf {
        self.data_file(&format!("{}_reads_cleaned.fastq", kind.label()))
    }

    fn sv_bam_sorted(&self) -> PathBuf {
        self.data_file("sv_reads.sorted.bam")
    }

    pub fn sample_kmers_file(&self) -> PathBuf {
        self.paths
            .kmers
            .join(format!("{}_sample_kmers.out", self.region.name))
    }

    pub fn kmer_clusters_file(&self) -> PathBuf {
        self.paths
            .kmers
            .join(format!("{}_sample_kmers_merged.out", self.region.name))
    }

    fn ref_fastas(&self) -> (PathBuf, PathBuf) {
        (
            self.paths
                .ref_data
                .join(format!("{}_forward_refseq.fa", self.region.name)),
            self.paths
                .ref_data
                .join(format!("{}_reverse_refseq.fa", self.region.name)),
        )
    }

    fn bam_for(&self, kind: SampleKind) -> Result<&'a Path, Error> {
        match kind {
            SampleKind::Sample => Ok(self.params.sample_bam.as_path()),
            SampleKind::Normal => self.params.normal_bam.as_deref().ok_or_else(|| {
                Error::Parameter("no normal alignment file configured".to_string())
            }),
        }
    }

    /// Run every stage. Failures end this target only.
    pub fn run(&mut self) -> TargetOutcome {
        let mut stage = Stage::Setup;
        match self.run_stages(&mut stage) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: {} failed: {}", self.region.name, stage, e);
                self.rm_output_dir();
                TargetOutcome::Failed {
                    stage,
                    message: e.to_string(),
                }
            }
        }
    }

    fn run_stages(&mut self, stage: &mut Stage) -> Result<TargetOutcome, Error> {
        *stage = Stage::Setup;
        self.setup()?;

        *stage = Stage::ReferenceData;
        self.set_ref_data()?;

        if !self.find_sv_reads(stage)? {
            info!("{}: no cleaned sample reads, nothing to analyze", self.region.name);
            return Ok(TargetOutcome::NothingToAnalyze);
        }

        *stage = Stage::KmerDifference;
        let kmers = self.compare_kmers()?;

        *stage = Stage::Cluster;
        self.cluster_kmers(kmers)?;

        *stage = Stage::Resolve;
        self.resolve_sv()?;

        *stage = Stage::Finalize;
        self.complete_analysis()
    }

    /// Create the target's directories and record the reference in use.
    fn setup(&self) -> Result<(), Error> {
        for dir in self.paths.all() {
            debug!("{}: creating {}", self.region.name, dir.display());
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;
        }
        let marker = self.paths.ref_data.join(".reference_fasta");
        fs::write(
            &marker,
            self.params.reference_fasta.to_string_lossy().as_bytes(),
        )
        .map_err(|e| Error::io(e, &marker))
    }

    /// Write the reference window FASTA files, or reuse existing ones.
    fn set_ref_data(&mut self) -> Result<(), Error> {
        let (forward, reverse) = self.ref_fastas();
        let (start, end) = self.region.padded(self.params.region_buffer);

        let locus = if self.params.preset_ref_data && forward.exists() && reverse.exists() {
            info!(
                "{}: using preset reference data in {}",
                self.region.name,
                self.paths.ref_data.display()
            );
            ReferenceLocus {
                chrom: self.region.chrom.clone(),
                start,
                end,
                forward,
                reverse,
            }
        } else {
            info!(
                "{}: extracting reference sequence to {}",
                self.region.name,
                forward.display()
            );
            self.tools
                .reference
                .extract(&self.region.chrom, start, end, &forward, &reverse)?
        };
        self.locus = Some(locus);
        Ok(())
    }

    /// Extract and clean reads for every configured kind. Returns whether any
    /// cleaned sample reads remain; when none do, the output directory is
    /// removed.
    fn find_sv_reads(&mut self, stage: &mut Stage) -> Result<bool, Error> {
        *stage = Stage::Extract(SampleKind::Sample);
        self.extract_bam_reads(SampleKind::Sample)?;

        if self.has_normal() {
            *stage = Stage::Extract(SampleKind::Normal);
            self.extract_bam_reads(SampleKind::Normal)?;
            *stage = Stage::Clean(SampleKind::Normal);
            self.clean_reads(SampleKind::Normal)?;
        }

        *stage = Stage::Clean(SampleKind::Sample);
        if !self.clean_reads(SampleKind::Sample)? {
            self.rm_output_dir();
            return Ok(false);
        }
        Ok(true)
    }

    fn extract_bam_reads(&mut self, kind: SampleKind) -> Result<(), Error> {
        let bam = self.bam_for(kind)?;
        let reads_fq = self.reads_fq(kind);
        let sc_fa = self.sc_fa(kind);
        let subset = kind.writes_subset().then(|| self.sv_bam_sorted());
        let (fetch_start, fetch_end) = self.region.padded(self.params.region_buffer);

        info!(
            "{}: extracting {} reads from {} to {}",
            self.region.name,
            kind.label(),
            bam.display(),
            reads_fq.display()
        );
        let request = ExtractRequest {
            bam,
            chrom: &self.region.chrom,
            fetch_start,
            fetch_end,
            target_start: self.region.start,
            target_end: self.region.end,
            kmer_size: self.params.kmer_size,
            subset_bam: subset.as_deref(),
        };
        let extracted = self.tools.reads.extract(&request)?;
        extracted.write_seqs(&reads_fq, &sc_fa)?;
        info!(
            "{}: {} {} reads with variant evidence",
            self.region.name,
            extracted.len(),
            kind.label()
        );
        self.variation.setup(kind, extracted);
        Ok(())
    }

    /// Trim the extracted reads of `kind` and keep those whose clipped
    /// evidence survived. Returns whether any cleaned reads remain.
    fn clean_reads(&mut self, kind: SampleKind) -> Result<bool, Error> {
        let reads_fq = self.reads_fq(kind);
        let cleaned_fq = self.cleaned_fq(kind);
        let (cleaned, read_len) = match self.variation.sv_reads(kind) {
            Some(extracted) if !extracted.is_empty() => {
                match self.tools.cleaner.clean(&reads_fq, &cleaned_fq) {
                    Ok(()) => load_cleaned_reads(&cleaned_fq, extracted, self.params.kmer_size)?,
                    Err(e) => {
                        warn!(
                            "{}: cleaning {} reads failed, continuing without them: {}",
                            self.region.name,
                            kind.label(),
                            e
                        );
                        (Vec::new(), 0)
                    }
                }
            }
            _ => (Vec::new(), 0),
        };
        // The counter sees exactly the reads that survived
        write_fastq_records(&cleaned_fq, &cleaned)?;

        if kind == SampleKind::Sample {
            self.read_len = read_len;
        }
        self.variation.clear_sv_reads(kind);
        self.variation.set_cleaned_reads(kind, cleaned);

        let check = self.variation.continue_analysis_check(kind);
        info!(
            "{}: {} cleaned {} reads in {}",
            self.region.name,
            self.variation.cleaned_reads(kind).len(),
            kind.label(),
            cleaned_fq.display()
        );
        Ok(check)
    }

    /// Count the k-mer sets and reduce them to the sample-specific set,
    /// written to `<target>_sample_kmers.out`.
    fn compare_kmers(&self) -> Result<SampleKmers, Error> {
        let k = self.params.kmer_size;
        let counter = self.tools.counter.as_ref();
        let locus = self
            .locus
            .as_ref()
            .ok_or_else(|| Error::Parameter("reference data not prepared".to_string()))?;

        let mut sets = KmerSets::default();
        for fasta in locus.fastas() {
            info!("{}: indexing kmers for {}", self.region.name, fasta.display());
            merge_counts(&mut sets.reference, counter.count_kmers(fasta, k)?);
        }
        sets.sample = counter.count_kmers(&self.cleaned_fq(SampleKind::Sample), k)?;
        sets.clipped = counter.count_kmers(&self.sc_fa(SampleKind::Sample), k)?;
        if self.has_normal() {
            sets.normal = Some(counter.count_kmers(&self.cleaned_fq(SampleKind::Normal), k)?);
        }
        debug!(
            "{}: {} reference, {} sample, {} clipped kmers",
            self.region.name,
            sets.reference.len(),
            sets.sample.len(),
            sets.clipped.len()
        );

        let specific = sets.sample_specific(self.params.min_normal_count);
        specific.write(&self.sample_kmers_file())?;
        Ok(specific)
    }

    /// Cluster the sample-specific k-mers into contigs and release the reads.
    fn cluster_kmers(&mut self, kmers: SampleKmers) -> Result<(), Error> {
        let clusters_file = self.kmer_clusters_file();
        info!(
            "{}: writing kmer clusters to {}",
            self.region.name,
            clusters_file.display()
        );
        let contigs = self.tools.clusterer.cluster(
            &kmers,
            self.variation.cleaned_reads(SampleKind::Sample),
            self.params.kmer_size,
            self.params.min_support,
            self.read_len,
        );
        drop(kmers);
        write_clusters(&clusters_file, &contigs)?;

        self.variation.clear_cleaned_reads();
        self.variation.kmer_clusters = contigs;
        Ok(())
    }

    fn resolve_sv(&mut self) -> Result<(), Error> {
        let locus = self
            .locus
            .as_ref()
            .ok_or_else(|| Error::Parameter("reference data not prepared".to_string()))?;
        let clusters_file = self.kmer_clusters_file();
        let sv_bam = self.sv_bam_sorted();
        let call_params = self.params.call_params();
        info!(
            "{}: resolving structural variants from {} kmer clusters",
            self.region.name,
            self.variation.kmer_clusters.len()
        );

        let resolver = ContigResolver {
            region: &self.region,
            locus,
            out_dir: &self.paths.output,
            work_dir: &self.paths.contigs,
            kmer_cluster_file: &clusters_file,
            sv_reads_bam: &sv_bam,
            searcher: self.tools.searcher.as_ref(),
            reads: self.tools.reads.as_ref(),
            params: &call_params,
        };
        let mut contigs = std::mem::take(&mut self.variation.kmer_clusters);
        let results = resolver.resolve(&mut contigs)?;
        for result in results {
            self.variation.add_result(result);
        }
        self.variation.kmer_clusters = contigs;
        Ok(())
    }

    /// Write `<target>_svs.out`, or remove the output directory when there
    /// is nothing to report.
    fn complete_analysis(&mut self) -> Result<TargetOutcome, Error> {
        let results = &self.variation.results;
        if results.is_empty() {
            info!("{}: no structural variants found", self.region.name);
            self.rm_output_dir();
            return Ok(TargetOutcome::NoFindings);
        }
        let path = aggregate_path(&self.paths.output, &self.region.name);
        write_results_atomic(&path, results)?;
        info!(
            "{}: wrote {} structural variant calls to {}",
            self.region.name,
            results.len(),
            path.display()
        );
        Ok(TargetOutcome::Findings {
            calls: results.len(),
        })
    }

    fn rm_output_dir(&self) {
        match fs::remove_dir_all(&self.paths.output) {
            Ok(()) => debug!("{}: removed {}", self.region.name, self.paths.output.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "{}: could not remove {}: {}",
                self.region.name,
                self.paths.output.display(),
                e
            ),
        }
    }
}
