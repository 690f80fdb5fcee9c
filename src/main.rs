use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use kmer_sv::params::Params;

/// Targeted structural variant discovery via sample-specific k-mers.
///
/// Extracts reads with breakpoint evidence around each target region,
/// assembles k-mers absent from the reference (and from a matched normal)
/// into contigs, and aligns the contigs back to the reference to call SVs.
#[derive(Parser, Debug)]
#[command(name = "kmer-sv", version, about)]
struct Cli {
    /// BED file of target intervals (chrom, start, end, name)
    #[arg(long)]
    targets: PathBuf,

    /// Sample BAM/CRAM file (indexed)
    #[arg(long)]
    sample: PathBuf,

    /// Matched normal BAM/CRAM file (indexed)
    #[arg(long)]
    normal: Option<PathBuf>,

    /// Reference FASTA with .fai index
    #[arg(long = "ref-fasta", short = 'r')]
    ref_fasta: PathBuf,

    /// Analysis directory for reference data, intermediates and output
    #[arg(long = "analysis-dir", short = 'o', default_value = ".")]
    analysis_dir: PathBuf,

    /// K-mer size
    #[arg(long = "kmer-size", short = 'k', default_value = "15")]
    kmer_size: usize,

    /// Minimum distinct reads supporting a contig
    #[arg(long = "min-support", default_value = "3")]
    min_support: usize,

    /// Bases added on each side of a target when fetching reads
    #[arg(long = "region-buffer", default_value = "200")]
    region_buffer: i64,

    /// Minimum deletion/insertion size to report
    #[arg(long = "min-indel-size", default_value = "15")]
    min_indel_size: u32,

    /// Minimum contig segment length considered in a reference hit
    #[arg(long = "min-segment-len", default_value = "20")]
    min_segment_len: u32,

    /// Minimum identity of a reference hit
    #[arg(long = "min-identity", default_value = "0.90")]
    min_identity: f64,

    /// Fraction of a contig that its hits must cover
    #[arg(long = "min-coverage", default_value = "0.90")]
    min_coverage: f64,

    /// Normal count at which a sample k-mer is discarded
    #[arg(long = "min-normal-count", default_value = "1")]
    min_normal_count: u32,

    /// cutadapt executable (reads are used untrimmed without it)
    #[arg(long)]
    cutadapt: Option<PathBuf>,

    /// cutadapt configuration file of command-line options
    #[arg(long = "cutadapt-config")]
    cutadapt_config: Option<PathBuf>,

    /// jellyfish executable (k-mers are counted in process without it)
    #[arg(long)]
    jellyfish: Option<PathBuf>,

    /// blat executable
    #[arg(long, default_value = "blat")]
    blat: PathBuf,

    /// Reuse reference window FASTA files already in the analysis directory
    #[arg(long = "preset-ref-data", default_value = "false")]
    preset_ref_data: bool,

    /// Number of targets analysed in parallel
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Output summary JSON file
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    info!("kmer-sv v{}", env!("CARGO_PKG_VERSION"));
    info!("K-mer size: {}", cli.kmer_size);

    let params = Params {
        analysis_dir: cli.analysis_dir,
        targets_bed: cli.targets,
        sample_bam: cli.sample,
        normal_bam: cli.normal,
        reference_fasta: cli.ref_fasta,
        kmer_size: cli.kmer_size,
        min_support: cli.min_support,
        region_buffer: cli.region_buffer,
        min_indel_size: cli.min_indel_size,
        min_segment_len: cli.min_segment_len,
        min_identity: cli.min_identity,
        min_coverage: cli.min_coverage,
        min_normal_count: cli.min_normal_count,
        cutadapt: cli.cutadapt,
        cutadapt_config: cli.cutadapt_config,
        jellyfish: cli.jellyfish,
        blat: cli.blat,
        preset_ref_data: cli.preset_ref_data,
        threads: cli.threads,
        summary_path: cli.summary,
    };

    kmer_sv::run(&params)?;

    Ok(())
}
