//! Targeted structural variant discovery.
//!
//! For each target region, reads carrying breakpoint evidence are pulled
//! from the sample alignments, k-mers found in the sample but not in the
//! reference (or a matched normal) are clustered into contigs, and contigs
//! are aligned back to the reference to call deletions, insertions,
//! inversions, tandem duplications and translocations.
pub mod assembly;
pub mod calls;
pub mod clean;
pub mod contig;
pub mod counter;
pub mod differ;
pub mod error;
pub mod extract;
pub mod kmer;
pub mod metrics;
pub mod params;
pub mod process;
pub mod reference;
pub mod resolve;
pub mod search;
pub mod target;
pub mod targets;

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use std::fs;
use std::time::Instant;

use crate::metrics::{write_summary, RunSummary, TargetReport};
use crate::params::Params;
use crate::target::{TargetManager, TargetOutcome, Toolkit};

/// Analyse every target in the BED file with the default toolkit.
pub fn run(params: &Params) -> Result<RunSummary> {
    run_with(params, &Toolkit::from_params(params))
}

/// Analyse every target with the given collaborators. Targets run in
/// parallel; a failing target is reported in the summary and does not stop
/// the others.
pub fn run_with(params: &Params, tools: &Toolkit) -> Result<RunSummary> {
    let start_time = Instant::now();
    params.validate()?;

    fs::create_dir_all(&params.analysis_dir).with_context(|| {
        format!(
            "creating analysis directory {}",
            params.analysis_dir.display()
        )
    })?;

    info!("Reading targets from {}", params.targets_bed.display());
    let targets = targets::load_targets(&params.targets_bed)?;
    info!("Loaded {} targets", targets.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()
        .context("building thread pool")?;

    let reports: Vec<TargetReport> = pool.install(|| {
        targets
            .into_par_iter()
            .map(|region| {
                let mut manager = TargetManager::new(region, params, tools);
                info!("Analysing target {}", manager.name());
                let outcome = manager.run();
                TargetReport::new(&manager.region, outcome)
            })
            .collect()
    });

    let mut summary = RunSummary::new(params.kmer_size, reports);
    summary.runtime_seconds = start_time.elapsed().as_secs_f64();

    for report in &summary.targets {
        if let TargetOutcome::Failed { stage, message } = &report.outcome {
            warn!("Target {} failed during {}: {}", report.name, stage, message);
        }
    }
    info!(
        "Done: {} calls in {} of {} targets ({} failed) in {:.1}s",
        summary.total_calls,
        summary.targets_with_calls,
        summary.total_targets,
        summary.failed_targets,
        summary.runtime_seconds
    );

    if let Some(path) = &params.summary_path {
        write_summary(path, &summary)?;
        info!("Run summary written to {}", path.display());
    }
    Ok(summary)
}
