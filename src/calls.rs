//! Structural variant calls derived from contig alignments.
//!
//! A contig aligned end-to-end in one gapped hit yields an indel; a contig
//! split across several hits yields a rearrangement typed by the first
//! junction between consecutive segments.
use std::fmt;

use serde::Serialize;

use crate::search::{AlignmentHit, Strand};

/// Hits may overlap on the contig by at most this many bases and still be
/// chained as separate segments.
const MAX_SEGMENT_OVERLAP: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SvType {
    Deletion,
    Insertion,
    Inversion,
    TandemDuplication,
    Translocation,
}

impl fmt::Display for SvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvType::Deletion => write!(f, "DEL"),
            SvType::Insertion => write!(f, "INS"),
            SvType::Inversion => write!(f, "INV"),
            SvType::TandemDuplication => write!(f, "DUP"),
            SvType::Translocation => write!(f, "TRA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub chrom: String,
    pub pos: i64,
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chrom, self.pos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvCall {
    pub sv_type: SvType,
    pub breakpoints: Vec<Breakpoint>,
    /// Event size in bp; none for translocations.
    pub size: Option<u64>,
    /// Strand of each aligned segment, e.g. "+" or "+,-".
    pub strands: String,
    /// Number of reference segments the contig was split into.
    pub segments: usize,
}

/// Thresholds for turning hits into calls.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub min_indel_size: u32,
    pub min_segment_len: u32,
    pub min_identity: f64,
    /// Fraction of the contig that must be explained by the alignment.
    pub min_coverage: f64,
}

impl Default for CallParams {
    fn default() -> Self {
        CallParams {
            min_indel_size: 15,
            min_segment_len: 20,
            min_identity: 0.90,
            min_coverage: 0.90,
        }
    }
}

/// Derive at most one call from the hits of a contig of `contig_len` bases.
pub fn derive_call(
    hits: &[AlignmentHit],
    contig_len: usize,
    params: &CallParams,
) -> Option<SvCall> {
    if contig_len == 0 {
        return None;
    }

    let mut usable: Vec<&AlignmentHit> = hits
        .iter()
        .filter(|h| h.identity() >= params.min_identity && h.q_span() >= params.min_segment_len)
        .collect();
    if usable.is_empty() {
        return None;
    }
    usable.sort_by(|a, b| {
        b.score()
            .cmp(&a.score())
            .then(a.q_start.cmp(&b.q_start))
            .then(a.genomic_start().cmp(&b.genomic_start()))
    });

    let best = usable[0];
    if best.q_span() as f64 >= contig_len as f64 * params.min_coverage {
        return indel_call(best, params);
    }
    rearrangement_call(&usable, contig_len, params)
}

/// Largest gap within a single gapped hit.
fn indel_call(hit: &AlignmentHit, params: &CallParams) -> Option<SvCall> {
    let mut best: Option<(SvType, i64, i64, u64)> = None;

    for i in 1..hit.block_sizes.len() {
        let prev_t_end = hit.t_starts[i - 1] + hit.block_sizes[i - 1];
        let prev_q_end = hit.q_starts[i - 1] + hit.block_sizes[i - 1];
        let t_gap = hit.t_starts[i].saturating_sub(prev_t_end);
        let q_gap = hit.q_starts[i].saturating_sub(prev_q_end);
        let left = hit.t_offset + prev_t_end as i64;

        let candidate = if t_gap >= q_gap && t_gap >= params.min_indel_size {
            Some((SvType::Deletion, left, hit.t_offset + hit.t_starts[i] as i64, t_gap as u64))
        } else if q_gap > t_gap && q_gap >= params.min_indel_size {
            Some((SvType::Insertion, left, left + t_gap as i64, q_gap as u64))
        } else {
            None
        };

        if let Some(c) = candidate {
            if best.as_ref().map_or(true, |b| c.3 > b.3) {
                best = Some(c);
            }
        }
    }

    best.map(|(sv_type, left, right, size)| SvCall {
        sv_type,
        breakpoints: vec![
            Breakpoint { chrom: hit.t_name.clone(), pos: left },
            Breakpoint { chrom: hit.t_name.clone(), pos: right },
        ],
        size: Some(size),
        strands: hit.strand.symbol().to_string(),
        segments: 1,
    })
}

/// Chain non-overlapping hits along the contig and type the first junction.
fn rearrangement_call(
    ranked: &[&AlignmentHit],
    contig_len: usize,
    params: &CallParams,
) -> Option<SvCall> {
    let mut chosen: Vec<&AlignmentHit> = Vec::new();
    for &hit in ranked {
        let overlaps = chosen.iter().any(|c| {
            let overlap = hit.q_end.min(c.q_end) as i64 - hit.q_start.max(c.q_start) as i64;
            overlap > MAX_SEGMENT_OVERLAP as i64
        });
        if !overlaps {
            chosen.push(hit);
        }
    }
    if chosen.len() < 2 {
        return None;
    }
    chosen.sort_by_key(|h| (h.q_start, h.q_end));

    let covered: u32 = chosen.iter().map(|h| h.q_span()).sum::<u32>().min(contig_len as u32);
    if (covered as f64) < contig_len as f64 * params.min_coverage {
        return None;
    }

    let (a, b) = (chosen[0], chosen[1]);
    // Genomic position where the contig leaves segment a and enters segment b
    let a_exit = match a.strand {
        Strand::Forward => a.genomic_end(),
        Strand::Reverse => a.genomic_start(),
    };
    let b_entry = match b.strand {
        Strand::Forward => b.genomic_start(),
        Strand::Reverse => b.genomic_end(),
    };

    let (sv_type, size) = if a.t_name != b.t_name {
        (SvType::Translocation, None)
    } else if a.strand != b.strand {
        (SvType::Inversion, Some((b_entry - a_exit).unsigned_abs()))
    } else {
        let progress = match a.strand {
            Strand::Forward => b_entry - a_exit,
            Strand::Reverse => a_exit - b_entry,
        };
        if progress >= params.min_indel_size as i64 {
            (SvType::Deletion, Some(progress as u64))
        } else if -progress >= params.min_indel_size as i64 {
            (SvType::TandemDuplication, Some(progress.unsigned_abs()))
        } else {
            return None;
        }
    };

    let (first, second) = if a_exit <= b_entry || a.t_name != b.t_name {
        (a_exit, b_entry)
    } else {
        (b_entry, a_exit)
    };
    Some(SvCall {
        sv_type,
        breakpoints: vec![
            Breakpoint { chrom: a.t_name.clone(), pos: first },
            Breakpoint { chrom: b.t_name.clone(), pos: second },
        ],
        size,
        strands: chosen
            .iter()
            .map(|h| h.strand.symbol().to_string())
            .collect::<Vec<_>>()
            .join(","),
        segments: chosen.len(),
    })
}

/// A reportable call together with its contig evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvResult {
    pub target: String,
    pub contig_id: String,
    pub contig_seq: String,
    /// Distinct reads supporting the contig.
    pub support: usize,
    /// Sample-specific k-mers in the contig's cluster.
    pub nkmers: usize,
    pub call: SvCall,
}

impl SvResult {
    pub const HEADER: &'static str = "target\tcontig_id\tsv_type\tbreakpoints\tsv_size\tstrands\tsegments\tsplit_read_count\tnkmers\tcontig_seq";

    /// Tab-separated record matching [`SvResult::HEADER`].
    pub fn record_line(&self) -> String {
        let breakpoints = self
            .call
            .breakpoints
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let size = self
            .call
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NA".to_string());
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.target,
            self.contig_id,
            self.call.sv_type,
            breakpoints,
            size,
            self.call.strands,
            self.call.segments,
            self.support,
            self.nkmers,
            self.contig_seq
        )
    }
}
