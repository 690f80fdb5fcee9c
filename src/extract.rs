//! Read extraction from BAM/CRAM files for one target region.
//!
//! Reads that carry structural-variant evidence (soft clips anchored inside
//! the target, indels, or no alignment at all) are pulled out of the
//! region, written as FASTQ for cleaning and k-mer counting, and their
//! clipped portions written as FASTA for the soft-clip k-mer set.
use ahash::AHashSet;
use log::debug;
use rust_htslib::bam::record::Cigar;
use rust_htslib::bam::{self, Read};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Shortest soft clip that marks a read as variant evidence.
pub const MIN_CLIP_LEN: usize = 3;

/// A sequencing read retained for variant discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    /// FASTQ identifier: `name/1`, `name/2` for mates, `name` otherwise.
    pub id: String,
    /// Query name in the alignment file.
    pub name: String,
    pub seq: String,
    /// Phred+33 qualities, same length as `seq`.
    pub qual: Vec<u8>,
    /// Raw soft-clipped bases (longest qualifying clip), empty if none.
    pub clip_seq: String,
    pub unmapped: bool,
}

/// Reads extracted for one sample over one target region.
#[derive(Debug, Clone, Default)]
pub struct ExtractedReads {
    pub reads: Vec<ReadRecord>,
    /// `(id, sequence)` soft-clip evidence, each clip extended by `k - 1`
    /// aligned bases so breakpoint-spanning k-mers are represented.
    pub clipped: Vec<(String, String)>,
}

impl ExtractedReads {
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Write reads as FASTQ and clip evidence as FASTA.
    pub fn write_seqs(&self, reads_fq: &Path, clipped_fa: &Path) -> Result<(), Error> {
        write_fastq_records(reads_fq, &self.reads)?;

        let file = File::create(clipped_fa).map_err(|e| Error::io(e, clipped_fa))?;
        let mut fa = BufWriter::new(file);
        for (id, seq) in &self.clipped {
            writeln!(fa, ">{}\n{}", id, seq).map_err(|e| Error::io(e, clipped_fa))?;
        }
        fa.flush().map_err(|e| Error::io(e, clipped_fa))?;
        Ok(())
    }
}

/// Write read records as FASTQ.
pub fn write_fastq_records(path: &Path, reads: &[ReadRecord]) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut fq = BufWriter::new(file);
    for read in reads {
        write_fastq(&mut fq, read).map_err(|e| Error::io(e, path))?;
    }
    fq.flush().map_err(|e| Error::io(e, path))
}

fn write_fastq<W: Write>(out: &mut W, read: &ReadRecord) -> std::io::Result<()> {
    out.write_all(b"@")?;
    out.write_all(read.id.as_bytes())?;
    out.write_all(b"\n")?;
    out.write_all(read.seq.as_bytes())?;
    out.write_all(b"\n+\n")?;
    out.write_all(&read.qual)?;
    out.write_all(b"\n")
}

/// What to extract: a buffered region of one alignment file.
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub bam: &'a Path,
    pub chrom: &'a str,
    /// Buffered fetch window (0-based, half-open).
    pub fetch_start: i64,
    pub fetch_end: i64,
    /// Soft clips must be anchored within `[target_start, target_end]`.
    pub target_start: i64,
    pub target_end: i64,
    pub kmer_size: usize,
    /// Where to write the variant-read alignments, if wanted.
    pub subset_bam: Option<&'a Path>,
}

/// Source of aligned reads.
pub trait ReadSource: Send + Sync {
    /// Pull the variant-evidence reads out of a region.
    fn extract(&self, request: &ExtractRequest) -> Result<ExtractedReads, Error>;

    /// Copy the alignments of `read_names` from `source` into an indexed
    /// BAM at `out`. Returns the number of records written.
    fn write_subset(
        &self,
        source: &Path,
        read_names: &AHashSet<String>,
        out: &Path,
    ) -> Result<usize, Error>;
}

/// Leading and trailing soft-clip lengths, looking past any hard clips.
pub fn soft_clips(ops: &[Cigar]) -> (usize, usize) {
    let mut inner = ops;
    while let [Cigar::HardClip(_), rest @ ..] = inner {
        inner = rest;
    }
    while let [rest @ .., Cigar::HardClip(_)] = inner {
        inner = rest;
    }
    let left = match inner {
        [Cigar::SoftClip(n), ..] => *n as usize,
        _ => 0,
    };
    let right = match inner {
        [_, .., Cigar::SoftClip(n)] => *n as usize,
        _ => 0,
    };
    (left, right)
}

/// Clip layout of one aligned read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipLayout {
    pub left: usize,
    pub right: usize,
    /// Reference position of the first aligned base.
    pub ref_start: i64,
    /// Reference position one past the last aligned base.
    pub ref_end: i64,
}

/// Soft-clip evidence for one read.
///
/// Returns the raw bases of the longest qualifying clip and the evidence
/// sequences (clip plus `k - 1` aligned bases) for every qualifying clip.
/// A clip qualifies when it is at least [`MIN_CLIP_LEN`] long and its
/// breakpoint lies inside the target.
pub fn clip_evidence(
    seq: &[u8],
    layout: ClipLayout,
    target_start: i64,
    target_end: i64,
    k: usize,
) -> (String, Vec<String>) {
    let in_target = |pos: i64| pos >= target_start && pos <= target_end;
    let flank = k.saturating_sub(1);
    let mut raw: &[u8] = &[];
    let mut evidence = Vec::new();

    if layout.left >= MIN_CLIP_LEN && layout.left <= seq.len() && in_target(layout.ref_start) {
        let end = (layout.left + flank).min(seq.len());
        evidence.push(String::from_utf8_lossy(&seq[..end]).into_owned());
        raw = &seq[..layout.left];
    }
    if layout.right >= MIN_CLIP_LEN && layout.right <= seq.len() && in_target(layout.ref_end) {
        let clip_start = seq.len() - layout.right;
        let start = clip_start.saturating_sub(flank);
        evidence.push(String::from_utf8_lossy(&seq[start..]).into_owned());
        if layout.right > raw.len() {
            raw = &seq[clip_start..];
        }
    }
    (String::from_utf8_lossy(raw).into_owned(), evidence)
}

/// Phred+33 qualities from BAM raw qualities (255 = missing).
fn fastq_qualities(qual: &[u8], len: usize) -> Vec<u8> {
    if qual.len() != len || qual.first() == Some(&255) {
        return vec![b'I'; len];
    }
    qual.iter().map(|&q| q.min(93) + 33).collect()
}

fn read_id(record: &bam::Record, name: &str) -> String {
    if record.is_paired() {
        if record.is_first_in_template() {
            format!("{}/1", name)
        } else {
            format!("{}/2", name)
        }
    } else {
        name.to_string()
    }
}

/// Region extraction with rust-htslib.
#[derive(Debug, Clone, Default)]
pub struct BamReadSource {
    pub threads: usize,
}

impl BamReadSource {
    pub fn new(threads: usize) -> Self {
        BamReadSource { threads }
    }
}

fn index_bam(path: &Path) -> Result<(), Error> {
    bam::index::build(path, None::<&Path>, bam::index::Type::Bai, 1)
        .map_err(|e| Error::htslib(e, path))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

impl ReadSource for BamReadSource {
    fn extract(&self, request: &ExtractRequest) -> Result<ExtractedReads, Error> {
        let bam_path = request.bam;
        let mut reader =
            bam::IndexedReader::from_path(bam_path).map_err(|e| Error::htslib(e, bam_path))?;
        if self.threads > 1 {
            reader
                .set_threads(self.threads)
                .map_err(|e| Error::htslib(e, bam_path))?;
        }

        let tid = reader.header().tid(request.chrom.as_bytes()).ok_or_else(|| {
            Error::Parameter(format!(
                "contig '{}' not found in {}",
                request.chrom,
                bam_path.display()
            ))
        })?;
        reader
            .fetch(bam::FetchDefinition::Region(
                tid as i32,
                request.fetch_start,
                request.fetch_end,
            ))
            .map_err(|e| Error::htslib(e, bam_path))?;

        // Region fetches come back coordinate sorted, so the subset is too.
        let mut writer = match request.subset_bam {
            Some(path) => {
                let header = bam::Header::from_template(reader.header());
                Some((
                    bam::Writer::from_path(path, &header, bam::Format::Bam)
                        .map_err(|e| Error::htslib(e, path))?,
                    path,
                ))
            }
            None => None,
        };

        let mut extracted = ExtractedReads::default();
        let mut scanned = 0u64;
        let mut record = bam::Record::new();

        while let Some(result) = reader.read(&mut record) {
            result.map_err(|e| Error::htslib(e, bam_path))?;
            if record.is_secondary()
                || record.is_supplementary()
                || record.is_duplicate()
                || record.is_quality_check_failed()
            {
                continue;
            }
            scanned += 1;

            let seq = record.seq().as_bytes();
            if seq.is_empty() {
                continue;
            }
            let name = String::from_utf8_lossy(record.qname()).into_owned();
            let id = read_id(&record, &name);

            let (clip_seq, evidence, unmapped) = if record.is_unmapped() {
                let whole = String::from_utf8_lossy(&seq).into_owned();
                (String::new(), vec![whole], true)
            } else {
                let cigar = record.cigar();
                let (left, right) = soft_clips(cigar.as_slice());
                let has_indel = cigar
                    .iter()
                    .any(|op| matches!(op, Cigar::Ins(_) | Cigar::Del(_)));
                let layout = ClipLayout {
                    left,
                    right,
                    ref_start: record.pos(),
                    ref_end: cigar.end_pos(),
                };
                let (clip_seq, mut evidence) = clip_evidence(
                    &seq,
                    layout,
                    request.target_start,
                    request.target_end,
                    request.kmer_size,
                );
                if evidence.is_empty() && has_indel {
                    evidence.push(String::from_utf8_lossy(&seq).into_owned());
                }
                (clip_seq, evidence, false)
            };

            if evidence.is_empty() {
                continue;
            }

            for ev in evidence {
                extracted.clipped.push((id.clone(), ev));
            }
            extracted.reads.push(ReadRecord {
                id,
                name,
                seq: String::from_utf8_lossy(&seq).into_owned(),
                qual: fastq_qualities(record.qual(), seq.len()),
                clip_seq,
                unmapped,
            });

            if let Some((w, path)) = writer.as_mut() {
                w.write(&record).map_err(|e| Error::htslib(e, *path))?;
            }
        }

        if let Some((w, path)) = writer {
            drop(w);
            index_bam(path)?;
        }

        debug!(
            "Extracted {} variant reads ({} clip sequences) of {} scanned from {}:{}-{}",
            extracted.reads.len(),
            extracted.clipped.len(),
            scanned,
            request.chrom,
            request.fetch_start,
            request.fetch_end
        );
        Ok(extracted)
    }

    fn write_subset(
        &self,
        source: &Path,
        read_names: &AHashSet<String>,
        out: &Path,
    ) -> Result<usize, Error> {
        let mut reader = bam::Reader::from_path(source).map_err(|e| Error::htslib(e, source))?;
        let header = bam::Header::from_template(reader.header());
        let tmp = tmp_path(out);

        let mut written = 0usize;
        {
            let mut writer = bam::Writer::from_path(&tmp, &header, bam::Format::Bam)
                .map_err(|e| Error::htslib(e, &tmp))?;
            let mut record = bam::Record::new();
            while let Some(result) = reader.read(&mut record) {
                result.map_err(|e| Error::htslib(e, source))?;
                let name = String::from_utf8_lossy(record.qname());
                if read_names.contains(name.as_ref()) {
                    writer.write(&record).map_err(|e| Error::htslib(e, &tmp))?;
                    written += 1;
                }
            }
        }

        fs::rename(&tmp, out).map_err(|e| Error::io(e, out))?;
        index_bam(out)?;
        Ok(written)
    }
}
