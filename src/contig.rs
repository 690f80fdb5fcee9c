//! Contigs assembled from sample-specific k-mers and their resolution state.
use ahash::AHashSet;
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::calls::{derive_call, CallParams, SvCall, SvResult};
use crate::error::Error;
use crate::extract::ReadSource;
use crate::reference::ReferenceLocus;
use crate::search::{AlignmentHit, ContigQuery, ReferenceSearcher};
use crate::targets::TargetRegion;

/// Values bound to a contig once the resolver takes it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigMeta {
    /// `contig1`, `contig2`, ... in emission order.
    pub id: String,
    /// Enclosing target: name, coordinates and intervals.
    pub region: TargetRegion,
    /// Result artifacts land here.
    pub out_dir: PathBuf,
    /// Scratch directory for reference queries.
    pub work_dir: PathBuf,
    /// Cluster listing the contig was written to.
    pub kmer_cluster_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Contig {
    pub seq: String,
    /// Component k-mers with their sample counts, in k-mer order.
    pub kmers: Vec<(String, u32)>,
    /// Distinct supporting read ids, sorted.
    pub read_ids: Vec<String>,
    /// Alignment query names of the supporting reads.
    pub read_names: AHashSet<String>,
    meta: Option<ContigMeta>,
    hits: Vec<AlignmentHit>,
    result: Option<SvCall>,
}

impl Contig {
    pub fn new(
        seq: String,
        kmers: Vec<(String, u32)>,
        read_ids: Vec<String>,
        read_names: AHashSet<String>,
    ) -> Self {
        Contig {
            seq,
            kmers,
            read_ids,
            read_names,
            meta: None,
            hits: Vec::new(),
            result: None,
        }
    }

    /// Number of distinct reads supporting the contig.
    pub fn support(&self) -> usize {
        self.read_ids.len()
    }

    pub fn meta(&self) -> Option<&ContigMeta> {
        self.meta.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.id.as_str())
    }

    pub fn set_meta_information(&mut self, meta: ContigMeta) {
        self.meta = Some(meta);
    }

    fn bound_meta(&self) -> Result<&ContigMeta, Error> {
        self.meta
            .as_ref()
            .ok_or_else(|| Error::Parameter("contig has no metadata bound".to_string()))
    }

    pub fn hits(&self) -> &[AlignmentHit] {
        &self.hits
    }

    /// Search the contig against the target's reference window. Returns the
    /// number of hits kept for call derivation.
    pub fn query_ref(
        &mut self,
        searcher: &dyn ReferenceSearcher,
        locus: &ReferenceLocus,
    ) -> Result<usize, Error> {
        let meta = self.bound_meta()?;
        let query = ContigQuery {
            id: &meta.id,
            seq: &self.seq,
            work_dir: &meta.work_dir,
        };
        let hits = searcher.search(&query, locus)?;
        debug!("{} {}: {} reference hits", meta.region.name, meta.id, hits.len());
        self.hits = hits;
        Ok(self.hits.len())
    }

    /// Derive at most one call from the reference hits.
    pub fn make_calls(&mut self, params: &CallParams) {
        self.result = derive_call(&self.hits, self.seq.len(), params);
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn call(&self) -> Option<&SvCall> {
        self.result.as_ref()
    }

    /// The reportable result, when a call was made and metadata is bound.
    pub fn result(&self) -> Option<SvResult> {
        let meta = self.meta.as_ref()?;
        let call = self.result.clone()?;
        Some(SvResult {
            target: meta.region.name.clone(),
            contig_id: meta.id.clone(),
            contig_seq: self.seq.clone(),
            support: self.support(),
            nkmers: self.kmers.len(),
            call,
        })
    }

    /// Write `<target>_<contig>_svs.out`. Nothing is written without a call.
    pub fn write_result(&self) -> Result<Option<PathBuf>, Error> {
        let Some(result) = self.result() else {
            return Ok(None);
        };
        let meta = self.bound_meta()?;
        let path = meta
            .out_dir
            .join(format!("{}_{}_svs.out", meta.region.name, meta.id));
        write_results_atomic(&path, std::slice::from_ref(&result))?;
        info!(
            "Wrote {} call for {} to {}",
            result.call.sv_type,
            meta.id,
            path.display()
        );
        Ok(Some(path))
    }

    /// Write `<target>_<contig>_sv_reads.bam` holding the supporting reads'
    /// alignments taken from `source_bam`.
    pub fn write_bam(
        &self,
        reads: &dyn ReadSource,
        source_bam: &Path,
    ) -> Result<Option<PathBuf>, Error> {
        if !self.has_result() {
            return Ok(None);
        }
        let meta = self.bound_meta()?;
        let path = meta
            .out_dir
            .join(format!("{}_{}_sv_reads.bam", meta.region.name, meta.id));
        let written = reads.write_subset(source_bam, &self.read_names, &path)?;
        debug!("{} alignments written to {}", written, path.display());
        Ok(Some(path))
    }
}

/// Write results with a header through a temporary file renamed into place.
pub fn write_results_atomic(path: &Path, results: &[SvResult]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let file = File::create(&tmp).map_err(|e| Error::io(e, &tmp))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", SvResult::HEADER).map_err(|e| Error::io(e, &tmp))?;
        for result in results {
            writeln!(writer, "{}", result.record_line()).map_err(|e| Error::io(e, &tmp))?;
        }
        writer.flush().map_err(|e| Error::io(e, &tmp))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::io(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Strand;

    struct FixedSearcher(Vec<AlignmentHit>);

    impl ReferenceSearcher for FixedSearcher {
        fn search(
            &self,
            _query: &ContigQuery,
            _locus: &ReferenceLocus,
        ) -> Result<Vec<AlignmentHit>, Error> {
            Ok(self.0.clone())
        }
    }

    fn deletion_hit() -> AlignmentHit {
        AlignmentHit {
            matches: 60,
            mismatches: 0,
            strand: Strand::Forward,
            q_name: "contig1".into(),
            q_size: 60,
            q_start: 0,
            q_end: 60,
            t_name: "chr1".into(),
            t_size: 500,
            t_start: 10,
            t_end: 100,
            block_sizes: vec![30, 30],
            q_starts: vec![0, 30],
            t_starts: vec![10, 70],
            t_offset: 100,
        }
    }

    fn contig(dir: &Path) -> Contig {
        let mut c = Contig::new(
            "A".repeat(60),
            vec![("AAAA".into(), 5)],
            vec!["r1".into(), "r2".into(), "r3".into()],
            ["r1", "r2", "r3"].iter().map(|s| s.to_string()).collect(),
        );
        c.set_meta_information(ContigMeta {
            id: "contig1".into(),
            region: TargetRegion {
                name: "T1".into(),
                chrom: "chr1".into(),
                start: 300,
                end: 400,
                intervals: Vec::new(),
            },
            out_dir: dir.to_path_buf(),
            work_dir: dir.to_path_buf(),
            kmer_cluster_file: dir.join("T1_sample_kmers_merged.out"),
        });
        c
    }

    fn locus(dir: &Path) -> ReferenceLocus {
        ReferenceLocus {
            chrom: "chr1".into(),
            start: 100,
            end: 600,
            forward: dir.join("f.fa"),
            reverse: dir.join("r.fa"),
        }
    }

    #[test]
    fn test_query_without_meta_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut c = Contig::new("ACGT".into(), Vec::new(), Vec::new(), AHashSet::new());
        let searcher = FixedSearcher(Vec::new());
        assert!(c.query_ref(&searcher, &locus(dir.path())).is_err());
    }

    #[test]
    fn test_no_hits_no_result_no_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut c = contig(dir.path());
        let n = c.query_ref(&FixedSearcher(Vec::new()), &locus(dir.path())).unwrap();
        assert_eq!(n, 0);
        c.make_calls(&CallParams::default());
        assert!(!c.has_result());
        assert_eq!(c.write_result().unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_result_written_with_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut c = contig(dir.path());
        c.query_ref(&FixedSearcher(vec![deletion_hit()]), &locus(dir.path()))
            .unwrap();
        c.make_calls(&CallParams::default());
        assert!(c.has_result());

        let path = c.write_result().unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "T1_contig1_svs.out");
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], SvResult::HEADER);
        assert!(lines[1].starts_with("T1\tcontig1\tDEL\tchr1:140,chr1:170\t30\t+\t1\t3\t1\t"));
        assert!(!dir.path().join("T1_contig1_svs.out.tmp").exists());
    }
}
