//! Resolution of contigs into structural variant results.
use log::info;
use std::path::{Path, PathBuf};

use crate::calls::{CallParams, SvResult};
use crate::contig::{Contig, ContigMeta};
use crate::error::Error;
use crate::extract::ReadSource;
use crate::reference::ReferenceLocus;
use crate::search::ReferenceSearcher;
use crate::targets::TargetRegion;

/// Everything a target contributes to resolving its contigs.
pub struct ContigResolver<'a> {
    pub region: &'a TargetRegion,
    pub locus: &'a ReferenceLocus,
    pub out_dir: &'a Path,
    pub work_dir: &'a Path,
    pub kmer_cluster_file: &'a Path,
    /// Alignment subset the supporting reads are taken from.
    pub sv_reads_bam: &'a Path,
    pub searcher: &'a dyn ReferenceSearcher,
    pub reads: &'a dyn ReadSource,
    pub params: &'a CallParams,
}

impl ContigResolver<'_> {
    /// Resolve `contigs` in order, naming them `contig1`, `contig2`, ...
    /// Returns the results of the contigs that produced a call.
    pub fn resolve(&self, contigs: &mut [Contig]) -> Result<Vec<SvResult>, Error> {
        let target = self.region.name.as_str();
        let mut results = Vec::new();
        for (i, contig) in contigs.iter_mut().enumerate() {
            let id = format!("contig{}", i + 1);
            contig.set_meta_information(ContigMeta {
                id: id.clone(),
                region: self.region.clone(),
                out_dir: self.out_dir.to_path_buf(),
                work_dir: self.work_dir.to_path_buf(),
                kmer_cluster_file: self.kmer_cluster_file.to_path_buf(),
            });

            let n_hits = contig.query_ref(self.searcher, self.locus)?;
            contig.make_calls(self.params);

            match contig.result() {
                Some(result) => {
                    contig.write_result()?;
                    contig.write_bam(self.reads, self.sv_reads_bam)?;
                    results.push(result);
                }
                None => info!(
                    "{} {}: no structural variant result from {} hits ({} bp, {} reads)",
                    target,
                    id,
                    n_hits,
                    contig.seq.len(),
                    contig.support()
                ),
            }
        }
        info!(
            "{}: {} of {} contigs produced a call",
            target,
            results.len(),
            contigs.len()
        );
        Ok(results)
    }
}

/// Path of the aggregate results file for a target.
pub fn aggregate_path(out_dir: &Path, target: &str) -> PathBuf {
    out_dir.join(format!("{}_svs.out", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractRequest, ExtractedReads};
    use crate::search::{AlignmentHit, ContigQuery, Strand};
    use crate::targets::Interval;
    use ahash::{AHashMap, AHashSet};
    use std::fs;

    /// Returns the hits registered for a contig sequence, none otherwise.
    struct HitsBySeq(AHashMap<String, Vec<AlignmentHit>>);

    impl ReferenceSearcher for HitsBySeq {
        fn search(
            &self,
            query: &ContigQuery,
            _locus: &ReferenceLocus,
        ) -> Result<Vec<AlignmentHit>, Error> {
            Ok(self.0.get(query.seq).cloned().unwrap_or_default())
        }
    }

    /// Writes the sorted read names in place of a BAM.
    struct NameListReads;

    impl ReadSource for NameListReads {
        fn extract(&self, _request: &ExtractRequest) -> Result<ExtractedReads, Error> {
            Ok(ExtractedReads::default())
        }

        fn write_subset(
            &self,
            _source: &Path,
            read_names: &AHashSet<String>,
            out: &Path,
        ) -> Result<usize, Error> {
            let mut names: Vec<&str> = read_names.iter().map(String::as_str).collect();
            names.sort_unstable();
            fs::write(out, names.join("\n")).unwrap();
            Ok(names.len())
        }
    }

    /// A 60 bp contig aligned in two blocks around a 30 bp deletion at
    /// `t_offset + 40`.
    fn deletion_hit(t_offset: i64) -> AlignmentHit {
        AlignmentHit {
            matches: 60,
            mismatches: 0,
            strand: Strand::Forward,
            q_name: "query".into(),
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
            t_offset,
        }
    }

    fn contig(base: &str, reads: &[&str]) -> Contig {
        Contig::new(
            base.repeat(60),
            vec![(base.repeat(11), 4)],
            reads.iter().map(|r| r.to_string()).collect(),
            reads.iter().map(|r| r.to_string()).collect(),
        )
    }

    fn region() -> TargetRegion {
        TargetRegion::from_intervals(
            "T1",
            vec![
                Interval { chrom: "chr1".into(), start: 120, end: 160 },
                Interval { chrom: "chr1".into(), start: 300, end: 360 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_ids_follow_order_and_no_call_keeps_its_number() {
        let dir = tempfile::TempDir::new().unwrap();
        let region = region();
        let locus = ReferenceLocus {
            chrom: "chr1".into(),
            start: 100,
            end: 600,
            forward: dir.path().join("f.fa"),
            reverse: dir.path().join("r.fa"),
        };
        let mut hits = AHashMap::new();
        hits.insert("C".repeat(60), vec![deletion_hit(100)]);
        hits.insert("G".repeat(60), vec![deletion_hit(200)]);
        let searcher = HitsBySeq(hits);

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let clusters = dir.path().join("T1_sample_kmers_merged.out");
        let params = CallParams::default();
        let resolver = ContigResolver {
            region: &region,
            locus: &locus,
            out_dir: &out_dir,
            work_dir: dir.path(),
            kmer_cluster_file: &clusters,
            sv_reads_bam: &dir.path().join("T1_sv_reads.sorted.bam"),
            searcher: &searcher,
            reads: &NameListReads,
            params: &params,
        };

        let mut contigs = vec![
            contig("A", &["r1", "r2", "r3"]),
            contig("C", &["r4", "r5", "r6"]),
            contig("G", &["r7", "r8", "r9", "r10"]),
        ];
        let results = resolver.resolve(&mut contigs).unwrap();

        let ids: Vec<&str> = contigs.iter().filter_map(|c| c.id()).collect();
        assert_eq!(ids, vec!["contig1", "contig2", "contig3"]);
        assert!(!contigs[0].has_result());

        let result_ids: Vec<&str> = results.iter().map(|r| r.contig_id.as_str()).collect();
        assert_eq!(result_ids, vec!["contig2", "contig3"]);
        assert_eq!(results[0].call.breakpoints[0].pos, 140);
        assert_eq!(results[1].call.breakpoints[0].pos, 240);
        assert_eq!(results[1].support, 4);

        assert!(!out_dir.join("T1_contig1_svs.out").exists());
        assert!(!out_dir.join("T1_contig1_sv_reads.bam").exists());
        for id in ["contig2", "contig3"] {
            assert!(out_dir.join(format!("T1_{id}_svs.out")).exists());
            assert!(out_dir.join(format!("T1_{id}_sv_reads.bam")).exists());
        }
        let bam_names = fs::read_to_string(out_dir.join("T1_contig3_sv_reads.bam")).unwrap();
        assert_eq!(bam_names, "r10\nr7\nr8\nr9");
    }

    #[test]
    fn test_meta_carries_target_coordinates() {
        let dir = tempfile::TempDir::new().unwrap();
        let region = region();
        let locus = ReferenceLocus {
            chrom: "chr1".into(),
            start: 0,
            end: 600,
            forward: dir.path().join("f.fa"),
            reverse: dir.path().join("r.fa"),
        };
        let searcher = HitsBySeq(AHashMap::new());
        let clusters = dir.path().join("T1_sample_kmers_merged.out");
        let params = CallParams::default();
        let resolver = ContigResolver {
            region: &region,
            locus: &locus,
            out_dir: dir.path(),
            work_dir: dir.path(),
            kmer_cluster_file: &clusters,
            sv_reads_bam: &dir.path().join("T1_sv_reads.sorted.bam"),
            searcher: &searcher,
            reads: &NameListReads,
            params: &params,
        };

        let mut contigs = vec![contig("A", &["r1"])];
        assert!(resolver.resolve(&mut contigs).unwrap().is_empty());

        let meta = contigs[0].meta().unwrap();
        assert_eq!(meta.region.chrom, "chr1");
        assert_eq!((meta.region.start, meta.region.end), (120, 360));
        assert_eq!(meta.region.intervals.len(), 2);
        assert_eq!(meta.kmer_cluster_file, clusters);
    }
}
