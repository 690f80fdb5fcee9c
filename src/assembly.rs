//! Clustering of sample-specific k-mers into contigs.
//!
//! K-mers that occur together in a read are joined into one component; the
//! reads of a component are laid out against each other through their shared
//! k-mers and collapsed into a single consensus sequence.
use ahash::{AHashMap, AHashSet};
use log::debug;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::contig::Contig;
use crate::differ::SampleKmers;
use crate::error::Error;
use crate::extract::ReadRecord;
use crate::kmer;

pub trait Clusterer: Send + Sync {
    /// Contigs supported by at least `min_support` distinct reads, in
    /// discovery order. `read_len` is the longest cleaned read.
    fn cluster(
        &self,
        kmers: &SampleKmers,
        reads: &[ReadRecord],
        k: usize,
        min_support: usize,
        read_len: usize,
    ) -> Vec<Contig>;
}

/// Union-find over k-mer indices.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Position of a sample-specific k-mer in a read: `(offset, kmer index)`.
type ReadHits = Vec<(usize, usize)>;

fn base_index(base: u8) -> usize {
    match base {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => 4,
    }
}

const BASES: [u8; 5] = *b"ACGTN";

/// Default clusterer: k-mer co-occurrence components with a majority-vote
/// consensus per component.
#[derive(Debug, Clone, Default)]
pub struct KmerClusterer;

impl Clusterer for KmerClusterer {
    fn cluster(
        &self,
        kmers: &SampleKmers,
        reads: &[ReadRecord],
        k: usize,
        min_support: usize,
        read_len: usize,
    ) -> Vec<Contig> {
        if kmers.is_empty() || reads.is_empty() || k == 0 {
            return Vec::new();
        }

        let mers: Vec<(&str, u32)> = kmers.iter().collect();
        let index: AHashMap<&str, usize> = mers
            .iter()
            .enumerate()
            .map(|(i, (m, _))| (*m, i))
            .collect();

        let seqs: Vec<Vec<u8>> = reads
            .iter()
            .map(|r| r.seq.to_ascii_uppercase().into_bytes())
            .collect();
        let read_hits: Vec<ReadHits> = seqs
            .iter()
            .map(|seq| {
                kmer::valid_window_starts(seq, k)
                    .into_iter()
                    .filter_map(|pos| {
                        std::str::from_utf8(&seq[pos..pos + k])
                            .ok()
                            .and_then(|m| index.get(m))
                            .map(|&idx| (pos, idx))
                    })
                    .collect()
            })
            .collect();

        let mut sets = DisjointSet::new(mers.len());
        for hits in &read_hits {
            if let Some(&(_, first)) = hits.first() {
                for &(_, idx) in &hits[1..] {
                    sets.union(first, idx);
                }
            }
        }

        // Discovery order: most abundant k-mer first, ties by k-mer text
        let mut walk: Vec<usize> = (0..mers.len()).collect();
        walk.sort_by(|&a, &b| mers[b].1.cmp(&mers[a].1).then(mers[a].0.cmp(mers[b].0)));

        let mut component_of_root: AHashMap<usize, usize> = AHashMap::new();
        // (anchor kmer, member kmers, member reads)
        let mut components: Vec<(usize, Vec<usize>, Vec<usize>)> = Vec::new();
        for &idx in &walk {
            let root = sets.find(idx);
            let c = *component_of_root.entry(root).or_insert_with(|| {
                components.push((idx, Vec::new(), Vec::new()));
                components.len() - 1
            });
            components[c].1.push(idx);
        }
        for (r, hits) in read_hits.iter().enumerate() {
            if let Some(&(_, first)) = hits.first() {
                let root = sets.find(first);
                if let Some(&c) = component_of_root.get(&root) {
                    components[c].2.push(r);
                }
            }
        }

        let mut contigs = Vec::new();
        for (anchor, mut members, member_reads) in components {
            let read_ids: BTreeSet<&str> =
                member_reads.iter().map(|&r| reads[r].id.as_str()).collect();
            if read_ids.len() < min_support {
                continue;
            }

            let Some(seq) = consensus(anchor, &member_reads, &read_hits, &seqs, read_len) else {
                continue;
            };

            members.sort_unstable();
            let contig_kmers: Vec<(String, u32)> = members
                .iter()
                .map(|&i| (mers[i].0.to_string(), mers[i].1))
                .collect();
            let read_names: AHashSet<String> =
                member_reads.iter().map(|&r| reads[r].name.clone()).collect();
            debug!(
                "Cluster of {} kmers from {} reads gives a {} bp contig",
                contig_kmers.len(),
                read_ids.len(),
                seq.len()
            );
            contigs.push(Contig::new(
                seq,
                contig_kmers,
                read_ids.into_iter().map(str::to_string).collect(),
                read_names,
            ));
        }
        contigs
    }
}

/// Lay the reads out on the anchor k-mer's coordinate frame and take the
/// per-column majority base, ties going to the earlier of `A, C, G, T, N`.
fn consensus(
    anchor: usize,
    member_reads: &[usize],
    read_hits: &[ReadHits],
    seqs: &[Vec<u8>],
    read_len: usize,
) -> Option<String> {
    let mut kmer_pos: AHashMap<usize, i64> = AHashMap::new();
    kmer_pos.insert(anchor, 0);
    let mut offsets: Vec<Option<i64>> = vec![None; member_reads.len()];

    // Each pass places every read sharing a k-mer with the layout so far
    loop {
        let mut placed_any = false;
        for (slot, &r) in member_reads.iter().enumerate() {
            if offsets[slot].is_some() {
                continue;
            }
            let hits = &read_hits[r];
            let Some(offset) = hits
                .iter()
                .find_map(|(pos, idx)| kmer_pos.get(idx).map(|p| p - *pos as i64))
            else {
                continue;
            };
            for &(pos, idx) in hits {
                kmer_pos.entry(idx).or_insert(offset + pos as i64);
            }
            offsets[slot] = Some(offset);
            placed_any = true;
        }
        if !placed_any {
            break;
        }
    }

    let placed: Vec<(i64, &[u8])> = member_reads
        .iter()
        .zip(&offsets)
        .filter_map(|(&r, off)| off.map(|o| (o, seqs[r].as_slice())))
        .collect();
    let start = placed.iter().map(|(o, _)| *o).min()?;
    let end = placed.iter().map(|(o, s)| o + s.len() as i64).max()?;

    let mut columns: Vec<[u32; 5]> = Vec::with_capacity(read_len.max((end - start) as usize));
    columns.resize((end - start) as usize, [0; 5]);
    for (offset, seq) in placed {
        let base_col = (offset - start) as usize;
        for (i, &b) in seq.iter().enumerate() {
            columns[base_col + i][base_index(b)] += 1;
        }
    }

    let seq: String = columns
        .iter()
        .map(|votes| {
            let mut best = 0;
            for b in 1..5 {
                if votes[b] > votes[best] {
                    best = b;
                }
            }
            BASES[best] as char
        })
        .collect();
    Some(seq)
}

/// Write the cluster listing: one `cluster<N>\tkmer\tcount` line per
/// component k-mer, clusters in emission order.
pub fn write_clusters(path: &Path, contigs: &[Contig]) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut writer = BufWriter::new(file);
    for (i, contig) in contigs.iter().enumerate() {
        for (mer, count) in &contig.kmers {
            writeln!(writer, "cluster{}\t{}\t{}", i + 1, mer, count)
                .map_err(|e| Error::io(e, path))?;
        }
    }
    writer.flush().map_err(|e| Error::io(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(id: &str, seq: &str) -> ReadRecord {
        ReadRecord {
            id: id.to_string(),
            name: id.to_string(),
            seq: seq.to_string(),
            qual: vec![b'I'; seq.len()],
            clip_seq: String::new(),
            unmapped: false,
        }
    }

    fn kmers_of(seqs: &[&str], k: usize) -> SampleKmers {
        let mut counts: AHashMap<String, u32> = AHashMap::new();
        for s in seqs {
            for m in kmer::extract_kmers(s.as_bytes(), k) {
                *counts.entry(m).or_insert(0) += 1;
            }
        }
        counts.into_iter().collect()
    }

    const JUNCTION: &str = "TTGACCGATAGCTTACGGATCCAGTAACGTTGCAGGCTAATCCGGTATTGCAAGCTGTCAAGCTT";

    fn overlapping_reads() -> Vec<ReadRecord> {
        [0usize, 3, 6, 9, 12]
            .iter()
            .enumerate()
            .map(|(i, &s)| read(&format!("r{}", i), &JUNCTION[s..s + 50]))
            .collect()
    }

    #[test]
    fn test_overlapping_reads_form_one_contig() {
        let reads = overlapping_reads();
        let seqs: Vec<&str> = reads.iter().map(|r| r.seq.as_str()).collect();
        let kmers = kmers_of(&seqs, 11);

        let contigs = KmerClusterer.cluster(&kmers, &reads, 11, 3, 50);
        assert_eq!(contigs.len(), 1);
        assert_eq!(contigs[0].seq, &JUNCTION[0..62]);
        assert_eq!(contigs[0].support(), 5);
        assert_eq!(contigs[0].kmers.len(), kmers.len());
    }

    #[test]
    fn test_contig_links_reads_and_kmers() {
        let mut reads = overlapping_reads();
        // Shares no k-mer with the junction reads
        reads.push(read("stray", "GGGCCCAAATTTGGGCCCAAT"));
        let junction_seqs: Vec<&str> = reads[..5].iter().map(|r| r.seq.as_str()).collect();
        let kmers = kmers_of(&junction_seqs, 11);

        let contigs = KmerClusterer.cluster(&kmers, &reads, 11, 3, 50);
        assert_eq!(contigs.len(), 1);
        let contig = &contigs[0];
        assert!(!contig.read_ids.contains(&"stray".to_string()));
        assert!(!contig.read_names.contains("stray"));

        let by_id: AHashMap<&str, &ReadRecord> =
            reads.iter().map(|r| (r.id.as_str(), r)).collect();
        for id in &contig.read_ids {
            let seq = &by_id[id.as_str()].seq;
            assert!(contig.kmers.iter().any(|(m, _)| seq.contains(m.as_str())));
        }
        for (mer, _) in &contig.kmers {
            assert!(contig
                .read_ids
                .iter()
                .any(|id| by_id[id.as_str()].seq.contains(mer.as_str())));
        }
    }

    #[test]
    fn test_support_threshold_boundary() {
        let reads = overlapping_reads()[..3].to_vec();
        let seqs: Vec<&str> = reads.iter().map(|r| r.seq.as_str()).collect();
        let kmers = kmers_of(&seqs, 11);

        // Exactly at the threshold is kept, one below is not
        assert_eq!(KmerClusterer.cluster(&kmers, &reads, 11, 3, 50).len(), 1);
        assert!(KmerClusterer.cluster(&kmers, &reads, 11, 4, 50).is_empty());
    }

    #[test]
    fn test_disjoint_reads_form_separate_components() {
        let a = "ACGTTGCAAGGCTTACCGATA";
        let b = "GGGCCCAAATTTGGGCCCAAT";
        let reads = vec![read("a1", a), read("a2", a), read("b1", b)];
        let kmers = kmers_of(&[a, b], 7);

        let contigs = KmerClusterer.cluster(&kmers, &reads, 7, 1, 21);
        assert_eq!(contigs.len(), 2);
        let mut seqs: Vec<&str> = contigs.iter().map(|c| c.seq.as_str()).collect();
        seqs.sort();
        assert_eq!(seqs, vec![a, b]);
        assert_eq!(KmerClusterer.cluster(&kmers, &reads, 7, 2, 21).len(), 1);
    }

    #[test]
    fn test_consensus_majority() {
        let truth = "ACGTTGCAAGGCTTACCGATAGG";
        let mut err = truth.as_bytes().to_vec();
        err[20] = b'C';
        let err = String::from_utf8(err).unwrap();
        let reads = vec![read("r1", truth), read("r2", truth), read("r3", &err)];
        let kmers = kmers_of(&[truth], 7);

        let contigs = KmerClusterer.cluster(&kmers, &reads, 7, 3, 23);
        assert_eq!(contigs.len(), 1);
        assert_eq!(contigs[0].seq, truth);
    }

    #[test]
    fn test_deterministic() {
        let reads = overlapping_reads();
        let seqs: Vec<&str> = reads.iter().map(|r| r.seq.as_str()).collect();
        let kmers = kmers_of(&seqs, 11);
        let first: Vec<String> = KmerClusterer
            .cluster(&kmers, &reads, 11, 1, 50)
            .into_iter()
            .map(|c| c.seq)
            .collect();
        let second: Vec<String> = KmerClusterer
            .cluster(&kmers, &reads, 11, 1, 50)
            .into_iter()
            .map(|c| c.seq)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_clusters() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clusters.out");
        let contigs = vec![
            Contig::new(
                "ACGT".into(),
                vec![("ACG".into(), 4), ("CGT".into(), 3)],
                Vec::new(),
                AHashSet::new(),
            ),
            Contig::new("TTA".into(), vec![("TTA".into(), 2)], Vec::new(), AHashSet::new()),
        ];
        write_clusters(&path, &contigs).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "cluster1\tACG\t4\ncluster1\tCGT\t3\ncluster2\tTTA\t2\n"
        );
    }

    #[test]
    fn test_no_kmers_no_contigs() {
        let reads = overlapping_reads();
        assert!(KmerClusterer
            .cluster(&SampleKmers::default(), &reads, 11, 1, 50)
            .is_empty());
    }
}
