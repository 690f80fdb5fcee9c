//! Sample-specific k-mer derivation.
//!
//! `(sample ∩ clipped) − reference − normal`, keeping the sample count of
//! every surviving k-mer. Only key presence matters for the filtering sets;
//! their counts are discarded together with the sets themselves.
use log::info;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::counter::KmerCounts;
use crate::error::Error;

/// The per-target k-mer dictionaries feeding the differencer.
///
/// Owned by value: [`KmerSets::sample_specific`] consumes the sets, so the
/// large reference/sample dictionaries are freed as soon as the result
/// exists.
#[derive(Debug, Default)]
pub struct KmerSets {
    /// All reference strands, unioned.
    pub reference: KmerCounts,
    /// Every cleaned sample read.
    pub sample: KmerCounts,
    /// Soft-clipped and unmapped sample evidence.
    pub clipped: KmerCounts,
    /// Cleaned normal reads, when a normal sample is configured.
    pub normal: Option<KmerCounts>,
}

impl KmerSets {
    /// Reduce the sets to the sample-specific k-mers.
    ///
    /// A k-mer is removed by the normal set once its normal count reaches
    /// `min_normal_count`; a value of 1 suppresses on any occurrence.
    pub fn sample_specific(self, min_normal_count: u32) -> SampleKmers {
        let KmerSets {
            reference,
            sample,
            clipped,
            normal,
        } = self;

        let mut counts = BTreeMap::new();
        for (mer, count) in sample {
            if !clipped.contains_key(&mer) || reference.contains_key(&mer) {
                continue;
            }
            if let Some(normal) = &normal {
                if normal.get(&mer).is_some_and(|&n| n >= min_normal_count) {
                    continue;
                }
            }
            counts.insert(mer, count);
        }
        SampleKmers { counts }
    }
}

/// Sample-specific k-mers with their sample read counts, ordered by k-mer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleKmers {
    counts: BTreeMap<String, u32>,
}

impl SampleKmers {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, mer: &str) -> Option<u32> {
        self.counts.get(mer).copied()
    }

    pub fn contains(&self, mer: &str) -> bool {
        self.counts.contains_key(mer)
    }

    /// K-mers in ascending lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(m, &c)| (m.as_str(), c))
    }

    /// Write `kmer\tcount` lines, one per k-mer, in k-mer order.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path).map_err(|e| Error::io(e, path))?;
        let mut writer = BufWriter::new(file);
        for (mer, count) in &self.counts {
            writeln!(writer, "{}\t{}", mer, count).map_err(|e| Error::io(e, path))?;
        }
        writer.flush().map_err(|e| Error::io(e, path))?;
        info!(
            "Wrote {} sample-only kmers to {}",
            self.counts.len(),
            path.display()
        );
        Ok(())
    }
}

impl FromIterator<(String, u32)> for SampleKmers {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        SampleKmers {
            counts: iter.into_iter().collect(),
        }
    }
}
