//! K-mer primitives: complements and exact-string k-mer windows.
//!
//! K-mers are compared by exact (uppercase) string identity. No canonical
//! form is taken: the forward and reverse reference strands are counted as
//! separate files, so strand is carried by the k-mer text itself.

/// Complement a single DNA base.
#[inline]
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' | b'a' => b'T',
        b'T' | b't' => b'A',
        b'C' | b'c' => b'G',
        b'G' | b'g' => b'C',
        _ => b'N',
    }
}

/// Reverse complement of a DNA sequence.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

#[inline]
fn is_acgt(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't')
}

/// Start offsets of every ACGT-only window of length `k` in `seq`.
///
/// Uses a running count of consecutive valid bases so each base is inspected
/// once, whatever the value of `k`.
pub fn valid_window_starts(seq: &[u8], k: usize) -> Vec<usize> {
    if k == 0 || seq.len() < k {
        return Vec::new();
    }
    let mut starts = Vec::with_capacity(seq.len() - k + 1);
    let mut valid_run = 0usize;
    for (i, &base) in seq.iter().enumerate() {
        if is_acgt(base) {
            valid_run += 1;
        } else {
            valid_run = 0;
        }
        if valid_run >= k {
            starts.push(i + 1 - k);
        }
    }
    starts
}

/// Extract all k-mers of size k from a sequence as uppercase strings.
/// Skips windows containing non-ACGT bases.
pub fn extract_kmers(seq: &[u8], k: usize) -> Vec<String> {
    valid_window_starts(seq, k)
        .into_iter()
        .map(|i| {
            let upper: Vec<u8> = seq[i..i + k].iter().map(|b| b.to_ascii_uppercase()).collect();
            // ACGT-only windows are always valid UTF-8
            String::from_utf8_lossy(&upper).into_owned()
        })
        .collect()
}
