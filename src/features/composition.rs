//! Sequence composition features: k-mer frequency vectors over a 2-bit
//! alphabet encoding, with optional reverse-strand folding and L1
//! normalization. Used both as scorer input and as the cheap ranking metric
//! for neighbor candidate selection.

use ahash::AHashMap;
use anyhow::Result;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

use crate::core::{ContigId, ContigSet};

#[inline]
fn base_code(b: u8) -> Option<usize> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// k-mer frequency vector of a sequence.
///
/// K-mers containing ambiguous bases are skipped. With `rc_fold`, frequencies
/// are folded with their mirror index (`i` + `4^k - 1 - i`) and the first
/// half of the spectrum is kept, halving the dimension. With `normalize`,
/// counts are divided by their sum (all-zero stays all-zero).
pub fn composition_vector(sequence: &str, k: usize, rc_fold: bool, normalize: bool) -> Array1<f32> {
    debug_assert!(k >= 1 && k <= 12, "k-mer size out of supported range");
    let dim = 4usize.pow(k as u32);
    let mask = dim - 1;
    let mut counts = vec![0f32; dim];

    let mut idx = 0usize;
    let mut run = 0usize;
    for &b in sequence.as_bytes() {
        match base_code(b) {
            Some(code) => {
                idx = ((idx << 2) | code) & mask;
                run += 1;
                if run >= k {
                    counts[idx] += 1.0;
                }
            }
            None => {
                run = 0;
                idx = 0;
            }
        }
    }

    let mut freq = if rc_fold {
        let half = dim / 2;
        let mut folded = vec![0f32; half];
        for (i, slot) in folded.iter_mut().enumerate() {
            *slot = counts[i] + counts[dim - 1 - i];
        }
        folded
    } else {
        counts
    };

    if normalize {
        let total: f32 = freq.iter().sum();
        if total > 0.0 {
            for v in freq.iter_mut() {
                *v /= total;
            }
        }
    }

    Array1::from_vec(freq)
}

/// Cosine similarity between two feature vectors; zero if either is all-zero.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let dot = a.dot(&b);
    let na = a.dot(&a).sqrt();
    let nb = b.dot(&b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Whole-contig composition vectors for a contig set, used by the neighbor
/// candidate pre-filter. Construction parallelizes across contigs; lookups
/// and rankings are deterministic regardless of thread count.
pub struct CompositionIndex {
    ids: Vec<ContigId>,
    vectors: Vec<Array1<f32>>,
    index: AHashMap<ContigId, usize>,
}

impl CompositionIndex {
    /// Build the index over the eligible contigs of `set`.
    pub fn from_contigs(set: &ContigSet, k: usize, rc_fold: bool) -> Result<Self> {
        let eligible: Vec<_> = set.eligible().collect();
        let vectors: Vec<Array1<f32>> = eligible
            .par_iter()
            .map(|c| composition_vector(&c.sequence, k, rc_fold, true))
            .collect();
        let ids: Vec<ContigId> = eligible.iter().map(|c| c.id.clone()).collect();
        let mut index = AHashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            index.insert(id.clone(), i);
        }
        Ok(Self {
            ids,
            vectors,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[ContigId] {
        &self.ids
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn vector(&self, pos: usize) -> ArrayView1<'_, f32> {
        self.vectors[pos].view()
    }

    /// Positions of the `max_neighbors` most composition-similar contigs to
    /// `pos`, ranked by cosine similarity, ties broken by contig id so the
    /// ranking is order-independent.
    pub fn top_neighbors(&self, pos: usize, max_neighbors: usize) -> Vec<usize> {
        let me = self.vectors[pos].view();
        let mut ranked: Vec<(f32, usize)> = (0..self.ids.len())
            .filter(|&j| j != pos)
            .map(|j| (cosine_similarity(me, self.vectors[j].view()), j))
            .collect();
        ranked.sort_unstable_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.ids[a.1].cmp(&self.ids[b.1]))
        });
        ranked
            .into_iter()
            .take(max_neighbors)
            .map(|(_, j)| j)
            .collect()
    }
}
