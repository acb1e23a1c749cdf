//! Scorer interface and batched feature assembly.
//!
//! The learned similarity model is an external capability: the core only
//! depends on the [`SimilarityScorer`] trait, batched over many pairs per
//! invocation (the model is vectorized; per-pair calls would waste it).
//! Deterministic test doubles live in [`doubles`].

pub mod doubles;

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::core::{BinningError, ContigId, ContigSet, Fragment, FragmentPair};
use crate::features::coverage::WindowCache;
use crate::features::stores::CoverageStore;
use crate::features::composition::composition_vector;

/// Scorer input for one fragment: composition spectrum plus the windowed
/// coverage slice. Arrays are shared so a region featurized once per batch
/// is reused across all pairs that touch it.
#[derive(Debug, Clone)]
pub struct FragmentFeatures {
    pub contig: ContigId,
    pub start: usize,
    pub composition: Arc<Array1<f32>>,
    pub coverage: Arc<Array2<f32>>,
}

/// One scored comparison: two featurized fragments.
#[derive(Debug, Clone)]
pub struct PairFeatures {
    pub a: FragmentFeatures,
    pub b: FragmentFeatures,
}

/// One comparison over precomputed latent fragment vectors, used by the
/// refiner's cohesion re-evaluation.
#[derive(Debug, Clone)]
pub struct LatentPair {
    pub contig_a: ContigId,
    pub contig_b: ContigId,
    pub a: Array1<f32>,
    pub b: Array1<f32>,
}

/// Probability in [0, 1] that two fragments originate from the same
/// organism. `score_batch` runs the full forward pass over raw features;
/// `score_latent_batch` runs only the head over precomputed encoder output.
pub trait SimilarityScorer: Send + Sync {
    fn score_batch(&self, pairs: &[PairFeatures]) -> Result<Vec<f32>>;
    fn score_latent_batch(&self, pairs: &[LatentPair]) -> Result<Vec<f32>>;
}

/// Invoke the scorer on a feature batch, mapping any failure into the
/// [`BinningError::ScorerFailure`] taxonomy and checking the contract that
/// one probability comes back per pair. Never retried here.
pub fn invoke_scorer(scorer: &dyn SimilarityScorer, batch: &[PairFeatures]) -> Result<Vec<f32>> {
    let probs = scorer.score_batch(batch).map_err(|e| BinningError::ScorerFailure {
        message: e.to_string(),
    })?;
    if probs.len() != batch.len() {
        return Err(BinningError::ScorerFailure {
            message: format!(
                "scorer returned {} probabilities for {} pairs",
                probs.len(),
                batch.len()
            ),
        }
        .into());
    }
    Ok(probs)
}

/// Latent-path twin of [`invoke_scorer`].
pub fn invoke_latent_scorer(
    scorer: &dyn SimilarityScorer,
    batch: &[LatentPair],
) -> Result<Vec<f32>> {
    let probs = scorer
        .score_latent_batch(batch)
        .map_err(|e| BinningError::ScorerFailure {
            message: e.to_string(),
        })?;
    if probs.len() != batch.len() {
        return Err(BinningError::ScorerFailure {
            message: format!(
                "scorer returned {} probabilities for {} latent pairs",
                probs.len(),
                batch.len()
            ),
        }
        .into());
    }
    Ok(probs)
}

/// Assembles [`PairFeatures`] for one scoring batch, memoizing composition
/// vectors and windowed coverage per `(contig, start)` region. Create one
/// featurizer per batch and drop it at the batch boundary — the memo is
/// batch-scoped by contract.
pub struct BatchFeaturizer<'a> {
    contigs: &'a ContigSet,
    coverage: &'a dyn CoverageStore,
    kmer_size: usize,
    rc_fold: bool,
    window_cache: WindowCache,
    composition_cache: AHashMap<(ContigId, usize), Arc<Array1<f32>>>,
}

impl<'a> BatchFeaturizer<'a> {
    pub fn new(
        contigs: &'a ContigSet,
        coverage: &'a dyn CoverageStore,
        kmer_size: usize,
        rc_fold: bool,
        wsize: usize,
        wstep: usize,
    ) -> Self {
        Self {
            contigs,
            coverage,
            kmer_size,
            rc_fold,
            window_cache: WindowCache::new(wsize, wstep),
            composition_cache: AHashMap::new(),
        }
    }

    /// Featurize one fragment. Unknown contigs and out-of-bounds fragments
    /// are integrity errors, never skipped.
    pub fn features(&mut self, fragment: &Fragment) -> Result<FragmentFeatures> {
        let contig = self.contigs.get(&fragment.contig).ok_or_else(|| {
            BinningError::integrity(format!(
                "fragment references unknown contig '{}'",
                fragment.contig
            ))
        })?;
        if fragment.end > contig.length {
            return Err(BinningError::integrity(format!(
                "fragment {}:{}-{} exceeds contig length {}",
                fragment.contig, fragment.start, fragment.end, contig.length
            ))
            .into());
        }

        let key = (fragment.contig.clone(), fragment.start);
        let composition = match self.composition_cache.get(&key) {
            Some(cached) => Arc::clone(cached),
            None => {
                let slice = &contig.sequence[fragment.start..fragment.end];
                let vector = Arc::new(composition_vector(slice, self.kmer_size, self.rc_fold, true));
                self.composition_cache.insert(key, Arc::clone(&vector));
                vector
            }
        };
        let coverage = self.window_cache.windowed(self.coverage, fragment)?;

        Ok(FragmentFeatures {
            contig: fragment.contig.clone(),
            start: fragment.start,
            composition,
            coverage,
        })
    }

    /// Featurize a whole batch of pairs, in order.
    pub fn assemble(&mut self, pairs: &[FragmentPair]) -> Result<Vec<PairFeatures>> {
        pairs
            .iter()
            .map(|p| {
                Ok(PairFeatures {
                    a: self.features(&p.a)?,
                    b: self.features(&p.b)?,
                })
            })
            .collect()
    }

    pub fn cached_regions(&self) -> usize {
        self.composition_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Contig;
    use crate::features::stores::MemoryCoverageStore;
    use crate::scoring::doubles::{FailingScorer, UninformativeScorer};

    fn seq(n: usize) -> String {
        "ACGT".chars().cycle().take(n).collect()
    }

    fn fixture() -> (ContigSet, MemoryCoverageStore) {
        let set = ContigSet::from_contigs(vec![
            Contig::new("c1", seq(512)),
            Contig::new("c2", seq(512)),
        ])
        .unwrap();
        let mut store = MemoryCoverageStore::new();
        store.insert("c1", Array2::ones((2, 512)));
        store.insert("c2", Array2::ones((2, 512)));
        (set, store)
    }

    #[test]
    fn assemble_preserves_pair_order_and_memoizes() {
        let (set, store) = fixture();
        let mut featurizer = BatchFeaturizer::new(&set, &store, 4, true, 16, 8);

        let pairs = vec![
            FragmentPair::new(Fragment::new("c1", 0, 128), Fragment::new("c2", 0, 128)),
            FragmentPair::new(Fragment::new("c1", 0, 128), Fragment::new("c2", 64, 192)),
        ];
        let feats = featurizer.assemble(&pairs).unwrap();
        assert_eq!(feats.len(), 2);
        assert_eq!(feats[0].a.contig, "c1");
        // c1:0 appears in both pairs but is featurized once
        assert!(Arc::ptr_eq(&feats[0].a.composition, &feats[1].a.composition));
        assert_eq!(featurizer.cached_regions(), 3);
    }

    #[test]
    fn unknown_contig_is_an_integrity_error() {
        let (set, store) = fixture();
        let mut featurizer = BatchFeaturizer::new(&set, &store, 4, true, 16, 8);
        let err = featurizer
            .features(&Fragment::new("ghost", 0, 128))
            .unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::DataIntegrity { .. }));
    }

    #[test]
    fn scorer_failures_map_into_the_taxonomy() {
        let (set, store) = fixture();
        let mut featurizer = BatchFeaturizer::new(&set, &store, 4, true, 16, 8);
        let pairs = vec![FragmentPair::new(
            Fragment::new("c1", 0, 128),
            Fragment::new("c2", 0, 128),
        )];
        let batch = featurizer.assemble(&pairs).unwrap();

        let err = invoke_scorer(&FailingScorer, &batch).unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::ScorerFailure { .. }));

        let probs = invoke_scorer(&UninformativeScorer, &batch).unwrap();
        assert_eq!(probs, vec![0.5]);
    }
}
