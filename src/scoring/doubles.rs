//! Deterministic scorer doubles for tests and dry runs: a perfect oracle, an
//! uninformative coin, a noisy oracle and an always-failing scorer.

use ahash::{AHashMap, RandomState};
use anyhow::{anyhow, Result};
use std::hash::{BuildHasher, Hash, Hasher};

use crate::core::ContigId;
use crate::scoring::{LatentPair, PairFeatures, SimilarityScorer};

/// Ground-truth genome membership for contigs, the oracle behind the
/// perfect/noisy doubles.
#[derive(Debug, Clone, Default)]
pub struct GenomeTruth {
    genomes: AHashMap<ContigId, usize>,
}

impl GenomeTruth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, contig: impl Into<ContigId>, genome: usize) {
        self.genomes.insert(contig.into(), genome);
    }

    pub fn from_groups<I, C>(groups: I) -> Self
    where
        I: IntoIterator<Item = Vec<C>>,
        C: Into<ContigId>,
    {
        let mut truth = Self::new();
        for (genome, members) in groups.into_iter().enumerate() {
            for contig in members {
                truth.assign(contig, genome);
            }
        }
        truth
    }

    pub fn same_genome(&self, a: &str, b: &str) -> bool {
        match (self.genomes.get(a), self.genomes.get(b)) {
            (Some(ga), Some(gb)) => ga == gb,
            _ => false,
        }
    }
}

/// Returns 1.0 for same-genome pairs and 0.0 otherwise.
#[derive(Debug, Clone)]
pub struct PerfectScorer {
    truth: GenomeTruth,
}

impl PerfectScorer {
    pub fn new(truth: GenomeTruth) -> Self {
        Self { truth }
    }
}

impl SimilarityScorer for PerfectScorer {
    fn score_batch(&self, pairs: &[PairFeatures]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|p| {
                if p.a.contig == p.b.contig || self.truth.same_genome(&p.a.contig, &p.b.contig) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn score_latent_batch(&self, pairs: &[LatentPair]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|p| {
                if p.contig_a == p.contig_b || self.truth.same_genome(&p.contig_a, &p.contig_b) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }
}

/// Always returns 0.5: with a strict decision threshold of 0.5 this casts no
/// votes at all, producing an empty graph.
#[derive(Debug, Clone, Default)]
pub struct UninformativeScorer;

impl SimilarityScorer for UninformativeScorer {
    fn score_batch(&self, pairs: &[PairFeatures]) -> Result<Vec<f32>> {
        Ok(vec![0.5; pairs.len()])
    }

    fn score_latent_batch(&self, pairs: &[LatentPair]) -> Result<Vec<f32>> {
        Ok(vec![0.5; pairs.len()])
    }
}

/// Perfect oracle with deterministic per-pair noise: the same pair always
/// gets the same perturbed probability, regardless of batch composition.
#[derive(Debug, Clone)]
pub struct NoisyScorer {
    truth: GenomeTruth,
    amplitude: f32,
    hasher: RandomState,
}

impl NoisyScorer {
    pub fn new(truth: GenomeTruth, amplitude: f32, seed: u64) -> Self {
        Self {
            truth,
            amplitude,
            hasher: RandomState::with_seeds(seed, seed ^ 0x9e37_79b9, seed << 1, !seed),
        }
    }

    fn noise(&self, a: &str, start_a: usize, b: &str, start_b: usize) -> f32 {
        let mut h = self.hasher.build_hasher();
        // Order-normalized so (a, b) and (b, a) perturb identically
        if (a, start_a) <= (b, start_b) {
            (a, start_a, b, start_b).hash(&mut h);
        } else {
            (b, start_b, a, start_a).hash(&mut h);
        }
        let unit = (h.finish() >> 11) as f32 / (1u64 << 53) as f32;
        (unit * 2.0 - 1.0) * self.amplitude
    }

    fn perturbed(&self, base: f32, a: &str, start_a: usize, b: &str, start_b: usize) -> f32 {
        (base + self.noise(a, start_a, b, start_b)).clamp(0.0, 1.0)
    }
}

impl SimilarityScorer for NoisyScorer {
    fn score_batch(&self, pairs: &[PairFeatures]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|p| {
                let base = if p.a.contig == p.b.contig
                    || self.truth.same_genome(&p.a.contig, &p.b.contig)
                {
                    1.0
                } else {
                    0.0
                };
                self.perturbed(base, &p.a.contig, p.a.start, &p.b.contig, p.b.start)
            })
            .collect())
    }

    fn score_latent_batch(&self, pairs: &[LatentPair]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|p| {
                let base = if p.contig_a == p.contig_b
                    || self.truth.same_genome(&p.contig_a, &p.contig_b)
                {
                    1.0
                } else {
                    0.0
                };
                self.perturbed(base, &p.contig_a, 0, &p.contig_b, 0)
            })
            .collect())
    }
}

/// Fails every invocation; exercises the `ScorerFailure` path.
#[derive(Debug, Clone, Default)]
pub struct FailingScorer;

impl SimilarityScorer for FailingScorer {
    fn score_batch(&self, _pairs: &[PairFeatures]) -> Result<Vec<f32>> {
        Err(anyhow!("model backend unavailable"))
    }

    fn score_latent_batch(&self, _pairs: &[LatentPair]) -> Result<Vec<f32>> {
        Err(anyhow!("model backend unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn latent_pair(a: &str, b: &str) -> LatentPair {
        LatentPair {
            contig_a: a.to_string(),
            contig_b: b.to_string(),
            a: Array1::zeros(4),
            b: Array1::zeros(4),
        }
    }

    #[test]
    fn perfect_scorer_follows_truth() {
        let truth = GenomeTruth::from_groups(vec![vec!["a", "b"], vec!["c"]]);
        let scorer = PerfectScorer::new(truth);
        let probs = scorer
            .score_latent_batch(&[latent_pair("a", "b"), latent_pair("a", "c")])
            .unwrap();
        assert_eq!(probs, vec![1.0, 0.0]);
    }

    #[test]
    fn noisy_scorer_is_deterministic_and_bounded() {
        let truth = GenomeTruth::from_groups(vec![vec!["a", "b"]]);
        let scorer = NoisyScorer::new(truth, 0.2, 1234);
        let batch = [latent_pair("a", "b"), latent_pair("a", "zzz")];
        let first = scorer.score_latent_batch(&batch).unwrap();
        let second = scorer.score_latent_batch(&batch).unwrap();
        assert_eq!(first, second);
        assert!(first[0] >= 0.8 && first[0] <= 1.0);
        assert!(first[1] >= 0.0 && first[1] <= 0.2);
    }

    #[test]
    fn noise_is_symmetric_in_pair_order() {
        let truth = GenomeTruth::new();
        let scorer = NoisyScorer::new(truth, 0.3, 7);
        let ab = scorer.score_latent_batch(&[latent_pair("a", "b")]).unwrap();
        let ba = scorer.score_latent_batch(&[latent_pair("b", "a")]).unwrap();
        assert_eq!(ab, ba);
    }
}
