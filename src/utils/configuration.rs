//! Typed configuration for the binning core.
//!
//! One struct enumerates every recognized option with its default, validated
//! once at construction. Components receive a reference; there is no
//! process-wide configuration state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::BinningError;

/// All tunables of the binning core. Serialized as the run manifest next to
/// the artifacts so a run is reproducible from its output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// K-mer size for composition features (tetranucleotides by default).
    pub kmer_size: usize,
    /// Fold k-mer counts with their mirror index (strand-insensitive).
    pub rc_fold: bool,
    /// Fragment length in bp, the atomic comparison unit.
    pub fragment_length: usize,
    /// Spacing between successive fragment starts when fragmenting a contig.
    pub fragment_step: usize,
    /// Coverage smoothing window (boxcar width), in bp.
    pub wsize: usize,
    /// Decimation step after smoothing.
    pub wstep: usize,
    /// Fragment pairs sampled per contig pair during graph construction.
    pub n_frags: usize,
    /// Candidate neighbors retained per contig by the composition pre-filter.
    pub max_neighbors: usize,
    /// Minimum same-genome votes for an edge to exist.
    pub vote_threshold: u32,
    /// Cluster cohesion floor; below it a cluster is split.
    pub theta: f32,
    /// Merge condition on the cross-edge fraction between two clusters.
    pub gamma1: f32,
    /// Merge condition on the mean cross-cluster score.
    pub gamma2: f32,
    /// Contigs shorter than this are excluded from binning.
    pub min_ctg_len: usize,
    /// Minimum number of samples with coverage for a contig to carry signal;
    /// below it the contig is a singleton.
    pub min_prevalence: usize,
    /// Fraction of contigs held out as the test group for pair sampling.
    pub test_ratio: f32,
    /// Contig pairs scored per batched scorer invocation.
    pub load_batch: usize,
    /// Refinement pass cap; 0 skips refinement and keeps the initial
    /// components.
    pub max_refine_passes: usize,
    /// Member pairs sampled when re-evaluating a cluster's cohesion.
    pub cohesion_pairs: usize,
    /// Seed for every RNG in the run. Clustering results are reproducible
    /// only under a fixed seed and scorer.
    pub seed: u64,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            kmer_size: 4,
            rc_fold: true,
            fragment_length: 1024,
            fragment_step: 128,
            wsize: 16,
            wstep: 8,
            n_frags: 30,
            max_neighbors: 100,
            vote_threshold: 15,
            theta: 0.8,
            gamma1: 0.1,
            gamma2: 0.75,
            min_ctg_len: 2048,
            min_prevalence: 2,
            test_ratio: 0.1,
            load_batch: 200,
            max_refine_passes: 20,
            cohesion_pairs: 50,
            seed: 0,
        }
    }
}

impl BinningConfig {
    /// Validate every field once; constructors of the pipeline components
    /// assume a validated config.
    pub fn validate(&self) -> Result<()> {
        let fail = |field: &str, reason: String| -> Result<()> {
            Err(BinningError::InvalidConfig {
                field: field.to_string(),
                reason,
            }
            .into())
        };

        if self.kmer_size == 0 || self.kmer_size > 8 {
            return fail("kmer_size", format!("{} not in 1..=8", self.kmer_size));
        }
        if self.fragment_length == 0 {
            return fail("fragment_length", "must be positive".into());
        }
        if self.fragment_step == 0 {
            return fail("fragment_step", "must be positive".into());
        }
        if self.wsize == 0 || self.wstep == 0 {
            return fail("wsize/wstep", "must be positive".into());
        }
        if self.fragment_length < self.wsize {
            return fail(
                "wsize",
                format!(
                    "window {} larger than fragment length {}",
                    self.wsize, self.fragment_length
                ),
            );
        }
        if self.n_frags == 0 {
            return fail("n_frags", "must be positive".into());
        }
        if self.vote_threshold as usize > self.n_frags {
            return fail(
                "vote_threshold",
                format!(
                    "{} exceeds n_frags {} (no edge could ever form)",
                    self.vote_threshold, self.n_frags
                ),
            );
        }
        if self.max_neighbors == 0 {
            return fail("max_neighbors", "must be positive".into());
        }
        for (name, value) in [
            ("theta", self.theta),
            ("gamma1", self.gamma1),
            ("gamma2", self.gamma2),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(name, format!("{value} not in [0, 1]"));
            }
        }
        if self.min_ctg_len < self.fragment_length {
            return fail(
                "min_ctg_len",
                format!(
                    "{} below fragment length {}",
                    self.min_ctg_len, self.fragment_length
                ),
            );
        }
        if !(0.0..1.0).contains(&self.test_ratio) {
            return fail("test_ratio", format!("{} not in [0, 1)", self.test_ratio));
        }
        if self.load_batch == 0 {
            return fail("load_batch", "must be positive".into());
        }
        if self.cohesion_pairs == 0 {
            return fail("cohesion_pairs", "must be positive".into());
        }
        Ok(())
    }

    /// Write the run manifest.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write run manifest to {}", path.display()))
    }

    /// Load and validate a manifest.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read run manifest from {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("malformed run manifest at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The scorer-side parameters that define artifact compatibility.
    pub fn pregraph_params(&self) -> serde_json::Value {
        serde_json::json!({
            "kmer_size": self.kmer_size,
            "rc_fold": self.rc_fold,
            "fragment_length": self.fragment_length,
            "wsize": self.wsize,
            "wstep": self.wstep,
            "n_frags": self.n_frags,
            "max_neighbors": self.max_neighbors,
            "vote_threshold": self.vote_threshold,
        })
    }

    /// Refinement parameters that define assignment compatibility.
    pub fn refine_params(&self) -> serde_json::Value {
        serde_json::json!({
            "vote_threshold": self.vote_threshold,
            "n_frags": self.n_frags,
            "theta": self.theta,
            "gamma1": self.gamma1,
            "gamma2": self.gamma2,
            "max_refine_passes": self.max_refine_passes,
            "cohesion_pairs": self.cohesion_pairs,
            "seed": self.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_validate() {
        BinningConfig::default().validate().unwrap();
    }

    #[test]
    fn invalid_fields_are_rejected_with_the_field_name() {
        let mut config = BinningConfig::default();
        config.vote_threshold = 1000;
        let err = config.validate().unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        match binning {
            BinningError::InvalidConfig { field, .. } => assert_eq!(field, "vote_threshold"),
            other => panic!("unexpected error: {other:?}"),
        }

        let mut config = BinningConfig::default();
        config.theta = 1.5;
        assert!(config.validate().is_err());

        let mut config = BinningConfig::default();
        config.wsize = 4096; // larger than fragment
        assert!(config.validate().is_err());
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = BinningConfig::default();
        config.seed = 99;
        config.theta = 0.65;
        config.to_json_file(&path).unwrap();
        let loaded = BinningConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn zero_refine_passes_is_allowed() {
        let mut config = BinningConfig::default();
        config.max_refine_passes = 0;
        config.validate().unwrap();
    }
}
