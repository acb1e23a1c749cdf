//! Keyed array stores consumed by the binning core.
//!
//! The storage engine itself is an external collaborator; the core only
//! needs read access keyed by contig id. In-memory implementations are
//! provided for tests and for orchestration layers that preload arrays.

use ahash::AHashMap;
use anyhow::Result;
use ndarray::{Array2, ArrayView2};

use crate::core::{BinningError, ContigId};

/// Per-contig read coverage: a `(samples, positions)` depth matrix.
/// Read-only once loaded.
pub trait CoverageStore: Send + Sync {
    fn track(&self, contig: &str) -> Result<ArrayView2<'_, f32>>;
    fn contains(&self, contig: &str) -> bool;
}

/// Per-contig latent fragment representations: a `(n_frags, latent_dim)`
/// matrix precomputed by the scorer's encoder. Lets the refiner re-evaluate
/// cluster cohesion without re-running the full scorer forward pass.
pub trait RepresentationStore: Send + Sync {
    fn latent(&self, contig: &str) -> Result<ArrayView2<'_, f32>>;
    fn contains(&self, contig: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCoverageStore {
    tracks: AHashMap<ContigId, Array2<f32>>,
}

impl MemoryCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contig: impl Into<ContigId>, track: Array2<f32>) {
        self.tracks.insert(contig.into(), track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl CoverageStore for MemoryCoverageStore {
    fn track(&self, contig: &str) -> Result<ArrayView2<'_, f32>> {
        self.tracks
            .get(contig)
            .map(|t| t.view())
            .ok_or_else(|| {
                BinningError::missing(
                    format!("coverage track for contig '{contig}'"),
                    "was the coverage preprocessing step run?",
                )
                .into()
            })
    }

    fn contains(&self, contig: &str) -> bool {
        self.tracks.contains_key(contig)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRepresentationStore {
    latents: AHashMap<ContigId, Array2<f32>>,
}

impl MemoryRepresentationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contig: impl Into<ContigId>, latent: Array2<f32>) {
        self.latents.insert(contig.into(), latent);
    }

    pub fn len(&self) -> usize {
        self.latents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latents.is_empty()
    }
}

impl RepresentationStore for MemoryRepresentationStore {
    fn latent(&self, contig: &str) -> Result<ArrayView2<'_, f32>> {
        self.latents
            .get(contig)
            .map(|t| t.view())
            .ok_or_else(|| {
                BinningError::missing(
                    format!("latent representation for contig '{contig}'"),
                    "was the representation precompute step run?",
                )
                .into()
            })
    }

    fn contains(&self, contig: &str) -> bool {
        self.latents.contains_key(contig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn memory_coverage_store_roundtrip() {
        let mut store = MemoryCoverageStore::new();
        store.insert("c1", arr2(&[[1.0f32, 2.0], [3.0, 4.0]]));
        assert!(store.contains("c1"));
        let track = store.track("c1").unwrap();
        assert_eq!(track.shape(), &[2, 2]);
    }

    #[test]
    fn missing_track_is_a_missing_artifact() {
        let store = MemoryCoverageStore::new();
        let err = store.track("ghost").unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::MissingArtifact { .. }));
    }

    #[test]
    fn missing_latent_is_a_missing_artifact() {
        let store = MemoryRepresentationStore::new();
        let err = store.latent("ghost").unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::MissingArtifact { .. }));
    }
}
