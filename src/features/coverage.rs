//! Coverage windowing: the fixed-shape transform between raw per-base depth
//! tracks and the scorer's coverage input.
//!
//! A fragment slice of shape `(samples, length)` becomes
//! `(samples, ceil((length - wsize + 1) / wstep))`: a centered moving average
//! (boxcar kernel, valid-mode convolution) followed by decimation. Identical
//! for every fragment of the same length, so vote counts stay comparable.

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::info;

use crate::core::{BinningError, ContigId, ContigSet, Fragment};
use crate::features::stores::CoverageStore;

/// Moving average over `x` with a boxcar kernel of weight `1/wsize`
/// (valid mode), decimated by `wstep`.
///
/// Output length is exactly `ceil((len - wsize + 1) / wstep)`; empty when
/// `len < wsize` — callers guarantee `fragment_length >= wsize`.
pub fn avg_window(x: ArrayView1<f32>, wsize: usize, wstep: usize) -> Array1<f32> {
    let len = x.len();
    if len < wsize {
        return Array1::zeros(0);
    }
    let conv_len = len - wsize + 1;
    let out_len = conv_len.div_ceil(wstep);

    // Prefix sums in f64 keep long windows numerically stable.
    let mut prefix = vec![0f64; len + 1];
    for (i, &v) in x.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v as f64;
    }

    let mut out = Array1::zeros(out_len);
    for j in 0..out_len {
        let start = j * wstep;
        let mean = (prefix[start + wsize] - prefix[start]) / wsize as f64;
        out[j] = mean as f32;
    }
    out
}

/// Apply [`avg_window`] along the position axis of a `(samples, length)`
/// coverage slice. Pure function.
pub fn window_track(track: ArrayView2<f32>, wsize: usize, wstep: usize) -> Array2<f32> {
    let samples = track.nrows();
    let len = track.ncols();
    let out_len = if len < wsize {
        0
    } else {
        (len - wsize + 1).div_ceil(wstep)
    };
    let mut out = Array2::zeros((samples, out_len));
    if out_len == 0 {
        return out;
    }
    for (s, row) in track.rows().into_iter().enumerate() {
        let windowed = avg_window(row, wsize, wstep);
        out.row_mut(s).assign(&windowed);
    }
    out
}

/// Batch-scoped memo for windowed coverage regions.
///
/// The same `(contig, start)` region appears in many pairs of one scoring
/// batch; windowing it once per batch is the contract from the original
/// system. Drop (or `clear`) the cache at the batch boundary.
pub struct WindowCache {
    wsize: usize,
    wstep: usize,
    entries: AHashMap<(ContigId, usize), Arc<Array2<f32>>>,
    hits: usize,
    misses: usize,
}

impl WindowCache {
    pub fn new(wsize: usize, wstep: usize) -> Self {
        Self {
            wsize,
            wstep,
            entries: AHashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Windowed coverage for one fragment, memoized by `(contig, start)`.
    pub fn windowed(
        &mut self,
        store: &dyn CoverageStore,
        fragment: &Fragment,
    ) -> Result<Arc<Array2<f32>>> {
        let key = (fragment.contig.clone(), fragment.start);
        if let Some(cached) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(cached));
        }
        self.misses += 1;

        let track = store.track(&fragment.contig)?;
        if fragment.end > track.ncols() {
            return Err(BinningError::integrity(format!(
                "fragment {}:{}-{} exceeds coverage track length {}",
                fragment.contig,
                fragment.start,
                fragment.end,
                track.ncols()
            ))
            .into());
        }
        let slice = track.slice(ndarray::s![.., fragment.start..fragment.end]);
        let windowed = Arc::new(window_track(slice, self.wsize, self.wstep));
        self.entries.insert(key, Arc::clone(&windowed));
        Ok(windowed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.hits
    }
}

/// Flag contigs whose coverage is present in fewer than `min_prevalence`
/// samples as singletons. Returns the newly flagged ids.
///
/// Singletons are excluded from graph construction (no usable coverage
/// signal) and reattached by the refiner, each as its own cluster. A contig
/// with no coverage track at all is a missing artifact, not a singleton.
pub fn detect_singletons(
    contigs: &mut ContigSet,
    store: &dyn CoverageStore,
    min_prevalence: usize,
) -> Result<Vec<ContigId>> {
    let candidate_ids: Vec<ContigId> = contigs.eligible_ids();
    let mut flagged = Vec::new();

    for id in candidate_ids {
        let track = store.track(&id)?;
        let prevalence = track
            .rows()
            .into_iter()
            .filter(|row| row.iter().any(|&d| d > 0.0))
            .count();
        if prevalence < min_prevalence {
            contigs.mark_singleton(&id)?;
            flagged.push(id);
        }
    }

    info!(
        min_prevalence,
        singletons = flagged.len(),
        remaining = contigs.eligible().count(),
        "prevalence filter applied"
    );
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Contig;
    use crate::features::stores::MemoryCoverageStore;
    use ndarray::arr1;

    fn seq(n: usize) -> String {
        "ACGT".chars().cycle().take(n).collect()
    }

    #[test]
    fn output_length_matches_formula() {
        for (len, wsize, wstep) in [(64, 16, 8), (100, 16, 8), (33, 4, 5), (16, 16, 1), (17, 16, 4)]
        {
            let x = Array1::from_elem(len, 1.0f32);
            let out = avg_window(x.view(), wsize, wstep);
            let expected = (len - wsize + 1).div_ceil(wstep);
            assert_eq!(out.len(), expected, "len={len} wsize={wsize} wstep={wstep}");
        }
    }

    #[test]
    fn constant_input_yields_constant_output() {
        let x = Array1::from_elem(128, 7.25f32);
        let out = avg_window(x.view(), 16, 8);
        for &v in out.iter() {
            assert!((v - 7.25).abs() < 1e-6);
        }
    }

    #[test]
    fn too_short_input_yields_empty() {
        let x = arr1(&[1.0f32, 2.0, 3.0]);
        assert_eq!(avg_window(x.view(), 16, 8).len(), 0);
        let track = Array2::ones((3, 5));
        assert_eq!(window_track(track.view(), 16, 8).ncols(), 0);
    }

    #[test]
    fn moving_average_values() {
        let x = arr1(&[0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = avg_window(x.view(), 2, 1);
        assert_eq!(out.len(), 5);
        for (i, &v) in out.iter().enumerate() {
            assert!((v - (i as f32 + 0.5)).abs() < 1e-6);
        }
        // decimated
        let out = avg_window(x.view(), 2, 2);
        assert_eq!(out.len(), 3);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 2.5).abs() < 1e-6);
        assert!((out[2] - 4.5).abs() < 1e-6);
    }

    #[test]
    fn window_track_keeps_sample_axis() {
        let mut track = Array2::zeros((2, 32));
        track.row_mut(0).fill(1.0);
        track.row_mut(1).fill(3.0);
        let out = window_track(track.view(), 8, 4);
        assert_eq!(out.nrows(), 2);
        assert!(out.row(0).iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(out.row(1).iter().all(|&v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn cache_reuses_regions_within_a_batch() {
        let mut store = MemoryCoverageStore::new();
        store.insert("c1", Array2::ones((2, 64)));
        let mut cache = WindowCache::new(16, 8);

        let frag = Fragment::new("c1", 0, 32);
        let first = cache.windowed(&store, &frag).unwrap();
        let second = cache.windowed(&store, &frag).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn fragment_beyond_track_is_integrity_error() {
        let mut store = MemoryCoverageStore::new();
        store.insert("c1", Array2::ones((2, 16)));
        let mut cache = WindowCache::new(4, 2);
        let err = cache
            .windowed(&store, &Fragment::new("c1", 0, 64))
            .unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::DataIntegrity { .. }));
    }

    #[test]
    fn singleton_detection_by_prevalence() {
        let mut set = ContigSet::from_contigs(vec![
            Contig::new("covered", seq(3000)),
            Contig::new("sparse", seq(3000)),
        ])
        .unwrap();

        let mut store = MemoryCoverageStore::new();
        store.insert("covered", Array2::ones((3, 3000)));
        let mut sparse = Array2::zeros((3, 3000));
        sparse.row_mut(0).fill(2.0); // present in one sample only
        store.insert("sparse", sparse);

        let flagged = detect_singletons(&mut set, &store, 2).unwrap();
        assert_eq!(flagged, vec!["sparse".to_string()]);
        assert_eq!(set.eligible_ids(), vec!["covered".to_string()]);
    }

    #[test]
    fn singleton_detection_requires_tracks() {
        let mut set = ContigSet::from_contigs(vec![Contig::new("ghost", seq(3000))]).unwrap();
        let store = MemoryCoverageStore::new();
        assert!(detect_singletons(&mut set, &store, 2).is_err());
    }
}
