//! # virbin - Viral Metagenome Contig Binning
//!
//! Bins viral genome fragments recovered from metagenomic assemblies into
//! groups likely belonging to the same organism, driven by an opaque learned
//! similarity scorer over sequence composition and read-coverage signal.
//! The core is the pairwise similarity pre-graph construction and the
//! iterative split/merge refinement that turns it into final bin
//! assignments, kept resumable through parameter-keyed cached artifacts.

pub mod clustering;
pub mod core;
pub mod features;
pub mod fragmentation;
pub mod pipeline;
pub mod scoring;
pub mod utils;

// Re-export commonly used types at crate level
pub use crate::clustering::{Assignment, ClusterRefiner, Convergence, NeighborGraph, RefineOutcome};
pub use crate::core::{BinningError, Contig, ContigId, ContigSet, Fragment, FragmentPair};
pub use crate::pipeline::BinningPipeline;
pub use crate::scoring::SimilarityScorer;
pub use crate::utils::{ArtifactWorkspace, BinningConfig};

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate
pub type Error = anyhow::Error;
