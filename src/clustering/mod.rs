//! Similarity graph construction and iterative refinement clustering.

pub mod graph;
pub mod pregraph;
pub mod refine;

/// Scorer probability above which a fragment-pair comparison counts as one
/// same-genome vote. Strictly greater-than: an exactly uninformative 0.5
/// never votes.
pub const DECISION_THRESHOLD: f32 = 0.5;

pub use graph::NeighborGraph;
pub use pregraph::build_pregraph;
pub use refine::{Assignment, ClusterRefiner, Convergence, RefineOutcome};
