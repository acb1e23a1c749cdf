pub mod composition;
pub mod coverage;
pub mod stores;

pub use composition::{composition_vector, cosine_similarity, CompositionIndex};
pub use coverage::{avg_window, detect_singletons, window_track, WindowCache};
pub use stores::{CoverageStore, MemoryCoverageStore, MemoryRepresentationStore, RepresentationStore};
