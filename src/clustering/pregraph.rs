//! Pre-graph construction: the bounded approximate neighbor search that
//! turns an O(N²) all-pairs comparison into `max_neighbors × N` scored
//! candidates, then votes edges into the sparse neighbor graph.

use std::collections::BTreeSet;

use anyhow::Result;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::clustering::graph::NeighborGraph;
use crate::clustering::DECISION_THRESHOLD;
use crate::core::{ContigSet, FragmentPair};
use crate::features::composition::CompositionIndex;
use crate::features::stores::CoverageStore;
use crate::fragmentation::candidate_pairs;
use crate::scoring::{invoke_scorer, BatchFeaturizer, SimilarityScorer};
use crate::utils::artifacts::{ArtifactKey, ArtifactWorkspace};
use crate::utils::configuration::BinningConfig;

pub const PRE_GRAPH_ARTIFACT: &str = "pre_graph";

fn pregraph_key(contigs: &ContigSet, config: &BinningConfig) -> ArtifactKey {
    let mut inputs: Vec<String> = contigs
        .eligible()
        .map(|c| format!("{}:{}", c.id, c.length))
        .collect();
    inputs.sort();
    ArtifactKey::new(
        PRE_GRAPH_ARTIFACT,
        config.pregraph_params(),
        serde_json::json!(inputs),
    )
}

/// Build (or reuse) the sparse neighbor graph over the eligible contigs.
///
/// For each contig the composition pre-filter retains the `max_neighbors`
/// most similar candidates; each retained pair is scored over `n_frags`
/// fixed fragment pairs and kept iff its same-genome votes reach
/// `vote_threshold`. Deterministic given identical inputs and scorer.
///
/// With `force=false` and a matching cached artifact the stored graph is
/// returned unchanged; persisting the graph is the only side effect.
pub fn build_pregraph(
    contigs: &ContigSet,
    coverage: &dyn CoverageStore,
    scorer: &dyn SimilarityScorer,
    config: &BinningConfig,
    workspace: &ArtifactWorkspace,
    force: bool,
) -> Result<NeighborGraph> {
    let key = pregraph_key(contigs, config);
    let graph_path = workspace.path(&format!("{PRE_GRAPH_ARTIFACT}.tsv"));

    if !force && workspace.is_current(&key) {
        match NeighborGraph::read_tsv(&graph_path) {
            Ok(mut cached) => {
                cached.validate_against(contigs)?;
                for id in contigs.eligible_ids() {
                    cached.add_node(id);
                }
                info!(
                    nodes = cached.node_count(),
                    edges = cached.edge_count(),
                    "reusing cached pre-graph"
                );
                return Ok(cached);
            }
            // unreadable cache is a miss, not an error
            Err(err) => warn!(%err, "cached pre-graph unreadable; recomputing"),
        }
    }

    let index = CompositionIndex::from_contigs(contigs, config.kmer_size, config.rc_fold)?;
    let n = index.len();

    let mut graph = NeighborGraph::new();
    for id in index.ids() {
        graph.add_node(id.clone());
    }

    if n < 2 {
        warn!(contigs = n, "fewer than two eligible contigs; pre-graph is trivial");
        graph.write_tsv(&graph_path)?;
        workspace.record(&key, serde_json::json!({"edges": 0}))?;
        return Ok(graph);
    }

    // Candidate selection: rank in parallel, then symmetrize. A pair is
    // considered if either endpoint nominated the other, so the result does
    // not depend on contig order.
    let nominations: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| index.top_neighbors(i, config.max_neighbors))
        .collect();
    let mut candidates: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (i, nominated) in nominations.iter().enumerate() {
        for &j in nominated {
            candidates.insert((i.min(j), i.max(j)));
        }
    }
    info!(
        contigs = n,
        candidates = candidates.len(),
        max_neighbors = config.max_neighbors,
        "pre-filter selected candidate pairs"
    );

    let candidate_list: Vec<(usize, usize)> = candidates.into_iter().collect();
    for chunk in candidate_list.chunks(config.load_batch) {
        // featurizer per chunk: the windowing/composition memo is
        // batch-scoped and discarded at the batch boundary
        let mut featurizer = BatchFeaturizer::new(
            contigs,
            coverage,
            config.kmer_size,
            config.rc_fold,
            config.wsize,
            config.wstep,
        );

        let mut flat: Vec<FragmentPair> = Vec::new();
        let mut spans: Vec<(usize, usize, usize)> = Vec::with_capacity(chunk.len());
        for &(i, j) in chunk {
            let (a, b) = match (contigs.get(&index.ids()[i]), contigs.get(&index.ids()[j])) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(crate::core::BinningError::integrity(
                        "composition index references a contig missing from the set",
                    )
                    .into())
                }
            };
            let pairs = candidate_pairs(a, b, config.n_frags, config.fragment_length);
            spans.push((i, j, pairs.len()));
            flat.extend(pairs);
        }

        let features = featurizer.assemble(&flat)?;
        let probs = invoke_scorer(scorer, &features)?;

        let mut offset = 0;
        for (i, j, count) in spans {
            let votes = probs[offset..offset + count]
                .iter()
                .filter(|&&p| p > DECISION_THRESHOLD)
                .count() as u32;
            offset += count;
            if count > 0 && votes >= config.vote_threshold {
                graph.add_edge(index.ids()[i].clone(), index.ids()[j].clone(), votes)?;
            }
        }
    }

    graph.write_tsv(&graph_path)?;
    workspace.record(&key, serde_json::json!({"edges": graph.edge_count()}))?;
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "pre-graph persisted"
    );
    Ok(graph)
}
