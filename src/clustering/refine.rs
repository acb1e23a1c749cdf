//! Iterative clustering refinement.
//!
//! Starting from the connected components of the pre-graph, each pass
//! re-evaluates every cluster's cohesion with the scorer's latent head and
//! splits clusters below `theta`, then merges cluster pairs whose
//! cross-edge fraction reaches `gamma1` AND whose mean cross score reaches
//! `gamma2`. The loop stops on the first pass with zero changes, or at the
//! pass cap, which is reported as a warning outcome rather than an error.
//!
//! Split and merge decisions depend on seeded sampling of member fragment
//! pairs: results are reproducible only under a fixed seed and scorer. This
//! is inherent run-to-run variance, not a defect to paper over.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clustering::graph::NeighborGraph;
use crate::core::{BinningError, ContigId};
use crate::features::stores::RepresentationStore;
use crate::scoring::{invoke_latent_scorer, LatentPair, SimilarityScorer};
use crate::utils::artifacts::{atomic_write, ArtifactKey, ArtifactWorkspace, WorkspaceLock};
use crate::utils::configuration::BinningConfig;

pub const ASSIGNMENT_ARTIFACT: &str = "assignment";
pub const CHECKPOINT_ARTIFACT: &str = "assignment.checkpoint";
pub const REFINED_GRAPH_FILE: &str = "refined_graph.tsv";
const LOCK_FILE: &str = "refine.lock";

/// Refinement state machine. Any failure (scorer error, missing artifact,
/// integrity violation) lands in `Failed`; there is no partial-success exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefineState {
    Building,
    Refining,
    Converged,
    Failed,
}

/// How the refinement loop ended. Hitting the pass cap is a usable outcome
/// carrying the last-computed assignment, not an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Convergence {
    Converged { passes: usize },
    IterationCapReached { passes: usize },
    Cancelled { passes: usize },
}

/// Final contig → dense cluster label mapping, sorted by contig id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    entries: Vec<(ContigId, u32)>,
}

impl Assignment {
    /// Dense labels from clusters. Callers pass clusters with sorted
    /// members, ordered by first member; labels follow that order.
    pub fn from_clusters(clusters: &[Vec<ContigId>]) -> Self {
        let mut entries: Vec<(ContigId, u32)> = Vec::new();
        for (label, members) in clusters.iter().enumerate() {
            for id in members {
                entries.push((id.clone(), label as u32));
            }
        }
        entries.sort();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn n_clusters(&self) -> usize {
        let mut labels: Vec<u32> = self.entries.iter().map(|(_, l)| *l).collect();
        labels.sort_unstable();
        labels.dedup();
        labels.len()
    }

    pub fn label_of(&self, contig: &str) -> Option<u32> {
        self.entries
            .binary_search_by(|(id, _)| id.as_str().cmp(contig))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContigId, u32)> {
        self.entries.iter().map(|(id, l)| (id, *l))
    }

    /// Regroup into clusters: sorted members, ordered by first member.
    pub fn clusters(&self) -> Vec<Vec<ContigId>> {
        let mut grouped: BTreeMap<u32, Vec<ContigId>> = BTreeMap::new();
        for (id, label) in &self.entries {
            grouped.entry(*label).or_default().push(id.clone());
        }
        let mut clusters: Vec<Vec<ContigId>> = grouped.into_values().collect();
        for c in &mut clusters {
            c.sort();
        }
        clusters.sort_by(|a, b| a[0].cmp(&b[0]));
        clusters
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (id, label) in &self.entries {
            out.push_str(id);
            out.push('\t');
            out.push_str(&label.to_string());
            out.push('\n');
        }
        atomic_write(path, out.as_bytes())
            .with_context(|| format!("failed to persist assignment to {}", path.display()))
    }

    pub fn read_tsv(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read assignment from {}", path.display()))?;
        let mut entries = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (id, label) = match (fields.next(), fields.next()) {
                (Some(id), Some(label)) => (id, label),
                _ => {
                    return Err(BinningError::integrity(format!(
                        "malformed assignment row {} in {}",
                        lineno + 1,
                        path.display()
                    ))
                    .into())
                }
            };
            let label: u32 = label.parse().with_context(|| {
                format!("bad cluster label on row {} of {}", lineno + 1, path.display())
            })?;
            entries.push((id.to_string(), label));
        }
        entries.sort();
        Ok(Self { entries })
    }
}

#[derive(Debug)]
pub struct RefineOutcome {
    pub assignment: Assignment,
    pub convergence: Convergence,
}

/// Refines an owned neighbor graph into the final assignment. The graph is
/// mutated in place (split cuts and cross-cluster edge removal); nothing
/// else holds it during refinement.
pub struct ClusterRefiner<'a> {
    scorer: &'a dyn SimilarityScorer,
    representations: &'a dyn RepresentationStore,
    config: &'a BinningConfig,
}

impl<'a> ClusterRefiner<'a> {
    pub fn new(
        scorer: &'a dyn SimilarityScorer,
        representations: &'a dyn RepresentationStore,
        config: &'a BinningConfig,
    ) -> Self {
        Self {
            scorer,
            representations,
            config,
        }
    }

    /// Run the BUILDING → REFINING → CONVERGED state machine.
    ///
    /// `singletons` are reattached at finalization, each as its own cluster.
    /// With `force=false` a cached assignment with a matching key is
    /// returned unchanged. `cancel` is honored at pass boundaries only; a
    /// checkpoint is written after every pass, and a matching checkpoint is
    /// resumed from instead of restarting at the components.
    pub fn refine(
        &self,
        graph: &mut NeighborGraph,
        singletons: &[ContigId],
        workspace: &ArtifactWorkspace,
        force: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<RefineOutcome> {
        match self.refine_inner(graph, singletons, workspace, force, cancel) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                debug!(state = ?RefineState::Failed, %err, "refinement failed");
                Err(err)
            }
        }
    }

    fn refine_inner(
        &self,
        graph: &mut NeighborGraph,
        singletons: &[ContigId],
        workspace: &ArtifactWorkspace,
        force: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<RefineOutcome> {
        let key = self.assignment_key(graph, singletons);
        let assignment_path = workspace.path(&format!("{ASSIGNMENT_ARTIFACT}.tsv"));

        if !force && workspace.is_current(&key) {
            if let Some(outcome) = self.reuse_cached(&assignment_path, workspace) {
                return Ok(outcome);
            }
        }

        let _lock = WorkspaceLock::acquire(workspace, LOCK_FILE)?;

        let mut state = RefineState::Building;
        debug!(state = ?state, "refinement started");

        // Fail fast while nothing has been written: singletons must be
        // disjoint from the graph, and every node needs a representation.
        for id in singletons {
            if graph.has_node(id) {
                return Err(BinningError::integrity(format!(
                    "contig '{id}' is both a singleton and a graph node"
                ))
                .into());
            }
        }
        for id in graph.nodes() {
            if !self.representations.contains(id) {
                return Err(BinningError::missing(
                    format!("latent representation for contig '{id}'"),
                    "run the representation precompute step before clustering",
                )
                .into());
            }
        }

        let checkpoint_key = self.checkpoint_key(graph, singletons);
        let mut clusters = self.initial_clusters(graph, workspace, &checkpoint_key, force)?;
        info!(clusters = clusters.len(), "initial clusters from connected components");

        state = RefineState::Refining;
        debug!(state = ?state, "refinement loop entered");

        let mut rng = fastrand::Rng::with_seed(self.config.seed);
        let mut passes = 0usize;
        let mut convergence = Convergence::IterationCapReached { passes: 0 };

        while passes < self.config.max_refine_passes {
            passes += 1;
            let mut changes = 0usize;

            // Split phase
            let mut split_result: Vec<Vec<ContigId>> = Vec::with_capacity(clusters.len());
            for members in &clusters {
                if members.len() < 2 {
                    split_result.push(members.clone());
                    continue;
                }
                let cohesion = self.cluster_cohesion(members, &mut rng)?;
                if cohesion < self.config.theta {
                    let parts = split_cluster(graph, members);
                    debug!(
                        cluster_size = members.len(),
                        cohesion,
                        parts = parts.len(),
                        "split low-cohesion cluster"
                    );
                    changes += 1;
                    split_result.extend(parts);
                } else {
                    split_result.push(members.clone());
                }
            }
            let mut clusters_now = normalize_clusters(split_result);

            // Merge phase: both conditions must hold (AND policy)
            let merges = self.merge_pass(graph, &mut clusters_now, &mut rng)?;
            changes += merges;

            clusters = clusters_now;
            info!(pass = passes, changes, clusters = clusters.len(), "refinement pass done");

            // Checkpoint at the pass boundary; cancellation is only
            // honored here so no speculative mid-pass state ever persists.
            let checkpoint = Assignment::from_clusters(&clusters);
            checkpoint.write_tsv(&workspace.path(&format!("{CHECKPOINT_ARTIFACT}.tsv")))?;
            workspace.record(&checkpoint_key, serde_json::json!({ "pass": passes }))?;

            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    convergence = Convergence::Cancelled { passes };
                    info!(passes, "refinement cancelled at pass boundary");
                    break;
                }
            }

            if changes == 0 {
                convergence = Convergence::Converged { passes };
                break;
            }
            convergence = Convergence::IterationCapReached { passes };
        }

        if let Convergence::IterationCapReached { passes } = convergence {
            warn!(
                passes,
                "refinement hit the pass cap before a stable pass; returning last assignment"
            );
        }

        state = match convergence {
            Convergence::Converged { .. } => RefineState::Converged,
            _ => RefineState::Refining,
        };
        debug!(state = ?state, "refinement loop left");

        // Finalize: dense labels, singletons appended as their own clusters
        let mut final_clusters = clusters;
        let mut sorted_singletons: Vec<ContigId> = singletons.to_vec();
        sorted_singletons.sort();
        sorted_singletons.dedup();
        for id in sorted_singletons {
            final_clusters.push(vec![id]);
        }
        let assignment = Assignment::from_clusters(&final_clusters);

        // Persist the refined graph (intra-cluster edges only) and the
        // assignment with its idempotence key.
        let membership: AHashMap<&str, u32> = assignment
            .iter()
            .map(|(id, label)| (id.as_str(), label))
            .collect();
        let cross: Vec<(ContigId, ContigId)> = graph
            .edges()
            .filter(|(u, v, _)| membership.get(u.as_str()) != membership.get(v.as_str()))
            .map(|(u, v, _)| (u.clone(), v.clone()))
            .collect();
        for (u, v) in cross {
            graph.remove_edge(&u, &v);
        }
        graph.write_tsv(&workspace.path(REFINED_GRAPH_FILE))?;

        assignment.write_tsv(&assignment_path)?;
        // A cancelled run leaves the assignment key unrecorded so the next
        // run resumes from the checkpoint instead of trusting this partial
        // result as current.
        if !matches!(convergence, Convergence::Cancelled { .. }) {
            workspace.record(
                &key,
                serde_json::json!({ "convergence": serde_json::to_value(convergence)? }),
            )?;
        }
        info!(
            contigs = assignment.len(),
            clusters = assignment.n_clusters(),
            ?convergence,
            "assignment persisted"
        );

        Ok(RefineOutcome {
            assignment,
            convergence,
        })
    }

    fn assignment_key(&self, graph: &NeighborGraph, singletons: &[ContigId]) -> ArtifactKey {
        let mut sorted: Vec<&ContigId> = singletons.iter().collect();
        sorted.sort();
        ArtifactKey::new(
            ASSIGNMENT_ARTIFACT,
            self.config.refine_params(),
            serde_json::json!({
                "graph": graph.digest(),
                "singletons": sorted,
            }),
        )
    }

    fn checkpoint_key(&self, graph: &NeighborGraph, singletons: &[ContigId]) -> ArtifactKey {
        let mut sorted: Vec<&ContigId> = singletons.iter().collect();
        sorted.sort();
        ArtifactKey::new(
            CHECKPOINT_ARTIFACT,
            self.config.refine_params(),
            serde_json::json!({
                "graph": graph.digest(),
                "singletons": sorted,
            }),
        )
    }

    fn reuse_cached(
        &self,
        assignment_path: &Path,
        workspace: &ArtifactWorkspace,
    ) -> Option<RefineOutcome> {
        let assignment = match Assignment::read_tsv(assignment_path) {
            Ok(a) => a,
            Err(err) => {
                warn!(%err, "cached assignment unreadable; recomputing");
                return None;
            }
        };
        let convergence = workspace
            .sidecar_extra(ASSIGNMENT_ARTIFACT)
            .and_then(|extra| serde_json::from_value(extra.get("convergence")?.clone()).ok())?;
        info!(
            contigs = assignment.len(),
            clusters = assignment.n_clusters(),
            "reusing cached assignment"
        );
        Some(RefineOutcome {
            assignment,
            convergence,
        })
    }

    fn initial_clusters(
        &self,
        graph: &NeighborGraph,
        workspace: &ArtifactWorkspace,
        checkpoint_key: &ArtifactKey,
        force: bool,
    ) -> Result<Vec<Vec<ContigId>>> {
        if !force && workspace.is_current(checkpoint_key) {
            let path = workspace.path(&format!("{CHECKPOINT_ARTIFACT}.tsv"));
            match Assignment::read_tsv(&path) {
                Ok(checkpoint) => {
                    let known = checkpoint
                        .iter()
                        .all(|(id, _)| graph.has_node(id));
                    if known && checkpoint.len() == graph.node_count() {
                        info!(
                            clusters = checkpoint.n_clusters(),
                            "resuming refinement from checkpoint"
                        );
                        return Ok(checkpoint.clusters());
                    }
                    warn!("checkpoint does not cover the current graph; starting fresh");
                }
                Err(err) => warn!(%err, "checkpoint unreadable; starting fresh"),
            }
        }
        Ok(graph.components())
    }

    /// Mean latent similarity over sampled member pairs of one cluster.
    fn cluster_cohesion(&self, members: &[ContigId], rng: &mut fastrand::Rng) -> Result<f32> {
        let m = members.len();
        let total_pairs = m * (m - 1) / 2;
        let picks: Vec<(usize, usize)> = if total_pairs <= self.config.cohesion_pairs {
            (0..m)
                .flat_map(|i| ((i + 1)..m).map(move |j| (i, j)))
                .collect()
        } else {
            let mut seen = AHashSet::new();
            let mut picks = Vec::with_capacity(self.config.cohesion_pairs);
            let mut attempts = 0;
            while picks.len() < self.config.cohesion_pairs && attempts < self.config.cohesion_pairs * 64 {
                attempts += 1;
                let i = rng.usize(0..m);
                let j = rng.usize(0..m);
                if i == j {
                    continue;
                }
                let pair = (i.min(j), i.max(j));
                if seen.insert(pair) {
                    picks.push(pair);
                }
            }
            picks
        };

        let batch = self.latent_batch(
            picks
                .iter()
                .map(|&(i, j)| (&members[i], &members[j]))
                .collect(),
            rng,
        )?;
        let probs = invoke_latent_scorer(self.scorer, &batch)?;
        Ok(mean(&probs))
    }

    /// Mean latent similarity over sampled cross pairs of two clusters.
    fn cross_cohesion(
        &self,
        a: &[ContigId],
        b: &[ContigId],
        rng: &mut fastrand::Rng,
    ) -> Result<f32> {
        let total = a.len() * b.len();
        let picks: Vec<(usize, usize)> = if total <= self.config.cohesion_pairs {
            (0..a.len())
                .flat_map(|i| (0..b.len()).map(move |j| (i, j)))
                .collect()
        } else {
            let mut seen = AHashSet::new();
            let mut picks = Vec::with_capacity(self.config.cohesion_pairs);
            let mut attempts = 0;
            while picks.len() < self.config.cohesion_pairs && attempts < self.config.cohesion_pairs * 64 {
                attempts += 1;
                let pair = (rng.usize(0..a.len()), rng.usize(0..b.len()));
                if seen.insert(pair) {
                    picks.push(pair);
                }
            }
            picks
        };

        let batch = self.latent_batch(
            picks.iter().map(|&(i, j)| (&a[i], &b[j])).collect(),
            rng,
        )?;
        let probs = invoke_latent_scorer(self.scorer, &batch)?;
        Ok(mean(&probs))
    }

    fn latent_batch(
        &self,
        contig_pairs: Vec<(&ContigId, &ContigId)>,
        rng: &mut fastrand::Rng,
    ) -> Result<Vec<LatentPair>> {
        let mut batch = Vec::with_capacity(contig_pairs.len());
        for (a, b) in contig_pairs {
            let la = self.representations.latent(a)?;
            let lb = self.representations.latent(b)?;
            if la.nrows() == 0 || lb.nrows() == 0 {
                return Err(BinningError::missing(
                    format!("latent fragments for contig pair '{a}'/'{b}'"),
                    "representation store holds an empty matrix",
                )
                .into());
            }
            let row_a = la.row(rng.usize(0..la.nrows())).to_owned();
            let row_b = lb.row(rng.usize(0..lb.nrows())).to_owned();
            batch.push(LatentPair {
                contig_a: a.clone(),
                contig_b: b.clone(),
                a: row_a,
                b: row_b,
            });
        }
        Ok(batch)
    }

    /// Merge clusters pairwise: cross-edge fraction must reach `gamma1` AND
    /// mean cross score must reach `gamma2`. Returns the number of merges.
    fn merge_pass(
        &self,
        graph: &NeighborGraph,
        clusters: &mut Vec<Vec<ContigId>>,
        rng: &mut fastrand::Rng,
    ) -> Result<usize> {
        let membership: AHashMap<&str, usize> = clusters
            .iter()
            .enumerate()
            .flat_map(|(ci, members)| members.iter().map(move |id| (id.as_str(), ci)))
            .collect();

        let mut cross_counts: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for (u, v, _) in graph.edges() {
            if let (Some(&cu), Some(&cv)) =
                (membership.get(u.as_str()), membership.get(v.as_str()))
            {
                if cu != cv {
                    *cross_counts.entry((cu.min(cv), cu.max(cv))).or_insert(0) += 1;
                }
            }
        }

        let mut uf: UnionFind<usize> = UnionFind::new(clusters.len());
        let mut merges = 0usize;
        for (&(ci, cj), &count) in &cross_counts {
            let possible = clusters[ci].len() * clusters[cj].len();
            let fraction = count as f32 / possible as f32;
            if fraction < self.config.gamma1 {
                continue;
            }
            let score = self.cross_cohesion(&clusters[ci], &clusters[cj], rng)?;
            if score >= self.config.gamma2 {
                uf.union(ci, cj);
                merges += 1;
                debug!(fraction, score, "merged cluster pair");
            }
        }

        if merges > 0 {
            let mut grouped: BTreeMap<usize, Vec<ContigId>> = BTreeMap::new();
            for (ci, members) in clusters.iter().enumerate() {
                grouped
                    .entry(uf.find(ci))
                    .or_default()
                    .extend(members.iter().cloned());
            }
            *clusters = normalize_clusters(grouped.into_values().collect());
        }
        Ok(merges)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Sort members within clusters and clusters by first member, the canonical
/// order every pass and the final labeling rely on.
fn normalize_clusters(mut clusters: Vec<Vec<ContigId>>) -> Vec<Vec<ContigId>> {
    for c in &mut clusters {
        c.sort();
    }
    clusters.retain(|c| !c.is_empty());
    clusters.sort_by(|a, b| a[0].cmp(&b[0]));
    clusters
}

/// Partition one cluster by cutting its weakest internal edges until the
/// subgraph disconnects (greedy min-cut approximation). Cut edges are
/// removed from the working graph so the split holds in later passes. A
/// cluster with no internal edges falls apart into single members.
fn split_cluster(graph: &mut NeighborGraph, members: &[ContigId]) -> Vec<Vec<ContigId>> {
    let member_set: AHashSet<&str> = members.iter().map(|s| s.as_str()).collect();
    let mut internal: Vec<(ContigId, ContigId, u32)> = graph
        .edges()
        .filter(|(u, v, _)| member_set.contains(u.as_str()) && member_set.contains(v.as_str()))
        .map(|(u, v, w)| (u.clone(), v.clone(), w))
        .collect();
    // weakest votes first; ties by ids keep the cut deterministic
    internal.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| (&a.0, &a.1).cmp(&(&b.0, &b.1))));

    for cut in 1..=internal.len() {
        let parts = components_with_edges(members, &internal[cut..]);
        if parts.len() > 1 {
            for (u, v, _) in &internal[..cut] {
                graph.remove_edge(u, v);
            }
            return parts;
        }
    }
    members.iter().map(|id| vec![id.clone()]).collect()
}

fn components_with_edges(
    members: &[ContigId],
    edges: &[(ContigId, ContigId, u32)],
) -> Vec<Vec<ContigId>> {
    let index: AHashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let mut uf: UnionFind<usize> = UnionFind::new(members.len());
    for (u, v, _) in edges {
        uf.union(index[u.as_str()], index[v.as_str()]);
    }
    let mut grouped: BTreeMap<usize, Vec<ContigId>> = BTreeMap::new();
    for (i, id) in members.iter().enumerate() {
        grouped.entry(uf.find(i)).or_default().push(id.clone());
    }
    normalize_clusters(grouped.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::stores::MemoryRepresentationStore;
    use crate::scoring::doubles::{FailingScorer, GenomeTruth, PerfectScorer};
    use ndarray::Array2;
    use tempfile::tempdir;

    fn repr_store(contigs: &[&str]) -> MemoryRepresentationStore {
        let mut store = MemoryRepresentationStore::new();
        for id in contigs {
            store.insert(id.to_string(), Array2::zeros((4, 8)));
        }
        store
    }

    fn two_genome_graph() -> (NeighborGraph, GenomeTruth) {
        // one spurious low-vote bridge between the genomes
        let mut g = NeighborGraph::new();
        for (u, v, w) in [
            ("a1", "a2", 9),
            ("a2", "a3", 8),
            ("a1", "a3", 9),
            ("b1", "b2", 9),
            ("b2", "b3", 8),
            ("a3", "b1", 1),
        ] {
            g.add_edge(u, v, w).unwrap();
        }
        let truth = GenomeTruth::from_groups(vec![
            vec!["a1", "a2", "a3"],
            vec!["b1", "b2", "b3"],
        ]);
        (g, truth)
    }

    fn test_config() -> BinningConfig {
        BinningConfig {
            max_refine_passes: 10,
            cohesion_pairs: 16,
            seed: 7,
            ..Default::default()
        }
    }

    #[test]
    fn assignment_roundtrip_and_labels() {
        let clusters = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ];
        let assignment = Assignment::from_clusters(&clusters);
        assert_eq!(assignment.n_clusters(), 2);
        assert_eq!(assignment.label_of("a"), Some(0));
        assert_eq!(assignment.label_of("c"), Some(1));
        assert_eq!(assignment.clusters(), clusters);

        let dir = tempdir().unwrap();
        let path = dir.path().join("assignment.tsv");
        assignment.write_tsv(&path).unwrap();
        assert_eq!(Assignment::read_tsv(&path).unwrap(), assignment);
    }

    #[test]
    fn bridged_genomes_are_split_apart() {
        let (mut graph, truth) = two_genome_graph();
        // the bridge makes one initial component
        assert_eq!(graph.components().len(), 1);

        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let outcome = refiner.refine(&mut graph, &[], &ws, false, None).unwrap();
        assert!(matches!(outcome.convergence, Convergence::Converged { .. }));
        assert_eq!(outcome.assignment.n_clusters(), 2);
        assert_eq!(
            outcome.assignment.label_of("a1"),
            outcome.assignment.label_of("a3")
        );
        assert_ne!(
            outcome.assignment.label_of("a1"),
            outcome.assignment.label_of("b1")
        );
        // the weak bridge is gone from the refined graph
        assert_eq!(graph.vote("a3", "b1"), None);
    }

    #[test]
    fn singletons_are_reattached_as_their_own_clusters() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let singles = vec!["zz_single".to_string()];
        let outcome = refiner.refine(&mut graph, &singles, &ws, false, None).unwrap();
        assert_eq!(outcome.assignment.n_clusters(), 3);
        let label = outcome.assignment.label_of("zz_single").unwrap();
        let alone = outcome
            .assignment
            .iter()
            .filter(|(_, l)| *l == label)
            .count();
        assert_eq!(alone, 1);
    }

    #[test]
    fn singleton_overlapping_the_graph_is_fatal() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let err = refiner
            .refine(&mut graph, &["a1".to_string()], &ws, false, None)
            .unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::DataIntegrity { .. }));
    }

    #[test]
    fn missing_representation_is_fatal_before_any_write() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2"]); // b3 missing
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let err = refiner.refine(&mut graph, &[], &ws, false, None).unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::MissingArtifact { .. }));
        assert!(!ws.path("assignment.tsv").exists());
    }

    #[test]
    fn scorer_failure_is_fatal() {
        let (mut graph, _) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let config = test_config();
        let refiner = ClusterRefiner::new(&FailingScorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let err = refiner.refine(&mut graph, &[], &ws, false, None).unwrap_err();
        let binning = err.downcast_ref::<BinningError>().unwrap();
        assert!(matches!(binning, BinningError::ScorerFailure { .. }));
    }

    #[test]
    fn zero_pass_cap_reports_iteration_cap() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let mut config = test_config();
        config.max_refine_passes = 0;
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let outcome = refiner.refine(&mut graph, &[], &ws, false, None).unwrap();
        assert!(matches!(
            outcome.convergence,
            Convergence::IterationCapReached { passes: 0 }
        ));
        // the unrefined component survives as the assignment
        assert_eq!(outcome.assignment.n_clusters(), 1);
    }

    #[test]
    fn cancellation_stops_at_a_pass_boundary_with_a_checkpoint() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let cancel = AtomicBool::new(true);
        let outcome = refiner
            .refine(&mut graph, &[], &ws, false, Some(&cancel))
            .unwrap();
        assert!(matches!(outcome.convergence, Convergence::Cancelled { passes: 1 }));
        assert!(ws.path("assignment.checkpoint.tsv").exists());

        // a cancelled run is not a cached result: the follow-up resumes
        // from the checkpoint and runs to convergence
        let (mut fresh, _) = two_genome_graph();
        let resumed = refiner.refine(&mut fresh, &[], &ws, false, None).unwrap();
        assert!(matches!(resumed.convergence, Convergence::Converged { .. }));
        assert_eq!(resumed.assignment.n_clusters(), 2);
    }

    #[test]
    fn refinement_is_idempotent_at_a_fixed_point() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);

        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();
        let first = refiner.refine(&mut graph, &[], &ws, false, None).unwrap();

        // feed the refined graph back in under a fresh workspace: the
        // already-stable clustering must come back unchanged
        let dir2 = tempdir().unwrap();
        let ws2 = ArtifactWorkspace::new(dir2.path()).unwrap();
        let mut refined = graph.clone();
        let second = refiner.refine(&mut refined, &[], &ws2, false, None).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert!(matches!(second.convergence, Convergence::Converged { passes: 1 }));
    }

    #[test]
    fn cached_assignment_is_reused_without_force() {
        let (mut graph, truth) = two_genome_graph();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let first = refiner.refine(&mut graph.clone(), &[], &ws, false, None).unwrap();
        let bytes = fs::read(ws.path("assignment.tsv")).unwrap();

        let second = refiner.refine(&mut graph, &[], &ws, false, None).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.convergence, second.convergence);
        assert_eq!(bytes, fs::read(ws.path("assignment.tsv")).unwrap());
    }

    #[test]
    fn every_graph_node_gets_exactly_one_label() {
        let (mut graph, truth) = two_genome_graph();
        let node_count = graph.node_count();
        let store = repr_store(&["a1", "a2", "a3", "b1", "b2", "b3"]);
        let scorer = PerfectScorer::new(truth);
        let config = test_config();
        let refiner = ClusterRefiner::new(&scorer, &store, &config);
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();

        let outcome = refiner.refine(&mut graph, &[], &ws, false, None).unwrap();
        assert_eq!(outcome.assignment.len(), node_count);
        assert!(outcome.assignment.n_clusters() <= node_count);
        let mut ids: Vec<&ContigId> = outcome.assignment.iter().map(|(id, _)| id).collect();
        ids.dedup();
        assert_eq!(ids.len(), node_count);
    }
}
