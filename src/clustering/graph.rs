//! The sparse neighbor graph: contig nodes and undirected vote-weighted
//! edges. Ordered containers keep iteration, persistence and the derived
//! cache digests deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::hash::{BuildHasher, Hash, Hasher};
use std::path::Path;

use ahash::RandomState;
use anyhow::{Context, Result};
use petgraph::unionfind::UnionFind;

use crate::core::{BinningError, ContigId, ContigSet};
use crate::utils::artifacts::atomic_write;

/// Weighted undirected graph over contigs. Edge weights are vote counts in
/// `[0, n_frags]`; an edge's existence already implies it met the vote
/// threshold at construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborGraph {
    nodes: BTreeSet<ContigId>,
    edges: BTreeMap<(ContigId, ContigId), u32>,
}

impl NeighborGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<ContigId>) {
        self.nodes.insert(id.into());
    }

    /// Insert an undirected edge; key order is normalized. Self-edges are a
    /// data-integrity violation, not a silent skip.
    pub fn add_edge(&mut self, u: impl Into<ContigId>, v: impl Into<ContigId>, votes: u32) -> Result<()> {
        let u = u.into();
        let v = v.into();
        if u == v {
            return Err(BinningError::integrity(format!("self-edge on contig '{u}'")).into());
        }
        self.nodes.insert(u.clone());
        self.nodes.insert(v.clone());
        let key = if u <= v { (u, v) } else { (v, u) };
        self.edges.insert(key, votes);
        Ok(())
    }

    pub fn remove_edge(&mut self, u: &str, v: &str) -> Option<u32> {
        let key = if u <= v {
            (u.to_string(), v.to_string())
        } else {
            (v.to_string(), u.to_string())
        };
        self.edges.remove(&key)
    }

    pub fn vote(&self, u: &str, v: &str) -> Option<u32> {
        let key = if u <= v {
            (u.to_string(), v.to_string())
        } else {
            (v.to_string(), u.to_string())
        };
        self.edges.get(&key).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ContigId> {
        self.nodes.iter()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Edges in normalized, sorted order.
    pub fn edges(&self) -> impl Iterator<Item = (&ContigId, &ContigId, u32)> {
        self.edges.iter().map(|((u, v), &w)| (u, v, w))
    }

    /// Connected components over all edges. Each component is sorted by
    /// contig id; components are sorted by their first member.
    pub fn components(&self) -> Vec<Vec<ContigId>> {
        let ids: Vec<&ContigId> = self.nodes.iter().collect();
        let index: BTreeMap<&ContigId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut uf: UnionFind<usize> = UnionFind::new(ids.len());
        for ((u, v), _) in &self.edges {
            uf.union(index[u], index[v]);
        }

        let mut grouped: BTreeMap<usize, Vec<ContigId>> = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            grouped.entry(uf.find(i)).or_default().push((*id).clone());
        }
        let mut components: Vec<Vec<ContigId>> = grouped.into_values().collect();
        for c in &mut components {
            c.sort();
        }
        components.sort_by(|a, b| a[0].cmp(&b[0]));
        components
    }

    /// Every edge endpoint must be a known, eligible contig; anything else
    /// is fatal.
    pub fn validate_against(&self, contigs: &ContigSet) -> Result<()> {
        for ((u, v), _) in &self.edges {
            for id in [u, v] {
                match contigs.get(id) {
                    None => {
                        return Err(BinningError::integrity(format!(
                            "graph edge references unknown contig '{id}'"
                        ))
                        .into())
                    }
                    Some(c) if !c.eligible() => {
                        return Err(BinningError::integrity(format!(
                            "graph edge references excluded contig '{id}'"
                        ))
                        .into())
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Content digest for idempotence keys. Stable across runs of the same
    /// build for identical node and edge content.
    pub fn digest(&self) -> String {
        let state = RandomState::with_seeds(0x5eed, 0xc0ffee, 0xbadc0de, 0xfeed);
        let mut hasher = state.build_hasher();
        for id in &self.nodes {
            id.hash(&mut hasher);
        }
        for ((u, v), w) in &self.edges {
            (u, v, w).hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    /// Persist as a tab-separated edge list, one `u v votes` row per edge in
    /// sorted order — byte-identical for identical graphs.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for ((u, v), w) in &self.edges {
            out.push_str(u);
            out.push('\t');
            out.push_str(v);
            out.push('\t');
            out.push_str(&w.to_string());
            out.push('\n');
        }
        atomic_write(path, out.as_bytes())
            .with_context(|| format!("failed to persist graph to {}", path.display()))
    }

    /// Load an edge list. Nodes that carry no edges are not in the file;
    /// callers re-add the eligible node set afterwards.
    pub fn read_tsv(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read graph from {}", path.display()))?;
        let mut graph = Self::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (u, v, w) = match (fields.next(), fields.next(), fields.next()) {
                (Some(u), Some(v), Some(w)) => (u, v, w),
                _ => {
                    return Err(BinningError::integrity(format!(
                        "malformed graph row {} in {}",
                        lineno + 1,
                        path.display()
                    ))
                    .into())
                }
            };
            let votes: u32 = w.parse().with_context(|| {
                format!("bad vote count on row {} of {}", lineno + 1, path.display())
            })?;
            graph.add_edge(u, v, votes)?;
        }
        Ok(graph)
    }
}
