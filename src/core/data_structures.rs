use ahash::AHashMap;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Core data structures for the binning pipeline: contigs, fragments and
/// fragment pairs. Coverage tracks live behind the store traits in
/// `features::stores`.
///
/// Contig identifiers are the assembly's sequence names, kept as strings so
/// artifacts stay joinable with the upstream FASTA/BAM world.
pub type ContigId = String;

/// An assembled contiguous sequence, candidate viral genome fragment.
///
/// Immutable once loaded; the `filtered` and `singleton` flags are the only
/// state that changes, and only through [`ContigSet`] preprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contig {
    pub id: ContigId,
    pub sequence: String,
    pub length: usize,
    /// Failed the minimum-length filter; never enters fragmentation.
    pub filtered: bool,
    /// Too low prevalence across samples to carry coverage signal; excluded
    /// from graph construction but reattached as its own cluster at the end.
    pub singleton: bool,
}

impl Contig {
    pub fn new(id: impl Into<ContigId>, sequence: impl Into<String>) -> Self {
        let sequence = sequence.into();
        let length = sequence.len();
        Self {
            id: id.into(),
            sequence,
            length,
            filtered: false,
            singleton: false,
        }
    }

    /// Number of fragments at `fragment_step` spacing, zero if the contig is
    /// shorter than one fragment.
    pub fn fragment_count(&self, fragment_length: usize, fragment_step: usize) -> usize {
        if self.length < fragment_length {
            return 0;
        }
        (self.length - fragment_length) / fragment_step + 1
    }

    /// Whether this contig participates in graph construction.
    pub fn eligible(&self) -> bool {
        !self.filtered && !self.singleton
    }
}

/// A contiguous sub-region `[start, end)` of a contig, the atomic unit
/// compared by the scorer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fragment {
    pub contig: ContigId,
    pub start: usize,
    pub end: usize,
}

impl Fragment {
    pub fn new(contig: impl Into<ContigId>, start: usize, end: usize) -> Self {
        Self {
            contig: contig.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// True if the two fragments share any positions on the same contig.
    pub fn overlaps(&self, other: &Fragment) -> bool {
        self.contig == other.contig && self.start < other.end && other.start < self.end
    }
}

/// Two fragments compared by the scorer. Positive means both fragments come
/// from the same contig (training label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentPair {
    pub a: Fragment,
    pub b: Fragment,
    pub is_positive: bool,
}

impl FragmentPair {
    pub fn new(a: Fragment, b: Fragment) -> Self {
        let is_positive = a.contig == b.contig;
        Self { a, b, is_positive }
    }

    /// Order-normalized key for deduplication: (a, b) and (b, a) are the
    /// same comparison.
    pub fn dedup_key(&self) -> (Fragment, Fragment) {
        if self.a <= self.b {
            (self.a.clone(), self.b.clone())
        } else {
            (self.b.clone(), self.a.clone())
        }
    }
}

/// Ordered collection of contigs with id lookup.
///
/// Preprocessing never removes entries, it only flags them, so every contig
/// present in the input reappears in the final assignment.
#[derive(Debug, Clone, Default)]
pub struct ContigSet {
    contigs: Vec<Contig>,
    index: AHashMap<ContigId, usize>,
}

impl ContigSet {
    pub fn from_contigs(contigs: Vec<Contig>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(contigs.len());
        for (i, contig) in contigs.iter().enumerate() {
            if index.insert(contig.id.clone(), i).is_some() {
                return Err(anyhow!("duplicate contig id: {}", contig.id));
            }
        }
        Ok(Self { contigs, index })
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Contig> {
        self.index.get(id).map(|&i| &self.contigs[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contig> {
        self.contigs.iter()
    }

    /// Contigs that survive both the length and the prevalence filters.
    pub fn eligible(&self) -> impl Iterator<Item = &Contig> {
        self.contigs.iter().filter(|c| c.eligible())
    }

    /// Eligible contig ids in input order.
    pub fn eligible_ids(&self) -> Vec<ContigId> {
        self.eligible().map(|c| c.id.clone()).collect()
    }

    /// Flag contigs shorter than `min_length`. Returns how many were flagged
    /// by this call.
    pub fn filter_by_length(&mut self, min_length: usize) -> usize {
        let before = self.contigs.iter().filter(|c| !c.filtered).count();
        for contig in &mut self.contigs {
            if contig.length < min_length {
                contig.filtered = true;
            }
        }
        let after = self.contigs.iter().filter(|c| !c.filtered).count();
        info!(
            min_length,
            before, after, "length filter applied to contig set"
        );
        before - after
    }

    pub fn mark_singleton(&mut self, id: &str) -> Result<()> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| anyhow!("cannot mark unknown contig as singleton: {id}"))?;
        self.contigs[idx].singleton = true;
        Ok(())
    }

    /// Ids flagged singleton, in input order.
    pub fn singleton_ids(&self) -> Vec<ContigId> {
        self.contigs
            .iter()
            .filter(|c| c.singleton && !c.filtered)
            .map(|c| c.id.clone())
            .collect()
    }
}
