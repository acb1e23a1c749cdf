//! Fragment pair sampling.
//!
//! Training mode draws labeled positive/negative fragment pairs for the
//! scorer; inference mode produces the fixed candidate pairs the graph
//! builder votes over. All randomness flows through an explicit seeded
//! [`fastrand::Rng`], never a global one.

use ahash::AHashSet;
use anyhow::Result;
use tracing::{debug, info};

use crate::core::{BinningError, Contig, ContigId, ContigSet, Fragment, FragmentPair};

/// Attempt multiplier before giving up on a sampling target. Dedup can make
/// the tail of a draw slow when the feasible pool is barely large enough.
const MAX_ATTEMPT_FACTOR: usize = 64;

fn fragment_start(index: usize, fragment_step: usize) -> usize {
    index * fragment_step
}

fn fragment_at(contig: &Contig, index: usize, fragment_length: usize, fragment_step: usize) -> Fragment {
    let start = fragment_start(index, fragment_step);
    Fragment::new(contig.id.clone(), start, start + fragment_length)
}

/// Contigs long enough to yield at least one fragment. Filtered and
/// singleton contigs never reach the sampler.
fn fragmentable<'a>(contigs: &'a ContigSet, fragment_length: usize) -> Vec<&'a Contig> {
    contigs
        .eligible()
        .filter(|c| c.length >= fragment_length)
        .collect()
}

/// Sample `n_examples` labeled fragment pairs: `n_examples / 2` positives
/// (two fragments of the same contig, non-overlapping whenever the contig is
/// long enough) and the rest negatives (fragments of two distinct contigs).
///
/// Pairs are deduplicated; the requested count must stay within the feasible
/// pair count or this fails with `InsufficientData`. Also fails when fewer
/// than two fragmentable contigs exist (negatives impossible).
pub fn sample_training_pairs(
    contigs: &ContigSet,
    n_examples: usize,
    fragment_step: usize,
    fragment_length: usize,
    rng: &mut fastrand::Rng,
) -> Result<Vec<FragmentPair>> {
    let pool = fragmentable(contigs, fragment_length);
    if pool.len() < 2 {
        return Err(BinningError::insufficient(
            2,
            pool.len(),
            "training pair sampling (negative pairs need two contigs)",
        )
        .into());
    }

    let n_pos = n_examples / 2;
    let n_neg = n_examples - n_pos;

    let frag_counts: Vec<usize> = pool
        .iter()
        .map(|c| c.fragment_count(fragment_length, fragment_step))
        .collect();

    // Feasible distinct pairs after dedup, saturating: the bound only needs
    // to be exceeded-or-not, not exact at usize::MAX scale.
    let feasible_pos: usize = frag_counts
        .iter()
        .map(|&n| n.saturating_mul(n.saturating_sub(1)) / 2)
        .fold(0usize, usize::saturating_add);
    let feasible_neg: usize = {
        let total: usize = frag_counts.iter().copied().fold(0usize, usize::saturating_add);
        let squares: usize = frag_counts
            .iter()
            .map(|&n| n.saturating_mul(n))
            .fold(0usize, usize::saturating_add);
        total
            .saturating_mul(total)
            .saturating_sub(squares)
            / 2
    };
    if n_pos > feasible_pos {
        return Err(BinningError::insufficient(n_pos, feasible_pos, "positive pair sampling").into());
    }
    if n_neg > feasible_neg {
        return Err(BinningError::insufficient(n_neg, feasible_neg, "negative pair sampling").into());
    }

    let positive_pool: Vec<usize> = (0..pool.len()).filter(|&i| frag_counts[i] >= 2).collect();

    let mut seen: AHashSet<(Fragment, Fragment)> = AHashSet::with_capacity(n_examples);
    let mut pairs = Vec::with_capacity(n_examples);

    // Positives
    let mut attempts = 0usize;
    let max_attempts = n_pos.saturating_mul(MAX_ATTEMPT_FACTOR).max(MAX_ATTEMPT_FACTOR);
    let mut drawn = 0usize;
    while drawn < n_pos {
        attempts += 1;
        if attempts > max_attempts {
            return Err(BinningError::insufficient(n_pos, drawn, "positive pair sampling").into());
        }
        let ci = positive_pool[rng.usize(0..positive_pool.len())];
        let contig = pool[ci];
        let n = frag_counts[ci];

        // Two fragment starts are disjoint iff their indices differ by at
        // least ceil(fragment_length / fragment_step). Prefer such a partner
        // whenever one exists for the drawn start.
        let gap = fragment_length.div_ceil(fragment_step);
        let ia = rng.usize(0..n);
        let disjoint: Vec<usize> = (0..n)
            .filter(|&j| j + gap <= ia || j >= ia + gap)
            .collect();
        let ib = if !disjoint.is_empty() {
            disjoint[rng.usize(0..disjoint.len())]
        } else {
            let mut b = rng.usize(0..n - 1);
            if b >= ia {
                b += 1;
            }
            b
        };
        let a = fragment_at(contig, ia, fragment_length, fragment_step);
        let b = fragment_at(contig, ib, fragment_length, fragment_step);

        let pair = FragmentPair::new(a, b);
        if seen.insert(pair.dedup_key()) {
            pairs.push(pair);
            drawn += 1;
        }
    }

    // Negatives
    let mut attempts = 0usize;
    let max_attempts = n_neg.saturating_mul(MAX_ATTEMPT_FACTOR).max(MAX_ATTEMPT_FACTOR);
    let mut drawn = 0usize;
    while drawn < n_neg {
        attempts += 1;
        if attempts > max_attempts {
            return Err(BinningError::insufficient(n_neg, drawn, "negative pair sampling").into());
        }
        let ci = rng.usize(0..pool.len());
        let cj = rng.usize(0..pool.len());
        if ci == cj {
            continue;
        }
        let a = fragment_at(pool[ci], rng.usize(0..frag_counts[ci]), fragment_length, fragment_step);
        let b = fragment_at(pool[cj], rng.usize(0..frag_counts[cj]), fragment_length, fragment_step);
        let pair = FragmentPair::new(a, b);
        if seen.insert(pair.dedup_key()) {
            pairs.push(pair);
            drawn += 1;
        }
    }

    rng.shuffle(&mut pairs);
    info!(
        positives = n_pos,
        negatives = n_neg,
        contigs = pool.len(),
        "sampled training pairs"
    );
    Ok(pairs)
}

/// Evenly spaced fragment starts covering a contig, at most `n_frags` of
/// them. Deterministic; duplicate starts on short contigs collapse.
pub fn spaced_fragments(contig: &Contig, n_frags: usize, fragment_length: usize) -> Vec<Fragment> {
    if contig.length < fragment_length || n_frags == 0 {
        return Vec::new();
    }
    let span = contig.length - fragment_length;
    let mut starts: Vec<usize> = if n_frags == 1 {
        vec![0]
    } else {
        (0..n_frags)
            .map(|i| i * span / (n_frags - 1))
            .collect()
    };
    starts.dedup();
    starts
        .into_iter()
        .map(|s| Fragment::new(contig.id.clone(), s, s + fragment_length))
        .collect()
}

/// Inference-mode candidate pairs between two contigs: the i-th spaced
/// fragment of `a` against the i-th of `b`, up to `n_frags` pairs. Fixed,
/// not random, so vote counts are reproducible.
pub fn candidate_pairs(
    a: &Contig,
    b: &Contig,
    n_frags: usize,
    fragment_length: usize,
) -> Vec<FragmentPair> {
    let frags_a = spaced_fragments(a, n_frags, fragment_length);
    let frags_b = spaced_fragments(b, n_frags, fragment_length);
    frags_a
        .into_iter()
        .zip(frags_b)
        .map(|(fa, fb)| FragmentPair::new(fa, fb))
        .collect()
}

/// Partition fragmentable contigs into train and test groups. The test group
/// gets `max(2, test_ratio * n)` contigs, drawn without replacement.
pub fn split_train_test(
    contigs: &ContigSet,
    test_ratio: f32,
    rng: &mut fastrand::Rng,
    fragment_length: usize,
) -> Result<(Vec<ContigId>, Vec<ContigId>)> {
    let pool = fragmentable(contigs, fragment_length);
    let n = pool.len();
    let n_test = ((test_ratio * n as f32) as usize).max(2);
    if n <= n_test {
        return Err(BinningError::insufficient(
            n_test + 1,
            n,
            "train/test split (train group would be empty)",
        )
        .into());
    }

    let mut indices: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut indices);
    let (test_idx, train_idx) = indices.split_at(n_test);

    let mut test: Vec<ContigId> = test_idx.iter().map(|&i| pool[i].id.clone()).collect();
    let mut train: Vec<ContigId> = train_idx.iter().map(|&i| pool[i].id.clone()).collect();
    test.sort();
    train.sort();
    debug!(train = train.len(), test = test.len(), "train/test split");
    Ok((train, test))
}
