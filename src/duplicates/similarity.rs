//! Approximate name matching for items without a fingerprint.
//!
//! # Score
//!
//! Names are normalized (NFKC, lowercase, apostrophes dropped, other
//! punctuation turned into spaces, whitespace collapsed) and compared with
//! the maximum of:
//!
//! - the full-string Damerau-Levenshtein ratio
//! - the same ratio over alphabetically sorted tokens (word order)
//! - a sliding-window ratio of the shorter name against every same-length
//!   window of the longer one, weighted by 0.9 and only when the shorter
//!   name is at least half as long
//!
//! # Clustering
//!
//! Every pair scoring at or above the threshold is an edge; clusters are the
//! connected components (transitive closure) computed with a union-find.

use rayon::prelude::*;
use unicode_normalization::UnicodeNormalization;

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Weight applied to the sliding-window score.
const PARTIAL_WEIGHT: f64 = 0.9;

/// Minimum length ratio for the sliding-window score to apply.
const PARTIAL_MIN_LENGTH_RATIO: f64 = 0.5;

/// Normalize a display name for comparison.
///
/// ```
/// use trackdedup::duplicates::similarity::normalize;
///
/// assert_eq!(normalize("Track (Remix)"), "track remix");
/// assert_eq!(normalize("  Don't   Stop!! "), "dont stop");
/// ```
#[must_use]
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;

    for c in name.nfkc().flat_map(char::to_lowercase) {
        if matches!(c, '\'' | '\u{2019}' | '\u{2018}' | '`') {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Similarity of two already-normalized names, in `[0, 1]`.
///
/// Empty names never match anything.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let full = strsim::normalized_damerau_levenshtein(a, b);
    let sorted = strsim::normalized_damerau_levenshtein(&sort_tokens(a), &sort_tokens(b));
    let partial = partial_ratio(a, b) * PARTIAL_WEIGHT;

    full.max(sorted).max(partial)
}

/// Normalize both names, then score them.
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    similarity(&normalize(a), &normalize(b))
}

fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split(' ').collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best ratio of the shorter string against any window of the longer one.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };

    if (short.len() as f64) / (long.len() as f64) < PARTIAL_MIN_LENGTH_RATIO {
        return 0.0;
    }

    let needle: String = short.iter().collect();
    long.windows(short.len())
        .map(|window| {
            let window: String = window.iter().collect();
            strsim::normalized_levenshtein(&needle, &window)
        })
        .fold(0.0, f64::max)
}

/// Disjoint-set forest over item indices.
///
/// Roots are always the smallest index in their set so cluster identity does
/// not depend on union order.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    /// `n` singleton sets.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    /// Root of `x`'s set, compressing the path on the way.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

/// One connected component of approximately matching names.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Member indices into the input slice, ascending
    pub members: Vec<usize>,
    /// Lowest score among the edges that formed this cluster
    pub min_score: f64,
}

/// Cluster names whose pairwise similarity reaches `threshold`.
///
/// Returns clusters with at least two members, ordered by their first member.
/// Input order determines output order, so callers should pass names in a
/// stable order.
#[must_use]
pub fn cluster(names: &[String], threshold: f64) -> Vec<Cluster> {
    let normalized: Vec<String> = names.iter().map(|n| normalize(n)).collect();
    let n = normalized.len();

    let names_ref = &normalized;
    let edges: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(move |i| {
            (i + 1..n).filter_map(move |j| {
                let score = similarity(&names_ref[i], &names_ref[j]);
                (score >= threshold).then_some((i, j, score))
            })
        })
        .collect();
    log::debug!(
        "Name matching: {} candidate pair(s) among {} name(s) at threshold {:.2}",
        edges.len(),
        n,
        threshold
    );

    let mut sets = DisjointSet::new(n);
    for &(i, j, _) in &edges {
        sets.union(i, j);
    }

    let mut by_root: std::collections::BTreeMap<usize, Cluster> = std::collections::BTreeMap::new();
    for idx in 0..n {
        let root = sets.find(idx);
        by_root
            .entry(root)
            .or_insert_with(|| Cluster {
                members: Vec::new(),
                min_score: 1.0,
            })
            .members
            .push(idx);
    }
    for &(i, _, score) in &edges {
        let root = sets.find(i);
        if let Some(cluster) = by_root.get_mut(&root) {
            cluster.min_score = cluster.min_score.min(score);
        }
    }

    by_root
        .into_values()
        .filter(|c| c.members.len() > 1)
        .collect()
}
