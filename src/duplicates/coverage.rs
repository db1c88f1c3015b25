//! Fingerprint coverage measurement and the coverage gate.
//!
//! Deduplication only runs when enough of the catalog carries an exact
//! identity. Name-based matching at low coverage produces far more false
//! groups than real ones, so a blocked gate stops the run before the grouper
//! is ever invoked.

use serde::Serialize;

use crate::catalog::MediaItem;

/// Default minimum coverage ratio.
pub const DEFAULT_THRESHOLD: f64 = 0.80;

/// Count of items with a known fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Coverage {
    /// Items with a known fingerprint (tag, embedded, or computed)
    pub covered: usize,
    /// All items in the snapshot
    pub total: usize,
}

impl Coverage {
    /// Fraction of covered items. An empty catalog is fully covered.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.covered as f64 / self.total as f64
        }
    }

    /// Ratio as a percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        self.ratio() * 100.0
    }

    /// Items still without a fingerprint.
    #[must_use]
    pub fn uncovered(&self) -> usize {
        self.total.saturating_sub(self.covered)
    }
}

impl std::fmt::Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}% ({} of {})",
            self.percent(),
            self.covered,
            self.total
        )
    }
}

/// Measure coverage over a snapshot.
#[must_use]
pub fn measure(items: &[MediaItem]) -> Coverage {
    Coverage {
        covered: items.iter().filter(|i| i.fingerprint.is_some()).count(),
        total: items.len(),
    }
}

/// Outcome of the coverage gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Deduplication may run.
    Proceed {
        /// Measured ratio
        ratio: f64,
    },
    /// Deduplication must not run.
    Blocked {
        /// Measured ratio
        ratio: f64,
        /// Required ratio
        threshold: f64,
    },
}

impl GateDecision {
    /// Whether deduplication may run.
    #[must_use]
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed { .. })
    }

    /// The measured ratio.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        match self {
            Self::Proceed { ratio } | Self::Blocked { ratio, .. } => *ratio,
        }
    }
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed { ratio } => write!(f, "proceed ({:.1}% covered)", ratio * 100.0),
            Self::Blocked { ratio, threshold } => write!(
                f,
                "blocked ({:.1}% covered, need {:.0}%)",
                ratio * 100.0,
                threshold * 100.0
            ),
        }
    }
}

/// Decide whether deduplication may run at `ratio`.
///
/// When `required` is false the gate always proceeds. A non-finite ratio
/// never passes a required gate.
#[must_use]
pub fn gate(ratio: f64, threshold: f64, required: bool) -> GateDecision {
    if !required {
        return GateDecision::Proceed { ratio };
    }
    if ratio.is_finite() && ratio >= threshold {
        GateDecision::Proceed { ratio }
    } else {
        GateDecision::Blocked { ratio, threshold }
    }
}
