//! Reader pool and one-shot reader selection
//!
//! A session picks its reader once, uniformly at random over the configured
//! pool, and keeps it. [`ReaderSelector`] is the latch that enforces this:
//! the first call decides, every later call returns the same answer.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionParams;

/// Ordered list of per-reader connection overrides
///
/// Each entry is merged over the writer's connection parameters to build a
/// reader. An empty pool means the reader mirrors the writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderPool {
    entries: Vec<ConnectionParams>,
}

impl ReaderPool {
    /// Create a pool from its entries
    pub fn new(entries: Vec<ConnectionParams>) -> Self {
        Self { entries }
    }

    /// Add a reader override
    pub fn push(&mut self, entry: ConnectionParams) {
        self.entries.push(entry);
    }

    /// Number of configured readers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no readers are configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the override at `index`
    pub fn get(&self, index: usize) -> Option<&ConnectionParams> {
        self.entries.get(index)
    }

    /// All overrides in order
    pub fn entries(&self) -> &[ConnectionParams] {
        &self.entries
    }
}

/// The reader a session settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderTarget {
    /// Entry `n` of the reader pool
    Replica(usize),
    /// No pool configured; the reader uses the writer's parameters
    MirrorWriter,
}

impl ReaderTarget {
    /// Pool index of the selected replica, if any
    pub fn index(&self) -> Option<usize> {
        match self {
            ReaderTarget::Replica(index) => Some(*index),
            ReaderTarget::MirrorWriter => None,
        }
    }
}

impl std::fmt::Display for ReaderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderTarget::Replica(index) => write!(f, "replica[{}]", index),
            ReaderTarget::MirrorWriter => write!(f, "writer mirror"),
        }
    }
}

/// One-shot reader selection latch
///
/// # Example
///
/// ```
/// use diesel_splitdb::selector::{ReaderPool, ReaderSelector, ReaderTarget};
///
/// let mut selector = ReaderSelector::new();
/// assert!(selector.selected().is_none());
///
/// let target = selector.select(&ReaderPool::default());
/// assert_eq!(target, ReaderTarget::MirrorWriter);
/// assert_eq!(selector.selected(), Some(ReaderTarget::MirrorWriter));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReaderSelector {
    selected: Option<ReaderTarget>,
}

impl ReaderSelector {
    /// Create an unselected latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a reader using the thread-local RNG
    ///
    /// Only the first call looks at `pool`; later calls return the memoized
    /// target.
    pub fn select(&mut self, pool: &ReaderPool) -> ReaderTarget {
        self.select_with(pool, &mut rand::thread_rng())
    }

    /// Select a reader using the given RNG
    pub fn select_with<R: Rng + ?Sized>(&mut self, pool: &ReaderPool, rng: &mut R) -> ReaderTarget {
        if let Some(target) = self.selected {
            return target;
        }
        let target = if pool.is_empty() {
            ReaderTarget::MirrorWriter
        } else {
            ReaderTarget::Replica(rng.gen_range(0..pool.len()))
        };
        self.selected = Some(target);
        target
    }

    /// The memoized target, if a selection has happened
    pub fn selected(&self) -> Option<ReaderTarget> {
        self.selected
    }

    /// Whether the latch has been set
    pub fn is_selected(&self) -> bool {
        self.selected.is_some()
    }
}
