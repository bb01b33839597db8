use crate::graph::StructureGraph;
use crate::observer::{CoverageProgress, ProgressObserver};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fuzzer id whose registration initializes the tracker unless configured otherwise.
pub const DEFAULT_PRIMARY_FUZZER_ID: u64 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("No structure graph has been registered yet")]
    NotInitialized,
    #[error("Node index {index} is out of range for a graph of {total} nodes")]
    IndexOutOfRange { index: i128, total: usize },
}

/// Only registrations from the primary fuzzer initialize or reset tracking.
///
/// `fuzzer_id` is whatever integer the caller sent; ids that no configured
/// primary can match (negative or too large) are simply not primary.
pub fn is_primary_fuzzer(primary_fuzzer_id: u64, fuzzer_id: i128) -> bool {
    fuzzer_id == i128::from(primary_fuzzer_id)
}

/// Bitmap of seen nodes for one registered graph.
#[derive(Debug)]
pub struct Coverage {
    graph: StructureGraph,
    seen: Vec<bool>,
    covered: usize,
}

impl Coverage {
    fn new(graph: StructureGraph) -> Self {
        let seen = vec![false; graph.len()];
        Self {
            graph,
            seen,
            covered: 0,
        }
    }

    fn slot(&self, index: i128) -> Result<usize, TrackerError> {
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < self.seen.len())
            .ok_or(TrackerError::IndexOutOfRange {
                index,
                total: self.seen.len(),
            })
    }

    /// Marks `slot` seen, returning whether it was new.
    fn mark(&mut self, slot: usize) -> bool {
        if self.seen[slot] {
            return false;
        }
        self.seen[slot] = true;
        self.covered += 1;
        true
    }

    fn progress(&self) -> CoverageProgress {
        CoverageProgress {
            covered: self.covered,
            total: self.seen.len(),
        }
    }

    pub fn graph(&self) -> &StructureGraph {
        &self.graph
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn total_nodes(&self) -> usize {
        self.seen.len()
    }

    pub fn is_seen(&self, index: usize) -> Option<bool> {
        self.seen.get(index).copied()
    }
}

#[derive(Debug, Default)]
pub enum TrackerState {
    #[default]
    Uninitialized,
    Tracking(Coverage),
}

/// Counts the distinct structure-graph nodes hit across all reports since
/// the last primary registration.
///
/// The tracker is not internally synchronized; callers sharing it between
/// threads wrap it in a single lock.
pub struct CoverageTracker {
    primary_fuzzer_id: u64,
    state: TrackerState,
    observer: Arc<dyn ProgressObserver>,
}

impl CoverageTracker {
    pub fn new(primary_fuzzer_id: u64, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            primary_fuzzer_id,
            state: TrackerState::Uninitialized,
            observer,
        }
    }

    /// Stores `graph` and starts tracking with every node unseen.
    ///
    /// Non-primary fuzzer ids are ignored in every state. A second primary
    /// registration replaces the graph and drops all coverage gathered so far.
    pub fn register_graph(&mut self, fuzzer_id: i128, graph: StructureGraph) {
        if !is_primary_fuzzer(self.primary_fuzzer_id, fuzzer_id) {
            debug!(fuzzer_id, "Ignoring graph registration from non-primary fuzzer");
            return;
        }
        if matches!(self.state, TrackerState::Tracking(_)) {
            warn!(fuzzer_id, "Primary fuzzer re-registered, resetting coverage");
        }
        info!(
            fuzzer_id,
            nodes = graph.len(),
            functions = graph.functions.len(),
            "Registered structure graph"
        );
        self.state = TrackerState::Tracking(Coverage::new(graph));
    }

    /// Marks each reported node seen, in order.
    ///
    /// Returns `true` if at least one node was seen for the first time. An
    /// out-of-range index aborts the batch; indices before it stay applied.
    pub fn report_hits(&mut self, indices: &[i128]) -> Result<bool, TrackerError> {
        let TrackerState::Tracking(coverage) = &mut self.state else {
            return Err(TrackerError::NotInitialized);
        };

        let mut updated = false;
        for &index in indices {
            let slot = coverage.slot(index)?;
            updated |= coverage.mark(slot);
        }

        if updated {
            let progress = coverage.progress();
            if let Err(e) = self.observer.on_progress(&progress) {
                warn!(
                    observer = self.observer.name(),
                    "Progress notification failed: {e}"
                );
            }
        }
        Ok(updated)
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    fn coverage(&self) -> Option<&Coverage> {
        match &self.state {
            TrackerState::Uninitialized => None,
            TrackerState::Tracking(coverage) => Some(coverage),
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TrackerState::Tracking(_))
    }

    pub fn primary_fuzzer_id(&self) -> u64 {
        self.primary_fuzzer_id
    }

    /// Distinct nodes seen; zero while uninitialized.
    pub fn covered(&self) -> usize {
        self.coverage().map_or(0, Coverage::covered)
    }

    /// Nodes in the registered graph; zero while uninitialized.
    pub fn total_nodes(&self) -> usize {
        self.coverage().map_or(0, Coverage::total_nodes)
    }

    pub fn is_seen(&self, index: usize) -> Option<bool> {
        self.coverage().and_then(|coverage| coverage.is_seen(index))
    }

    pub fn graph(&self) -> Option<&StructureGraph> {
        self.coverage().map(Coverage::graph)
    }
}
