//! Cluster membership and per-worker processor snapshots.
//!
//! The registry is process-wide shared state: membership events write, every
//! builder call and locality query reads. Readers proceed concurrently; a
//! writer excludes all readers (`parking_lot::RwLock`). It is an explicit
//! value: tests and embedders instantiate independent registries instead of
//! sharing a hidden singleton.
//!
//! Snapshots of a worker's child processors arrive with the join event and
//! are served from cache. Refreshing a snapshot goes through a
//! [`ChildrenSource`], the one operation in the crate that may block (it
//! models the cross-worker RPC).

use crate::processor::Processor;
use crate::tracing_compat::{debug, info};
use crate::types::{NodeUuid, WorkerId};
use core::fmt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors from registry queries and snapshot refreshes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The worker is not (or no longer) a cluster member.
    #[error("unknown worker {wid}")]
    UnknownWorker {
        /// The worker that was asked about.
        wid: WorkerId,
    },
    /// The remote children enumeration failed or was cancelled.
    #[error("children fetch failed for {wid}: {reason}")]
    FetchFailed {
        /// The worker whose children were requested.
        wid: WorkerId,
        /// Transport-level failure description.
        reason: String,
    },
}

/// Source of a worker's child-processor enumeration.
///
/// Implementations dispatch the query to the worker being asked (the OS
/// process must enumerate its own processors). The in-crate default is the
/// cached snapshot delivered at join; a remote implementation may block.
pub trait ChildrenSource: Send + Sync {
    /// Enumerates the processors attached to `wid`.
    fn fetch(&self, wid: WorkerId) -> Result<Vec<Processor>, RegistryError>;
}

#[derive(Debug, Default)]
struct RegistryState {
    workers: BTreeMap<WorkerId, WorkerEntry>,
}

#[derive(Debug)]
struct WorkerEntry {
    node: NodeUuid,
    children: Vec<Processor>,
}

/// Cluster membership map: worker ids, node uuids, processor snapshots.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a worker joining the cluster with its processor snapshot.
    ///
    /// A re-join replaces the previous snapshot.
    pub fn worker_joined(&self, wid: WorkerId, node: NodeUuid, children: Vec<Processor>) {
        info!(worker = %wid, node = %node, processors = children.len(), "worker joined");
        self.inner
            .write()
            .workers
            .insert(wid, WorkerEntry { node, children });
    }

    /// Records a worker leaving the cluster.
    pub fn worker_left(&self, wid: WorkerId) {
        info!(worker = %wid, "worker left");
        self.inner.write().workers.remove(&wid);
    }

    /// Current cluster membership, sorted by worker id.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerId> {
        self.inner.read().workers.keys().copied().collect()
    }

    /// The node uuid of a worker, `None` if unknown.
    #[must_use]
    pub fn node_uuid(&self, wid: WorkerId) -> Option<NodeUuid> {
        self.inner.read().workers.get(&wid).map(|e| e.node)
    }

    /// The cached child-processor snapshot of a worker, `None` if unknown.
    #[must_use]
    pub fn children(&self, wid: WorkerId) -> Option<Vec<Processor>> {
        self.inner
            .read()
            .workers
            .get(&wid)
            .map(|e| e.children.clone())
    }

    /// Whether the worker is a current member.
    #[must_use]
    pub fn contains(&self, wid: WorkerId) -> bool {
        self.inner.read().workers.contains_key(&wid)
    }

    /// Number of current members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().workers.len()
    }

    /// Whether the cluster has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().workers.is_empty()
    }

    /// Re-fetches a worker's snapshot through `source` and caches it.
    ///
    /// The fetch runs without holding the registry lock. Cancellation or
    /// transport failure surfaces as [`RegistryError::FetchFailed`], which
    /// the builder reports as a construction error.
    pub fn refresh_children(
        &self,
        wid: WorkerId,
        source: &dyn ChildrenSource,
    ) -> Result<(), RegistryError> {
        if !self.contains(wid) {
            return Err(RegistryError::UnknownWorker { wid });
        }
        let children = source.fetch(wid)?;
        debug!(worker = %wid, processors = children.len(), "children snapshot refreshed");
        let mut state = self.inner.write();
        match state.workers.get_mut(&wid) {
            Some(entry) => {
                entry.children = children;
                Ok(())
            }
            // The worker left while the fetch was in flight.
            None => Err(RegistryError::UnknownWorker { wid }),
        }
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("ProcessorRegistry")
            .field("workers", &state.workers.len())
            .finish()
    }
}
