//! Module that contains the registry of peers whose grant is being withheld.

use crate::ProcessId;
use std::collections::BTreeSet;

/// Set of peers whose access request was received and deferred until the next release.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeferredSet(BTreeSet<ProcessId>);

impl DeferredSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Function that registers a deferred peer. Returns `false` if it was already registered.
    pub fn insert(&mut self, peer: ProcessId) -> bool {
        self.0.insert(peer)
    }

    pub fn contains(&self, peer: ProcessId) -> bool {
        self.0.contains(&peer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ProcessId> {
        self.0.iter().copied().collect()
    }

    /// Function that empties the set and returns what it held, in ascending id order.
    pub fn drain(&mut self) -> Vec<ProcessId> {
        std::mem::take(&mut self.0).into_iter().collect()
    }
}
