//! Leaf revisions of one document.

use driftwood_protocol::{ConflictInfo, RemoteDocument, RevisionId};
use std::collections::BTreeMap;

/// The surviving leaf revisions of one document.
#[derive(Debug, Clone, Default)]
pub struct RevisionTree {
    leaves: BTreeMap<RevisionId, RemoteDocument>,
}

impl RevisionTree {
    /// Creates a tree holding one revision.
    pub fn new(doc: RemoteDocument) -> Self {
        let mut tree = Self::default();
        tree.insert(doc);
        tree
    }

    /// Adds a leaf.
    pub fn insert(&mut self, doc: RemoteDocument) {
        self.leaves.insert(doc.rev.clone(), doc);
    }

    /// Removes a leaf.
    pub fn remove(&mut self, rev: &RevisionId) -> Option<RemoteDocument> {
        self.leaves.remove(rev)
    }

    /// Returns true if `rev` is a leaf.
    pub fn contains(&self, rev: &RevisionId) -> bool {
        self.leaves.contains_key(rev)
    }

    /// Returns the number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Returns true if no leaf is left.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Returns every leaf revision id in ascending order.
    pub fn revisions(&self) -> Vec<RevisionId> {
        self.leaves.keys().cloned().collect()
    }

    /// Returns the winning leaf: the greatest live leaf, or the greatest
    /// deletion if every leaf is deleted.
    pub fn winner(&self) -> Option<&RemoteDocument> {
        self.leaves
            .values()
            .rev()
            .find(|doc| !doc.deleted)
            .or_else(|| self.leaves.values().next_back())
    }

    /// Returns the losing leaves relative to the winner.
    pub fn conflict_info(&self) -> Option<ConflictInfo> {
        let winner = self.winner()?;
        Some(ConflictInfo::new(
            winner.id.clone(),
            winner.rev.clone(),
            self.leaves.keys().cloned(),
        ))
    }
}
