//! Conflict discovery and resolution.

use crate::revision::RevisionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The losing revisions of one document.
///
/// A `ConflictInfo` is recomputed on every scan and never stored. The winning
/// revision is removed from the losing set when the value is built, so
/// `conflict_revs` can never contain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    doc_id: String,
    winner: RevisionId,
    conflict_revs: Vec<RevisionId>,
}

impl ConflictInfo {
    /// Builds the conflict set for a document.
    ///
    /// Duplicates and the winner itself are dropped from `losing`.
    pub fn new(
        doc_id: impl Into<String>,
        winner: RevisionId,
        losing: impl IntoIterator<Item = RevisionId>,
    ) -> Self {
        let conflict_revs: BTreeSet<RevisionId> =
            losing.into_iter().filter(|rev| *rev != winner).collect();
        Self {
            doc_id: doc_id.into(),
            winner,
            conflict_revs: conflict_revs.into_iter().collect(),
        }
    }

    /// Returns the document id.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Returns the current winning revision.
    pub fn winner(&self) -> &RevisionId {
        &self.winner
    }

    /// Returns the losing revisions, in revision order.
    pub fn conflict_revs(&self) -> &[RevisionId] {
        &self.conflict_revs
    }

    /// Returns the number of losing revisions.
    pub fn conflict_count(&self) -> usize {
        self.conflict_revs.len()
    }

    /// Returns true if the document has no losing revisions.
    pub fn is_empty(&self) -> bool {
        self.conflict_revs.is_empty()
    }

    /// Returns a deletion target for every losing revision.
    pub fn prune_targets(&self) -> impl Iterator<Item = PruneTarget> + '_ {
        self.conflict_revs.iter().map(|rev| PruneTarget {
            doc_id: self.doc_id.clone(),
            rev: rev.clone(),
        })
    }

    /// Returns a deletion target for `rev`, or `None` if `rev` is not a
    /// losing revision of this document.
    pub fn target_for(&self, rev: &RevisionId) -> Option<PruneTarget> {
        self.conflict_revs.contains(rev).then(|| PruneTarget {
            doc_id: self.doc_id.clone(),
            rev: rev.clone(),
        })
    }
}

/// A losing revision selected for deletion.
///
/// Targets can only be obtained from a [`ConflictInfo`], so a delete can never
/// be addressed at a revision outside the document's losing set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PruneTarget {
    doc_id: String,
    rev: RevisionId,
}

impl PruneTarget {
    /// Returns the document id.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Returns the revision to delete.
    pub fn rev(&self) -> &RevisionId {
        &self.rev
    }
}

/// The fields of a revision that take part in resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    /// Wall-clock time of the last edit, in milliseconds.
    pub updated_at: i64,
    /// Whether this revision is already marked synced.
    pub synced: bool,
}

impl VersionStamp {
    /// Creates a version stamp.
    pub fn new(updated_at: i64, synced: bool) -> Self {
        Self { updated_at, synced }
    }
}

/// Which side of a conflict wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The revision held locally.
    Local,
    /// The revision reported by the remote store.
    Remote,
}

/// Last writer wins by `updated_at`; ties favour the revision already marked
/// synced, and a tie on both keeps the local revision.
pub fn resolve(local: VersionStamp, remote: VersionStamp) -> Winner {
    use std::cmp::Ordering;

    match local.updated_at.cmp(&remote.updated_at) {
        Ordering::Greater => Winner::Local,
        Ordering::Less => Winner::Remote,
        Ordering::Equal => {
            if remote.synced && !local.synced {
                Winner::Remote
            } else {
                Winner::Local
            }
        }
    }
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Last write wins (by timestamp).
    #[default]
    LastWriteWins,
    /// The remote revision always wins.
    ServerWins,
    /// The local revision always wins.
    ClientWins,
}

impl ConflictPolicy {
    /// Decides the winner according to this policy.
    pub fn decide(&self, local: VersionStamp, remote: VersionStamp) -> Winner {
        match self {
            ConflictPolicy::LastWriteWins => resolve(local, remote),
            ConflictPolicy::ServerWins => Winner::Remote,
            ConflictPolicy::ClientWins => Winner::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevisionId {
        s.parse().unwrap()
    }

    #[test]
    fn winner_is_excluded() {
        let info = ConflictInfo::new(
            "tasks:1",
            rev("3-aa"),
            vec![rev("2-bb"), rev("3-aa"), rev("2-bb"), rev("3-cc")],
        );
        assert_eq!(info.conflict_count(), 2);
        assert!(!info.conflict_revs().contains(&rev("3-aa")));
        assert!(info.prune_targets().all(|t| t.rev() != info.winner()));
    }

    #[test]
    fn target_for_rejects_winner_and_strangers() {
        let info = ConflictInfo::new("tasks:1", rev("3-aa"), vec![rev("2-bb")]);
        assert!(info.target_for(&rev("3-aa")).is_none());
        assert!(info.target_for(&rev("9-zz")).is_none());

        let target = info.target_for(&rev("2-bb")).unwrap();
        assert_eq!(target.doc_id(), "tasks:1");
        assert_eq!(target.rev(), &rev("2-bb"));
    }

    #[test]
    fn last_writer_wins() {
        assert_eq!(
            resolve(VersionStamp::new(100, false), VersionStamp::new(90, true)),
            Winner::Local
        );
        assert_eq!(
            resolve(VersionStamp::new(80, true), VersionStamp::new(90, false)),
            Winner::Remote
        );
    }

    #[test]
    fn ties_favour_synced() {
        assert_eq!(
            resolve(VersionStamp::new(50, false), VersionStamp::new(50, true)),
            Winner::Remote
        );
        assert_eq!(
            resolve(VersionStamp::new(50, true), VersionStamp::new(50, false)),
            Winner::Local
        );
        assert_eq!(
            resolve(VersionStamp::new(50, false), VersionStamp::new(50, false)),
            Winner::Local
        );
    }

    #[test]
    fn policy_overrides() {
        let local = VersionStamp::new(100, false);
        let remote = VersionStamp::new(10, false);
        assert_eq!(ConflictPolicy::default().decide(local, remote), Winner::Local);
        assert_eq!(ConflictPolicy::ServerWins.decide(local, remote), Winner::Remote);
        assert_eq!(ConflictPolicy::ClientWins.decide(remote, local), Winner::Local);
    }
}
