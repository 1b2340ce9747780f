//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents, ids and conflict sets that
//! keep the invariants the store and the pruner rely on.

use driftwood_protocol::{EntityKind, RemoteDocument, RevisionId};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for entity kinds.
pub fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// Strategy for syncable, namespaced document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    (kind_strategy(), "[a-z0-9]{1,12}").prop_map(|(kind, local)| kind.make_id(&local))
}

/// Strategy for ids of documents that must never leave the device.
pub fn internal_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9]{1,12}".prop_map(|s| format!("_local/{s}")),
        "[a-z0-9]{1,12}".prop_map(|s| format!("_design/{s}")),
    ]
}

/// Strategy for loosely shaped JSON documents: namespaced, internal or
/// arbitrary ids, with or without a `type` field.
pub fn json_doc_strategy() -> impl Strategy<Value = Value> {
    let id = prop_oneof![
        doc_id_strategy(),
        internal_id_strategy(),
        "[a-z0-9]{1,12}",
    ];
    let doc_type = prop_oneof![
        Just(None),
        kind_strategy().prop_map(|k| Some(k.type_name().to_string())),
        Just(Some("note".to_string())),
    ];
    (id, doc_type).prop_map(|(id, doc_type)| match doc_type {
        Some(t) => json!({ "_id": id, "type": t }),
        None => json!({ "_id": id }),
    })
}

/// Strategy for `updatedAt` timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    0i64..1_000_000
}

/// A document with diverging leaf revisions.
#[derive(Debug, Clone)]
pub struct ConflictSet {
    /// Document id.
    pub doc_id: String,
    /// Leaf revisions, in insertion order. All differ.
    pub revisions: Vec<RemoteDocument>,
}

impl ConflictSet {
    /// Returns the revision ids.
    pub fn revs(&self) -> Vec<RevisionId> {
        self.revisions.iter().map(|d| d.rev.clone()).collect()
    }
}

/// Strategy for a conflict set of `2..=max_revisions` distinct task
/// revisions under one syncable id.
pub fn conflict_set_strategy(max_revisions: usize) -> impl Strategy<Value = ConflictSet> {
    let max = max_revisions.max(2);
    (
        "[a-z0-9]{1,8}",
        prop::collection::btree_set("[a-z]{1,8}", 2..=max),
        prop::collection::vec(timestamp_strategy(), max),
    )
        .prop_map(|(local, titles, stamps)| {
            let doc_id = EntityKind::Task.make_id(&local);
            let revisions = titles
                .into_iter()
                .zip(stamps)
                .map(|(title, updated_at)| {
                    let body = json!({
                        "id": doc_id,
                        "type": "task",
                        "title": title,
                        "updatedAt": updated_at,
                    });
                    RemoteDocument::new(&doc_id, RevisionId::next(None, title.as_bytes()), body)
                })
                .collect();
            ConflictSet { doc_id, revisions }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwood_protocol::ReplicationFilter;
    use std::collections::BTreeSet;

    proptest! {
        #[test]
        fn generated_ids_are_syncable(id in doc_id_strategy()) {
            let filter = ReplicationFilter::default();
            let doc = json!({ "_id": id });
            prop_assert!(filter.is_syncable(&doc));
        }

        #[test]
        fn internal_ids_are_internal(id in internal_id_strategy()) {
            prop_assert!(ReplicationFilter::default().is_internal_id(&id));
        }

        #[test]
        fn conflict_sets_have_distinct_revisions(set in conflict_set_strategy(5)) {
            let revs: BTreeSet<_> = set.revs().into_iter().collect();
            prop_assert!(revs.len() >= 2);
            prop_assert_eq!(revs.len(), set.revisions.len());
        }
    }
}
