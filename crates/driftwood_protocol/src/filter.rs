//! Replication filter: which documents may leave the device.
//!
//! Rules, applied in order:
//! 1. A document without a string id is rejected.
//! 2. Internal (`_local/`) and design (`_design/`) documents are rejected,
//!    whatever their `type` says.
//! 3. A document whose id carries a syncable namespace prefix, or whose
//!    `type` is on the allow-list, is accepted.
//! 4. Everything else is rejected.

use crate::document::RemoteDocument;
use crate::kind::EntityKind;
use serde_json::Value;
use std::fmt;

/// Anything the filter can classify.
pub trait FilterSubject {
    /// Returns the document id, if the document has a string id.
    fn doc_id(&self) -> Option<&str>;

    /// Returns the explicit `type` field, if any.
    fn doc_type(&self) -> Option<&str>;
}

impl FilterSubject for Value {
    fn doc_id(&self) -> Option<&str> {
        self.get("_id")
            .or_else(|| self.get("id"))
            .and_then(Value::as_str)
    }

    fn doc_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }
}

impl FilterSubject for RemoteDocument {
    fn doc_id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn doc_type(&self) -> Option<&str> {
        RemoteDocument::doc_type(self)
    }
}

impl<T: FilterSubject + ?Sized> FilterSubject for &T {
    fn doc_id(&self) -> Option<&str> {
        (**self).doc_id()
    }

    fn doc_type(&self) -> Option<&str> {
        (**self).doc_type()
    }
}

/// Namespaces and type names the filter works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Id prefix of device-local documents.
    pub local_marker: String,
    /// Id prefix of design/schema documents.
    pub design_marker: String,
    /// Syncable namespace prefix per entity kind.
    pub namespaces: Vec<(EntityKind, String)>,
    /// Allow-listed `type` values per entity kind.
    pub type_names: Vec<(EntityKind, String)>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            local_marker: "_local/".into(),
            design_marker: "_design/".into(),
            namespaces: EntityKind::ALL
                .iter()
                .map(|k| (*k, k.namespace().to_string()))
                .collect(),
            type_names: EntityKind::ALL
                .iter()
                .map(|k| (*k, k.type_name().to_string()))
                .collect(),
        }
    }
}

/// How a document was classified, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocClass {
    /// Device-local document.
    Local,
    /// Design/schema document.
    Design,
    /// Matched a namespace prefix.
    ByPrefix(EntityKind),
    /// Matched an allow-listed `type`.
    ByType(EntityKind),
    /// Anything else, including documents without an id.
    Other,
}

impl fmt::Display for DocClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocClass::Local => f.write_str("local"),
            DocClass::Design => f.write_str("design"),
            DocClass::ByPrefix(kind) => write!(f, "prefix:{kind}"),
            DocClass::ByType(kind) => write!(f, "type:{kind}"),
            DocClass::Other => f.write_str("other"),
        }
    }
}

/// Request context handed to a server-side filter. The policy ignores it.
#[derive(Debug, Clone, Default)]
pub struct FilterRequest {
    /// Query parameters of the replication request.
    pub query: Vec<(String, String)>,
}

/// Decides which documents are eligible to leave the device.
#[derive(Debug, Clone, Default)]
pub struct ReplicationFilter {
    config: FilterConfig,
}

impl ReplicationFilter {
    /// Creates a filter with the given configuration.
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Returns the filter configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Returns true if `doc` may be replicated.
    pub fn is_syncable<D: FilterSubject + ?Sized>(&self, doc: &D) -> bool {
        let Some(id) = doc.doc_id() else {
            return false;
        };
        if self.is_internal_id(id) {
            return false;
        }
        self.kind_by_prefix(id).is_some() || self.kind_by_type(doc.doc_type()).is_some()
    }

    /// Returns the syncable subsequence of `docs`, in original order.
    pub fn filter_syncable<D: FilterSubject>(&self, docs: impl IntoIterator<Item = D>) -> Vec<D> {
        docs.into_iter().filter(|d| self.is_syncable(d)).collect()
    }

    /// Classifies a document without affecting the accept/reject decision.
    pub fn describe_type<D: FilterSubject + ?Sized>(&self, doc: &D) -> DocClass {
        let Some(id) = doc.doc_id() else {
            return DocClass::Other;
        };
        if id.starts_with(&self.config.local_marker) {
            return DocClass::Local;
        }
        if id.starts_with(&self.config.design_marker) {
            return DocClass::Design;
        }
        if let Some(kind) = self.kind_by_prefix(id) {
            return DocClass::ByPrefix(kind);
        }
        if let Some(kind) = self.kind_by_type(doc.doc_type()) {
            return DocClass::ByType(kind);
        }
        DocClass::Other
    }

    /// Returns true if `id` addresses a local-only or design document.
    pub fn is_internal_id(&self, id: &str) -> bool {
        id.starts_with(&self.config.local_marker) || id.starts_with(&self.config.design_marker)
    }

    /// Returns the kind whose namespace prefixes `id`.
    pub fn kind_for_id(&self, id: &str) -> Option<EntityKind> {
        self.kind_by_prefix(id)
    }

    /// Returns the kind of a document, by its `type` first, then by its id
    /// namespace.
    pub fn kind_of<D: FilterSubject + ?Sized>(&self, doc: &D) -> Option<EntityKind> {
        self.kind_by_type(doc.doc_type())
            .or_else(|| doc.doc_id().and_then(|id| self.kind_by_prefix(id)))
    }

    /// Returns the predicate in the two-argument shape a server-side
    /// replication filter expects.
    pub fn server_filter(&self) -> impl Fn(&Value, &FilterRequest) -> bool + Send + Sync + '_ {
        move |doc, _request| self.is_syncable(doc)
    }

    fn kind_by_prefix(&self, id: &str) -> Option<EntityKind> {
        self.config
            .namespaces
            .iter()
            .find(|(_, prefix)| id.starts_with(prefix.as_str()))
            .map(|(kind, _)| *kind)
    }

    fn kind_by_type(&self, doc_type: Option<&str>) -> Option<EntityKind> {
        let doc_type = doc_type?;
        self.config
            .type_names
            .iter()
            .find(|(_, name)| name == doc_type)
            .map(|(kind, _)| *kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn documented_examples() {
        let filter = ReplicationFilter::default();
        assert!(!filter.is_syncable(&json!({"_id": "_local/foo"})));
        assert!(filter.is_syncable(&json!({"_id": "tasks:123"})));
        assert!(filter.is_syncable(&json!({"_id": "abc", "type": "project"})));
        assert!(!filter.is_syncable(&json!({"_id": "abc"})));
    }

    #[test]
    fn missing_or_non_string_id_is_rejected() {
        let filter = ReplicationFilter::default();
        assert!(!filter.is_syncable(&json!({"type": "task"})));
        assert!(!filter.is_syncable(&json!({"_id": 42, "type": "task"})));
        assert_eq!(filter.describe_type(&json!({"type": "task"})), DocClass::Other);
    }

    #[test]
    fn internal_ids_win_over_type() {
        let filter = ReplicationFilter::default();
        assert!(!filter.is_syncable(&json!({"_id": "_design/views", "type": "task"})));
        assert!(!filter.is_syncable(&json!({"_id": "_local/tasks:1", "type": "task"})));
    }

    #[test]
    fn custom_namespaces_drive_kind_lookup() {
        let filter = ReplicationFilter::new(FilterConfig {
            local_marker: "~local/".into(),
            namespaces: vec![(EntityKind::Task, "todo/".into())],
            type_names: vec![(EntityKind::Project, "board".into())],
            ..FilterConfig::default()
        });
        assert_eq!(filter.kind_for_id("todo/1"), Some(EntityKind::Task));
        assert_eq!(filter.kind_for_id("tasks:1"), None);
        assert_eq!(
            filter.kind_of(&json!({"_id": "x", "type": "board"})),
            Some(EntityKind::Project)
        );
        assert_eq!(filter.kind_of(&json!({"_id": "todo/2"})), Some(EntityKind::Task));
        assert!(filter.is_internal_id("~local/settings"));
        assert!(!filter.is_internal_id("_local/settings"));
    }

    #[test]
    fn describe_type_classes() {
        let filter = ReplicationFilter::default();
        assert_eq!(filter.describe_type(&json!({"_id": "_local/x"})), DocClass::Local);
        assert_eq!(filter.describe_type(&json!({"_id": "_design/x"})), DocClass::Design);
        assert_eq!(
            filter.describe_type(&json!({"_id": "groups:1"})),
            DocClass::ByPrefix(EntityKind::Group)
        );
        assert_eq!(
            filter
                .describe_type(&json!({"_id": "x", "type": "timerSession"}))
                .to_string(),
            "type:timerSession"
        );
        assert_eq!(filter.describe_type(&json!({"_id": "x"})).to_string(), "other");
    }

    #[test]
    fn server_filter_ignores_request() {
        let filter = ReplicationFilter::default();
        let predicate = filter.server_filter();
        let request = FilterRequest {
            query: vec![("since".into(), "now".into())],
        };
        assert!(predicate(&json!({"_id": "tasks:1"}), &request));
        assert!(!predicate(&json!({"_id": "_local/a"}), &FilterRequest::default()));
    }

    #[test]
    fn custom_namespaces() {
        let filter = ReplicationFilter::new(FilterConfig {
            namespaces: vec![(EntityKind::Task, "t/".into())],
            ..FilterConfig::default()
        });
        assert!(filter.is_syncable(&json!({"_id": "t/1"})));
        assert!(!filter.is_syncable(&json!({"_id": "tasks:1"})));
    }

    fn any_doc() -> impl Strategy<Value = Value> {
        let id = prop_oneof![
            "[a-z]{1,8}".prop_map(|s| format!("_local/{s}")),
            "[a-z]{1,8}".prop_map(|s| format!("_design/{s}")),
            "[a-z0-9]{1,8}".prop_map(|s| format!("tasks:{s}")),
            "[a-z0-9]{1,8}".prop_map(|s| format!("projects:{s}")),
            "[a-z0-9:]{1,10}",
        ];
        let doc_type = prop_oneof![
            Just(None),
            Just(Some("task")),
            Just(Some("project")),
            Just(Some("note")),
        ];
        (id, doc_type).prop_map(|(id, doc_type)| match doc_type {
            Some(t) => json!({"_id": id, "type": t}),
            None => json!({"_id": id}),
        })
    }

    proptest! {
        #[test]
        fn internal_namespaces_never_sync(doc in any_doc()) {
            let filter = ReplicationFilter::default();
            let id = doc.doc_id().unwrap();
            if id.starts_with("_local/") || id.starts_with("_design/") {
                prop_assert!(!filter.is_syncable(&doc));
            }
        }

        #[test]
        fn allow_listed_types_sync(doc in any_doc()) {
            let filter = ReplicationFilter::default();
            let id = doc.doc_id().unwrap();
            let typed = matches!(doc.doc_type(), Some("task" | "project"));
            if typed && !filter.is_internal_id(id) {
                prop_assert!(filter.is_syncable(&doc));
            }
        }

        #[test]
        fn filter_preserves_order(docs in prop::collection::vec(any_doc(), 0..32)) {
            let filter = ReplicationFilter::default();
            let kept = filter.filter_syncable(docs.iter());
            let expected: Vec<&Value> = docs.iter().filter(|d| filter.is_syncable(*d)).collect();
            prop_assert_eq!(kept.len(), expected.len());
            for (a, b) in kept.iter().zip(expected.iter()) {
                prop_assert!(std::ptr::eq(*a, *b));
            }
        }
    }
}
