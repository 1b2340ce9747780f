//! Classify command implementation.

use driftwood_protocol::ReplicationFilter;
use serde_json::{json, Value};

/// Runs the classify command.
pub fn run(id: &str, doc_type: Option<&str>) {
    let filter = ReplicationFilter::default();
    let doc = document(id, doc_type);

    println!("id:       {id}");
    if let Some(doc_type) = doc_type {
        println!("type:     {doc_type}");
    }
    println!("class:    {}", filter.describe_type(&doc));
    println!("syncable: {}", filter.is_syncable(&doc));
}

fn document(id: &str, doc_type: Option<&str>) -> Value {
    match doc_type {
        Some(doc_type) => json!({"_id": id, "type": doc_type}),
        None => json!({"_id": id}),
    }
}
