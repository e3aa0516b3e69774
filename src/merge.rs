use serde_json::{Map, Value};
use thiserror::Error;

use crate::results::WorkflowResult;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge mapping and non-mapping values at key '{0}' without overwrite")]
    StructureClash(String),
}

/// Recursively merge `source` into `dest`.
///
/// Keys absent from `dest` are inserted. When both sides hold mappings the
/// merge recurses; when both hold lists they are concatenated in order,
/// duplicates allowed. On any other conflict `dest` wins unless
/// `overwrite_duplicate_keys` is set, in which case `source` wins. A
/// mapping/non-mapping clash with overwrite disallowed is irreconcilable and
/// signals a caller bug.
pub fn deep_merge(
    dest: &mut Map<String, Value>,
    source: &Map<String, Value>,
    overwrite_duplicate_keys: bool,
) -> Result<(), MergeError> {
    for (key, incoming) in source {
        let Some(existing) = dest.get_mut(key) else {
            dest.insert(key.clone(), incoming.clone());
            continue;
        };
        match (existing, incoming) {
            (Value::Object(dest_map), Value::Object(source_map)) => {
                deep_merge(dest_map, source_map, overwrite_duplicate_keys)?;
            }
            (Value::Array(dest_list), Value::Array(source_list)) => {
                dest_list.extend(source_list.iter().cloned());
            }
            (existing, incoming) => {
                if overwrite_duplicate_keys {
                    *existing = incoming.clone();
                } else if existing.is_object() != incoming.is_object() {
                    return Err(MergeError::StructureClash(key.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Fold every step result document into one "all results" document, in
/// workflow order with overwrite enabled, so a rerun step's values supersede
/// the earlier run's without explicit dedup logic.
pub fn merged_results(workflow: &WorkflowResult) -> Result<Value, MergeError> {
    let mut all_results = Map::new();
    for step_result in workflow.workflow_list() {
        if let Value::Object(source) = step_result.to_document() {
            deep_merge(&mut all_results, &source, true)?;
        }
    }
    let mut wrapped = Map::new();
    wrapped.insert("workflow-results".to_string(), Value::Object(all_results));
    Ok(Value::Object(wrapped))
}
