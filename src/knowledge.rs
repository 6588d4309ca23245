//! Structured key-value knowledge store.
//!
//! Entries are addressed by `(category, key)` and carry an opaque JSON
//! payload. The whole store is one JSON document: `{category -> {key ->
//! {data, createdAt, updatedAt, tags?}}}`. Key order inside a category is
//! insertion order and is what `list` pages over.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{HiveError, Result};
use crate::storage::DocumentStore;
use crate::tools::ToolResponse;
use crate::util::{now_ms, to_iso};
use crate::workspace::Workspace;

const DEFAULT_LIMIT: usize = 50;

/// Store document: category name -> object of key -> entry object.
type KnowledgeDoc = Map<String, Value>;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum KnowledgeAction {
    Set {
        category: String,
        key: String,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        tags: Option<Vec<String>>,
    },
    Get {
        category: String,
        key: String,
    },
    Delete {
        category: String,
        key: String,
    },
    List {
        category: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    Query {
        category: String,
        filter: Map<String, Value>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Categories {},
}

pub struct KnowledgeStore {
    store: DocumentStore,
    path: PathBuf,
}

impl KnowledgeStore {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            store: DocumentStore::new(),
            path: workspace.knowledge_store_path(),
        }
    }

    pub async fn execute(&self, call_id: &str, args: Value) -> ToolResponse {
        debug!(call_id, "knowledge action");
        let action: KnowledgeAction = match serde_json::from_value(args) {
            Ok(action) => action,
            Err(e) => {
                return ToolResponse::from_result(Err(HiveError::Validation(e.to_string())));
            }
        };
        ToolResponse::from_result(self.dispatch(action).await)
    }

    async fn dispatch(&self, action: KnowledgeAction) -> Result<Value> {
        match action {
            KnowledgeAction::Set {
                category,
                key,
                data,
                tags,
            } => self.set(&category, &key, data, tags).await,
            KnowledgeAction::Get { category, key } => self.get(&category, &key).await,
            KnowledgeAction::Delete { category, key } => self.delete(&category, &key).await,
            KnowledgeAction::List { category, limit } => {
                self.list(&category, limit.unwrap_or(DEFAULT_LIMIT)).await
            }
            KnowledgeAction::Query {
                category,
                filter,
                limit,
            } => {
                self.query(&category, &filter, limit.unwrap_or(DEFAULT_LIMIT))
                    .await
            }
            KnowledgeAction::Categories {} => self.categories().await,
        }
    }

    pub async fn set(
        &self,
        category: &str,
        key: &str,
        data: Option<Value>,
        tags: Option<Vec<String>>,
    ) -> Result<Value> {
        let Some(data) = data else {
            return Err(HiveError::Validation(
                "set requires a data value".to_string(),
            ));
        };
        let category = category.to_string();
        let key = key.to_string();

        self.store
            .update::<KnowledgeDoc, _, _>(&self.path, move |doc| {
                let now = now_ms();
                let slot = doc
                    .entry(category.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    // Corrupt category from an older writer; start it over.
                    *slot = Value::Object(Map::new());
                }
                let Some(entries) = slot.as_object_mut() else {
                    return json!({"status": "error", "error": "category is not an object"});
                };

                let created_at = entries
                    .get(&key)
                    .and_then(|e| e.get("createdAt"))
                    .and_then(Value::as_i64);
                let status = if created_at.is_some() { "updated" } else { "created" };

                let mut entry = Map::new();
                entry.insert("data".to_string(), data);
                entry.insert("createdAt".to_string(), json!(created_at.unwrap_or(now)));
                entry.insert("updatedAt".to_string(), json!(now));
                if let Some(tags) = tags {
                    entry.insert("tags".to_string(), json!(tags));
                }
                entries.insert(key.clone(), Value::Object(entry));

                json!({"status": status, "category": category, "key": key})
            })
            .await
    }

    pub async fn get(&self, category: &str, key: &str) -> Result<Value> {
        let doc: KnowledgeDoc = self.store.load(&self.path).await;
        let entry = doc
            .get(category)
            .and_then(Value::as_object)
            .and_then(|entries| entries.get(key))
            .and_then(Value::as_object);

        let Some(entry) = entry else {
            return Ok(json!({"status": "not_found", "category": category, "key": key}));
        };

        let mut out = Map::new();
        out.insert("status".to_string(), json!("ok"));
        out.insert("category".to_string(), json!(category));
        out.insert("key".to_string(), json!(key));
        out.insert(
            "data".to_string(),
            entry.get("data").cloned().unwrap_or(Value::Null),
        );
        out.insert(
            "createdAt".to_string(),
            json!(iso_field(entry, "createdAt")),
        );
        out.insert(
            "updatedAt".to_string(),
            json!(iso_field(entry, "updatedAt")),
        );
        if let Some(tags) = entry.get("tags") {
            out.insert("tags".to_string(), tags.clone());
        }
        Ok(Value::Object(out))
    }

    pub async fn delete(&self, category: &str, key: &str) -> Result<Value> {
        let category = category.to_string();
        let key = key.to_string();

        self.store
            .update::<KnowledgeDoc, _, _>(&self.path, move |doc| {
                let removed = doc
                    .get_mut(&category)
                    .and_then(Value::as_object_mut)
                    .map(|entries| entries.remove(&key).is_some())
                    .unwrap_or(false);

                if removed {
                    // Drop the category once its last key is gone.
                    let empty = doc
                        .get(&category)
                        .and_then(Value::as_object)
                        .is_some_and(Map::is_empty);
                    if empty {
                        doc.remove(&category);
                    }
                    json!({"status": "deleted", "category": category, "key": key})
                } else {
                    json!({"status": "not_found", "category": category, "key": key})
                }
            })
            .await
    }

    pub async fn list(&self, category: &str, limit: usize) -> Result<Value> {
        let doc: KnowledgeDoc = self.store.load(&self.path).await;
        let entries = doc.get(category).and_then(Value::as_object);

        let keys: Vec<Value> = entries
            .map(|entries| {
                entries
                    .iter()
                    .take(limit)
                    .map(|(key, entry)| {
                        let updated = entry
                            .as_object()
                            .map(|e| iso_field(e, "updatedAt"))
                            .unwrap_or_default();
                        json!({"key": key, "updatedAt": updated})
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "status": "ok",
            "category": category,
            "count": keys.len(),
            "keys": keys,
        }))
    }

    pub async fn query(
        &self,
        category: &str,
        filter: &Map<String, Value>,
        limit: usize,
    ) -> Result<Value> {
        let doc: KnowledgeDoc = self.store.load(&self.path).await;
        let entries = doc.get(category).and_then(Value::as_object);

        let mut matches = Vec::new();
        if let Some(entries) = entries {
            for (key, entry) in entries {
                if matches.len() >= limit {
                    break;
                }
                let Some(entry) = entry.as_object() else {
                    continue;
                };
                let Some(data) = entry.get("data").and_then(Value::as_object) else {
                    continue;
                };
                if filter.iter().all(|(fk, fv)| field_matches(data, fk, fv)) {
                    matches.push(json!({
                        "key": key,
                        "data": entry.get("data").cloned().unwrap_or(Value::Null),
                        "updatedAt": iso_field(entry, "updatedAt"),
                    }));
                }
            }
        }

        Ok(json!({
            "status": "ok",
            "category": category,
            "count": matches.len(),
            "matches": matches,
        }))
    }

    pub async fn categories(&self) -> Result<Value> {
        let doc: KnowledgeDoc = self.store.load(&self.path).await;
        let categories: Vec<Value> = doc
            .iter()
            .map(|(name, entries)| {
                let count = entries.as_object().map(Map::len).unwrap_or(0);
                json!({"name": name, "count": count})
            })
            .collect();

        Ok(json!({"status": "ok", "categories": categories}))
    }
}

/// String filters match as case-insensitive substrings against the string
/// form of the field; every other filter value must match exactly.
fn field_matches(data: &Map<String, Value>, field: &str, expected: &Value) -> bool {
    let Some(actual) = data.get(field) else {
        return false;
    };
    match expected {
        Value::String(needle) => {
            let haystack = match actual {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
        other => actual == other,
    }
}

fn iso_field(entry: &Map<String, Value>, field: &str) -> String {
    entry
        .get(field)
        .and_then(Value::as_i64)
        .map(to_iso)
        .unwrap_or_default()
}
