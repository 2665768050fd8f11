//! Key/Value Metadata Types
//!
//! Every node carries a key/value store. Keys come from two places:
//!
//! - **Own keys**: authored directly on the node (`KvEntry`)
//! - **Component keys**: a named, ordered schema (`ComponentDefinition`) declared on a
//!   node and inherited by that node's whole subtree
//!
//! Resolution precedence is own > nearest component > further component.
//!
//! ## Example Component
//!
//! ```json
//! {
//!   "nodeId": "folder-uuid",
//!   "name": "invoice",
//!   "fields": [
//!     { "key": "shop", "kvType": "text", "value": null },
//!     { "key": "total", "kvType": "number", "value": 0.0 }
//!   ]
//! }
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Date format accepted by `KvType::Date`
pub const KV_DATE_FORMAT: &str = "%Y-%m-%d";

/// Value types a component field can constrain a key to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvType {
    Text,
    Integer,
    Number,
    Boolean,
    /// `YYYY-MM-DD` string
    Date,
}

impl KvType {
    /// Whether `value` conforms to this type
    ///
    /// `Null` means "unset" and conforms to every type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (KvType::Text, Value::String(_)) => true,
            (KvType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (KvType::Number, Value::Number(_)) => true,
            (KvType::Boolean, Value::Bool(_)) => true,
            (KvType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, KV_DATE_FORMAT).is_ok(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KvType::Text => "text",
            KvType::Integer => "integer",
            KvType::Number => "number",
            KvType::Boolean => "boolean",
            KvType::Date => "date",
        }
    }
}

impl fmt::Display for KvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from an own entry to the component that typed it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRef {
    /// Node that declares the component
    pub node_id: String,
    /// Component name
    pub name: String,
}

/// An own key authored directly on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvEntry {
    pub node_id: String,
    pub key: String,
    pub value: Value,

    /// Type enforced when the entry was written, if a component constrained it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv_type: Option<KvType>,

    /// Component whose schema declared this key at write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentRef>,
}

/// One field of a component schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentField {
    pub key: String,
    pub kv_type: KvType,

    /// Value inherited by descendants until they set an own value
    #[serde(default)]
    pub value: Value,
}

impl ComponentField {
    pub fn new(key: impl Into<String>, kv_type: KvType) -> Self {
        Self {
            key: key.into(),
            kv_type,
            value: Value::Null,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }
}

/// A named, ordered key schema declared on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub node_id: String,
    pub name: String,
    pub fields: Vec<ComponentField>,
}

impl ComponentDefinition {
    pub fn field(&self, key: &str) -> Option<&ComponentField> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn reference(&self) -> ComponentRef {
        ComponentRef {
            node_id: self.node_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KvSource {
    Own,
    Component {
        #[serde(rename = "nodeId")]
        node_id: String,
        name: String,
    },
}

/// One key of a resolved mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntry {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv_type: Option<KvType>,
    pub source: KvSource,
}

/// Ordered key -> value mapping produced by `KvStore::resolve`
///
/// Keys keep the position of their first appearance (furthest ancestor first,
/// own keys last); later, nearer layers overwrite the value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedKv {
    entries: Vec<ResolvedEntry>,
}

impl ResolvedKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `entry.key`
    pub fn overlay(&mut self, entry: ResolvedEntry) {
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entry(key).map(|e| &e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&ResolvedEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kv_type_accepts() {
        assert!(KvType::Text.accepts(&json!("shop")));
        assert!(KvType::Integer.accepts(&json!(42)));
        assert!(!KvType::Integer.accepts(&json!(4.2)));
        assert!(KvType::Number.accepts(&json!(4.2)));
        assert!(KvType::Boolean.accepts(&json!(true)));
        assert!(KvType::Date.accepts(&json!("2024-02-29")));
        assert!(!KvType::Date.accepts(&json!("29.02.2024")));
        assert!(!KvType::Text.accepts(&json!(1)));
    }

    #[test]
    fn test_null_is_accepted_by_every_type() {
        for kv_type in [
            KvType::Text,
            KvType::Integer,
            KvType::Number,
            KvType::Boolean,
            KvType::Date,
        ] {
            assert!(kv_type.accepts(&Value::Null), "{} should accept null", kv_type);
        }
    }

    #[test]
    fn test_overlay_keeps_first_position() {
        let mut resolved = ResolvedKv::new();
        for (key, value) in [("a", 1), ("b", 2), ("a", 3)] {
            resolved.overlay(ResolvedEntry {
                key: key.to_string(),
                value: json!(value),
                kv_type: None,
                source: KvSource::Own,
            });
        }
        assert_eq!(resolved.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(resolved.get("a"), Some(&json!(3)));
        assert_eq!(resolved.len(), 2);
    }
}
