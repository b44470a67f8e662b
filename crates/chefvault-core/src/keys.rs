//! Vault item key state
//!
//! The `<item>_keys` document carries metadata plus, in default mode, one
//! top-level field per actor holding that actor's wrapped secret:
//!
//! ```json
//! {"id": "secret1_keys", "admins": ["pivotal"], "clients": ["web1"],
//!  "search_query": [], "mode": "default", "pivotal": "<b64>", "web1": "<b64>"}
//! ```
//!
//! Any field that is not reserved metadata is an actor entry. In sparse mode
//! the base document keeps only metadata and each actor gets its own
//! `<item>_key_<actor>` document.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chefvault_store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VaultError};

/// Metadata fields of a key document; everything else is an actor.
pub const RESERVED_FIELDS: [&str; 5] = ["id", "admins", "clients", "search_query", "mode"];

pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

/// `<item>_keys`
pub fn keys_id(item: &str) -> String {
    format!("{item}_keys")
}

/// `<item>_key_<actor>`
pub fn sparse_key_id(item: &str, actor: &str) -> String {
    format!("{item}_key_{actor}")
}

/// How wrapped secrets are laid out on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeysMode {
    /// Every wrapped secret in the one `<item>_keys` document
    #[default]
    Default,
    /// One `<item>_key_<actor>` document per actor
    Sparse,
}

impl KeysMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sparse => "sparse",
        }
    }
}

impl fmt::Display for KeysMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeysMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "sparse" => Ok(Self::Sparse),
            other => Err(format!("unsupported keys mode {other:?}")),
        }
    }
}

/// Mode before and after one reconciliation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeysModeState {
    pub current: KeysMode,
    pub desired: KeysMode,
}

impl KeysModeState {
    pub fn steady(mode: KeysMode) -> Self {
        Self {
            current: mode,
            desired: mode,
        }
    }

    pub fn is_migration(&self) -> bool {
        self.current != self.desired
    }
}

/// Stored `search_query` to internal form. Chef-Vault writes `[]` when no
/// query is set, so anything other than a non-empty string is absent.
pub fn normalize_search_query(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(q)) if !q.is_empty() => Some(q.clone()),
        _ => None,
    }
}

/// Internal form back to the wire: the string, or `[]` when absent.
pub fn effective_search_query(query: Option<&str>) -> Value {
    match query {
        Some(q) if !q.is_empty() => Value::String(q.to_string()),
        _ => Value::Array(Vec::new()),
    }
}

/// A query given on the request wins over the one stored on the item.
pub fn resolve_search_query(stored: Option<&str>, requested: Option<&str>) -> Option<String> {
    requested
        .or(stored)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
}

/// Union of two actor lists, deduplicated and sorted.
pub fn merge_actors(a: &[String], b: &[String]) -> Vec<String> {
    a.iter()
        .chain(b)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Elements of `a` not in `b`, in `a`'s order.
pub fn diff_actors(a: &[String], b: &[String]) -> Vec<String> {
    let exclude: BTreeSet<&String> = b.iter().collect();
    a.iter().filter(|x| !exclude.contains(x)).cloned().collect()
}

/// Same elements, ignoring order and duplicates.
pub fn same_actors(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Key state of one vault item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VaultItemKeys {
    pub id: String,
    pub admins: Vec<String>,
    pub clients: Vec<String>,
    pub search_query: Option<String>,
    pub mode: KeysMode,
    /// Actor name to base64 wrapped secret. Empty for a sparse base document.
    pub keys: BTreeMap<String, String>,
}

impl VaultItemKeys {
    /// Decode a key document. Reserved fields are type-checked; every other
    /// string field is taken as an actor entry.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let id = match doc.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => {
                return Err(VaultError::malformed(&other.to_string(), "id is not a string"))
            }
            None => return Err(VaultError::malformed("", "missing id")),
        };

        let mode = match doc.get("mode") {
            None | Some(Value::Null) => KeysMode::Default,
            Some(Value::String(m)) => m
                .parse::<KeysMode>()
                .map_err(|e| VaultError::malformed(&id, e))?,
            Some(_) => return Err(VaultError::malformed(&id, "mode is not a string")),
        };

        let mut keys = BTreeMap::new();
        for (field, value) in doc {
            if is_reserved(field) {
                continue;
            }
            match value {
                Value::String(cipher) => {
                    keys.insert(field.clone(), cipher.clone());
                }
                _ => tracing::warn!(id = %id, actor = %field, "ignoring non-string actor entry"),
            }
        }

        Ok(Self {
            admins: string_list(doc, &id, "admins")?,
            clients: string_list(doc, &id, "clients")?,
            search_query: normalize_search_query(doc.get("search_query")),
            mode,
            keys,
            id,
        })
    }

    /// Metadata-only document: the sparse base document.
    pub fn metadata_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("id".into(), Value::String(self.id.clone()));
        doc.insert("admins".into(), string_array(&self.admins));
        doc.insert("clients".into(), string_array(&self.clients));
        doc.insert(
            "search_query".into(),
            effective_search_query(self.search_query.as_deref()),
        );
        doc.insert("mode".into(), Value::String(self.mode.as_str().into()));
        doc
    }

    /// Metadata plus every actor entry: the default-mode document.
    pub fn to_document(&self) -> Document {
        let mut doc = self.metadata_document();
        for (actor, cipher) in &self.keys {
            if is_reserved(actor) {
                tracing::warn!(actor = %actor, "actor name collides with key metadata, skipping");
                continue;
            }
            doc.insert(actor.clone(), Value::String(cipher.clone()));
        }
        doc
    }

    /// Every actor named by this state, listed or keyed.
    pub fn actor_names(&self) -> Vec<String> {
        self.admins
            .iter()
            .chain(&self.clients)
            .chain(self.keys.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// The per-actor document for sparse mode.
pub fn sparse_document(item: &str, actor: &str, cipher: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("id".into(), Value::String(sparse_key_id(item, actor)));
    doc.insert(actor.to_string(), Value::String(cipher.to_string()));
    doc
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn string_list(doc: &Document, id: &str, field: &str) -> Result<Vec<String>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    VaultError::malformed(id, format!("{field} contains a non-string entry"))
                })
            })
            .collect(),
        Some(_) => Err(VaultError::malformed(id, format!("{field} is not a list"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_default_document() {
        let keys = VaultItemKeys::from_document(&doc(json!({
            "id": "secret1_keys",
            "admins": ["pivotal", "tester"],
            "clients": ["testhost"],
            "search_query": "name:testhost*",
            "mode": "default",
            "pivotal": "pivotal-b64\n",
            "testhost": "testhost-b64\n",
            "tester": "tester-b64\n"
        })))
        .unwrap();

        assert_eq!(keys.id, "secret1_keys");
        assert_eq!(keys.admins, names(&["pivotal", "tester"]));
        assert_eq!(keys.clients, names(&["testhost"]));
        assert_eq!(keys.search_query.as_deref(), Some("name:testhost*"));
        assert_eq!(keys.mode, KeysMode::Default);
        assert_eq!(keys.keys.len(), 3);
        assert_eq!(keys.keys["testhost"], "testhost-b64\n");
    }

    #[test]
    fn test_decode_sparse_base_without_query() {
        let keys = VaultItemKeys::from_document(&doc(json!({
            "id": "secret1_keys",
            "admins": ["pivotal"],
            "clients": [],
            "search_query": [],
            "mode": "sparse"
        })))
        .unwrap();

        assert_eq!(keys.mode, KeysMode::Sparse);
        assert_eq!(keys.search_query, None);
        assert!(keys.keys.is_empty());
    }

    #[test]
    fn test_missing_mode_is_default() {
        let raw = doc(json!({"id": "a_keys", "admins": ["x"]}));
        let keys = VaultItemKeys::from_document(&raw).unwrap();
        assert_eq!(keys.mode, KeysMode::Default);
        assert!(keys.clients.is_empty());
    }

    #[test]
    fn test_malformed_documents_are_typed_errors() {
        let cases = [
            json!({"id": 42}),
            json!({"admins": []}),
            json!({"id": "a_keys", "admins": "pivotal"}),
            json!({"id": "a_keys", "clients": [1, 2]}),
            json!({"id": "a_keys", "mode": "dense"}),
        ];
        for case in cases {
            let err = VaultItemKeys::from_document(&doc(case.clone())).unwrap_err();
            assert!(matches!(err, VaultError::MalformedDocument { .. }), "{case}");
        }
    }

    #[test]
    fn test_encode_writes_sentinel_and_actor_fields() {
        let keys = VaultItemKeys {
            id: "secret1_keys".into(),
            admins: names(&["pivotal"]),
            clients: names(&["web1"]),
            search_query: None,
            mode: KeysMode::Default,
            keys: BTreeMap::from([
                ("pivotal".to_string(), "p".to_string()),
                ("web1".to_string(), "w".to_string()),
            ]),
        };

        assert_eq!(
            Value::Object(keys.to_document()),
            json!({
                "id": "secret1_keys",
                "admins": ["pivotal"],
                "clients": ["web1"],
                "search_query": [],
                "mode": "default",
                "pivotal": "p",
                "web1": "w"
            })
        );

        let base = keys.metadata_document();
        assert!(!base.contains_key("pivotal"));
        assert_eq!(base.len(), RESERVED_FIELDS.len());
    }

    #[test]
    fn test_decode_encode_preserves_document() {
        let original = doc(json!({
            "id": "secret1_keys",
            "admins": ["pivotal"],
            "clients": ["web1", "web2"],
            "search_query": "role:web",
            "mode": "default",
            "pivotal": "p",
            "web1": "w1",
            "web2": "w2"
        }));
        let keys = VaultItemKeys::from_document(&original).unwrap();
        assert_eq!(keys.to_document(), original);
    }

    #[test]
    fn test_search_query_helpers() {
        assert_eq!(normalize_search_query(Some(&json!([]))), None);
        assert_eq!(normalize_search_query(Some(&json!(""))), None);
        assert_eq!(normalize_search_query(None), None);
        assert_eq!(normalize_search_query(Some(&json!("*:*"))).as_deref(), Some("*:*"));

        assert_eq!(effective_search_query(None), json!([]));
        assert_eq!(effective_search_query(Some("role:web")), json!("role:web"));

        assert_eq!(resolve_search_query(Some("a:b"), None).as_deref(), Some("a:b"));
        assert_eq!(resolve_search_query(Some("a:b"), Some("c:d")).as_deref(), Some("c:d"));
        assert_eq!(resolve_search_query(None, None), None);
    }

    #[test]
    fn test_merge_is_idempotent_and_order_independent() {
        let current = names(&["hostB", "hostA"]);
        let extra = names(&["hostC", "hostA"]);

        let once = merge_actors(&current, &extra);
        let twice = merge_actors(&once, &extra);
        let swapped = merge_actors(&extra, &current);

        assert_eq!(once, names(&["hostA", "hostB", "hostC"]));
        assert_eq!(once, twice);
        assert_eq!(once, swapped);
    }

    #[test]
    fn test_diff_and_same() {
        let a = names(&["a", "b", "c"]);
        let b = names(&["b"]);
        assert_eq!(diff_actors(&a, &b), names(&["a", "c"]));
        assert!(same_actors(&names(&["x", "y"]), &names(&["y", "x", "x"])));
        assert!(!same_actors(&a, &b));
    }

    #[test]
    fn test_sparse_document_and_ids() {
        assert_eq!(keys_id("secret1"), "secret1_keys");
        assert_eq!(
            Value::Object(sparse_document("secret1", "web1", "w")),
            json!({"id": "secret1_key_web1", "web1": "w"})
        );
    }
}
