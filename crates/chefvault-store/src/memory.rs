//! In-memory Chef Server
//!
//! Implements every collaborator trait over a single mutex-guarded state:
//! data bags, users, clients and searchable nodes. Each trait call is
//! appended to an operation log so callers can assert on exactly which
//! remote calls a vault operation issued. Failures can be injected per
//! operation to exercise partial-write behaviour.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::{AccessKey, ActorDirectory, Document, DocumentStore, Listing, SearchIndex, SearchPlan};

/// Kind of remote call recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    CreateVault,
    DeleteVault,
    ListVaults,
    ListItems,
    CreateItem,
    GetItem,
    UpdateItem,
    DeleteItem,
    Search,
    UserKey,
    ClientKey,
}

impl OpKind {
    /// Whether this call mutates server state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateVault
                | Self::DeleteVault
                | Self::CreateItem
                | Self::UpdateItem
                | Self::DeleteItem
        )
    }
}

/// One recorded call. `target` is `vault/item`, `vault`, or the actor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub target: String,
}

#[derive(Debug)]
struct InjectedFailure {
    kind: OpKind,
    target: String,
    status: u16,
}

#[derive(Default)]
struct ServerState {
    vaults: BTreeMap<String, BTreeMap<String, Document>>,
    users: BTreeMap<String, AccessKey>,
    clients: BTreeMap<String, AccessKey>,
    nodes: BTreeMap<String, Document>,
    log: Vec<Operation>,
    failures: Vec<InjectedFailure>,
}

impl ServerState {
    /// Log the call, then fire a matching injected failure once.
    fn record(&mut self, kind: OpKind, target: &str) -> Result<()> {
        self.log.push(Operation {
            kind,
            target: target.to_string(),
        });

        if let Some(pos) = self
            .failures
            .iter()
            .position(|f| f.kind == kind && f.target == target)
        {
            let failure = self.failures.remove(pos);
            debug!(?kind, target = %target, status = failure.status, "injected failure");
            return Err(StoreError::from_status(failure.status, target, "injected failure"));
        }
        Ok(())
    }

    fn vault(&self, vault: &str) -> Result<&BTreeMap<String, Document>> {
        self.vaults.get(vault).ok_or_else(|| StoreError::NotFound {
            resource: format!("data/{vault}"),
        })
    }

    fn vault_mut(&mut self, vault: &str) -> Result<&mut BTreeMap<String, Document>> {
        self.vaults.get_mut(vault).ok_or_else(|| StoreError::NotFound {
            resource: format!("data/{vault}"),
        })
    }
}

/// Mutex-backed stand-in for a Chef Server
pub struct MemoryServer {
    base_url: String,
    state: Mutex<ServerState>,
}

impl MemoryServer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(ServerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        // A panicking test thread must not wedge the remaining assertions
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn uri(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Register a user (admin) public key.
    pub fn add_user(&self, name: &str, public_key: &str) {
        self.state().users.insert(name.to_string(), access_key(name, public_key));
    }

    /// Register a client public key.
    pub fn add_client(&self, name: &str, public_key: &str) {
        self.state().clients.insert(name.to_string(), access_key(name, public_key));
    }

    pub fn remove_client(&self, name: &str) {
        self.state().clients.remove(name);
    }

    /// Add a searchable node. `attributes` must be a JSON object; `name`
    /// is set from the argument.
    pub fn add_node(&self, name: &str, attributes: Value) {
        let mut node = attributes.as_object().cloned().unwrap_or_default();
        node.insert("name".to_string(), Value::String(name.to_string()));
        self.state().nodes.insert(name.to_string(), node);
    }

    /// Seed an item directly, bypassing the log.
    pub fn put_item(&self, vault: &str, document: Document) {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.state()
            .vaults
            .entry(vault.to_string())
            .or_default()
            .insert(id, document);
    }

    /// Inspect an item without logging a call.
    pub fn item(&self, vault: &str, item: &str) -> Option<Document> {
        self.state().vaults.get(vault).and_then(|items| items.get(item)).cloned()
    }

    /// Item names in a vault, sorted, without logging a call.
    pub fn item_names(&self, vault: &str) -> Vec<String> {
        self.state()
            .vaults
            .get(vault)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state().log.clone()
    }

    pub fn writes(&self) -> Vec<Operation> {
        self.state()
            .log
            .iter()
            .filter(|op| op.kind.is_write())
            .cloned()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.state().log.iter().filter(|op| op.kind.is_write()).count()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Make the next `kind` call on `target` fail with `status`.
    pub fn fail_next(&self, kind: OpKind, target: &str, status: u16) {
        self.state().failures.push(InjectedFailure {
            kind,
            target: target.to_string(),
            status,
        });
    }
}

fn access_key(name: &str, public_key: &str) -> AccessKey {
    AccessKey {
        name: name.to_string(),
        public_key: public_key.to_string(),
        expiration_date: "infinity".to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn create_vault(&self, vault: &str) -> Result<()> {
        let mut state = self.state();
        state.record(OpKind::CreateVault, vault)?;
        if state.vaults.contains_key(vault) {
            return Err(StoreError::Conflict {
                resource: format!("data/{vault}"),
            });
        }
        state.vaults.insert(vault.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_vault(&self, vault: &str) -> Result<()> {
        let mut state = self.state();
        state.record(OpKind::DeleteVault, vault)?;
        state.vaults.remove(vault).map(|_| ()).ok_or_else(|| StoreError::NotFound {
            resource: format!("data/{vault}"),
        })
    }

    async fn list_vaults(&self) -> Result<Listing> {
        let mut state = self.state();
        state.record(OpKind::ListVaults, "")?;
        Ok(state
            .vaults
            .keys()
            .map(|name| (name.clone(), self.uri(&format!("data/{name}"))))
            .collect())
    }

    async fn list_items(&self, vault: &str) -> Result<Listing> {
        let mut state = self.state();
        state.record(OpKind::ListItems, vault)?;
        Ok(state
            .vault(vault)?
            .keys()
            .map(|item| (item.clone(), self.uri(&format!("data/{vault}/{item}"))))
            .collect())
    }

    async fn create_item(&self, vault: &str, document: &Document) -> Result<()> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::from_status(400, format!("data/{vault}"), "item has no string id")
            })?
            .to_string();

        let mut state = self.state();
        state.record(OpKind::CreateItem, &format!("{vault}/{id}"))?;
        let items = state.vault_mut(vault)?;
        if items.contains_key(&id) {
            return Err(StoreError::Conflict {
                resource: format!("data/{vault}/{id}"),
            });
        }
        items.insert(id, document.clone());
        Ok(())
    }

    async fn get_item(&self, vault: &str, item: &str) -> Result<Document> {
        let mut state = self.state();
        state.record(OpKind::GetItem, &format!("{vault}/{item}"))?;
        state
            .vault(vault)?
            .get(item)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: format!("data/{vault}/{item}"),
            })
    }

    async fn update_item(&self, vault: &str, item: &str, document: &Document) -> Result<()> {
        let mut state = self.state();
        state.record(OpKind::UpdateItem, &format!("{vault}/{item}"))?;
        let items = state.vault_mut(vault)?;
        match items.get_mut(item) {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                resource: format!("data/{vault}/{item}"),
            }),
        }
    }

    async fn delete_item(&self, vault: &str, item: &str) -> Result<()> {
        let mut state = self.state();
        state.record(OpKind::DeleteItem, &format!("{vault}/{item}"))?;
        state
            .vault_mut(vault)?
            .remove(item)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                resource: format!("data/{vault}/{item}"),
            })
    }
}

#[async_trait]
impl SearchIndex for MemoryServer {
    async fn partial_search(&self, plan: &SearchPlan) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.record(OpKind::Search, &format!("{}?q={}", plan.index, plan.query))?;

        if plan.index != "node" {
            return Err(StoreError::NotFound {
                resource: format!("search/{}", plan.index),
            });
        }

        Ok(state
            .nodes
            .values()
            .filter(|node| query_matches(&plan.query, node))
            .map(|node| project(node, &plan.fields))
            .collect())
    }
}

#[async_trait]
impl ActorDirectory for MemoryServer {
    async fn user_key(&self, name: &str) -> Result<AccessKey> {
        let mut state = self.state();
        state.record(OpKind::UserKey, name)?;
        state.users.get(name).cloned().ok_or_else(|| StoreError::NotFound {
            resource: format!("users/{name}/keys/default"),
        })
    }

    async fn client_key(&self, name: &str) -> Result<AccessKey> {
        let mut state = self.state();
        state.record(OpKind::ClientKey, name)?;
        state.clients.get(name).cloned().ok_or_else(|| StoreError::NotFound {
            resource: format!("clients/{name}/keys/default"),
        })
    }
}

/// Evaluate `attr:glob [OR attr:glob ...]` against a node. `*:*` matches
/// everything. Non-string attributes never match.
fn query_matches(query: &str, node: &Document) -> bool {
    query.split(" OR ").any(|term| {
        let Some((attr, pattern)) = term.trim().split_once(':') else {
            return false;
        };
        if attr == "*" && pattern == "*" {
            return true;
        }
        node.get(attr)
            .and_then(Value::as_str)
            .map(|value| glob_match(pattern, value))
            .unwrap_or(false)
    })
}

fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    let (mut star, mut mark) = (None, 0);

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = vi;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn project(node: &Document, fields: &BTreeMap<String, Vec<String>>) -> Value {
    let mut row = Document::new();
    for (alias, path) in fields {
        let mut cursor = Some(node);
        let mut value = None;
        for (i, segment) in path.iter().enumerate() {
            let Some(current) = cursor else { break };
            let next = current.get(segment);
            if i + 1 == path.len() {
                value = next.cloned();
            } else {
                cursor = next.and_then(Value::as_object);
            }
        }
        row.insert(alias.clone(), value.unwrap_or(Value::Null));
    }
    Value::Object(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn name_plan(query: &str) -> SearchPlan {
        SearchPlan {
            index: "node".into(),
            query: query.into(),
            fields: BTreeMap::from([("name".to_string(), vec!["name".to_string()])]),
        }
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_item() {
        let server = MemoryServer::new("https://chef.test/organizations/acme/");
        server.create_vault("vault1").await.unwrap();
        server.create_item("vault1", &doc(json!({"id": "a"}))).await.unwrap();

        let err = server.create_item("vault1", &doc(json!({"id": "a"}))).await.unwrap_err();
        assert!(err.is_conflict());

        let err = server.create_vault("vault1").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_missing_items_are_not_found() {
        let server = MemoryServer::new("https://chef.test");
        assert!(server.get_item("nope", "a").await.unwrap_err().is_not_found());

        server.create_vault("vault1").await.unwrap();
        assert!(server.get_item("vault1", "a").await.unwrap_err().is_not_found());
        assert!(server.delete_item("vault1", "a").await.unwrap_err().is_not_found());
        assert!(server
            .update_item("vault1", "a", &doc(json!({"id": "a"})))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_listing_uses_base_url() {
        let server = MemoryServer::new("https://chef.test/organizations/acme/");
        server.put_item("vault1", doc(json!({"id": "secret1"})));

        let items = server.list_items("vault1").await.unwrap();
        assert_eq!(
            items.get("secret1").unwrap(),
            "https://chef.test/organizations/acme/data/vault1/secret1"
        );
    }

    #[tokio::test]
    async fn test_operation_log_and_write_count() {
        let server = MemoryServer::new("https://chef.test");
        server.create_vault("vault1").await.unwrap();
        server.create_item("vault1", &doc(json!({"id": "a"}))).await.unwrap();
        server.get_item("vault1", "a").await.unwrap();

        assert_eq!(server.operations().len(), 3);
        assert_eq!(server.write_count(), 2);
        assert_eq!(
            server.writes()[1],
            Operation {
                kind: OpKind::CreateItem,
                target: "vault1/a".into()
            }
        );

        server.clear_log();
        assert!(server.operations().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let server = MemoryServer::new("https://chef.test");
        server.put_item("vault1", doc(json!({"id": "a"})));
        server.fail_next(OpKind::GetItem, "vault1/a", 500);

        let err = server.get_item("vault1", "a").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(server.get_item("vault1", "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_partial_search() {
        let server = MemoryServer::new("https://chef.test");
        server.add_node("testhost", json!({"role": "web"}));
        server.add_node("testhost3", json!({"role": "db"}));
        server.add_node("other", json!({"role": "web"}));

        let rows = server.partial_search(&name_plan("name:testhost*")).await.unwrap();
        assert_eq!(rows, vec![json!({"name": "testhost"}), json!({"name": "testhost3"})]);

        let rows = server.partial_search(&name_plan("role:web")).await.unwrap();
        assert_eq!(rows.len(), 2);

        let rows = server.partial_search(&name_plan("*:*")).await.unwrap();
        assert_eq!(rows.len(), 3);

        let rows = server
            .partial_search(&name_plan("name:other OR role:db"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_actor_keys() {
        let server = MemoryServer::new("https://chef.test");
        server.add_user("pivotal", "PEM");
        server.add_client("testhost", "PEM2");

        assert_eq!(server.user_key("pivotal").await.unwrap().public_key, "PEM");
        assert_eq!(server.client_key("testhost").await.unwrap().expiration_date, "infinity");
        assert!(server.client_key("pivotal").await.unwrap_err().is_not_found());

        server.remove_client("testhost");
        assert!(server.client_key("testhost").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("test*", "testhost"));
        assert!(glob_match("*host?", "testhost3"));
        assert!(!glob_match("test?", "testhost"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("a", "b"));
    }
}
