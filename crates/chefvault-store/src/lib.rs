//! Chefvault Store - the Chef Server as seen by the vault layer
//!
//! The server knows nothing about encryption; it stores JSON data bag
//! items, runs indexed searches and hands out actor public keys. This
//! crate defines those three collaborators as traits so the vault logic
//! can run against a real REST client or the in-memory [`MemoryServer`].

pub mod error;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::{Result, StoreError};
pub use memory::{MemoryServer, OpKind, Operation};

/// A data bag item: a JSON object with a string `id`.
pub type Document = Map<String, Value>;

/// Name to URL listing, as returned by the data bag list endpoints.
pub type Listing = BTreeMap<String, String>;

/// Public key record for a user or client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub name: String,
    pub public_key: String,
    pub expiration_date: String,
}

/// Data bag storage, addressed by vault (data bag) and item name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Server URL used to build resource URIs.
    fn base_url(&self) -> &str;

    async fn create_vault(&self, vault: &str) -> Result<()>;

    async fn delete_vault(&self, vault: &str) -> Result<()>;

    async fn list_vaults(&self) -> Result<Listing>;

    async fn list_items(&self, vault: &str) -> Result<Listing>;

    /// Create an item named by the document's `id`. Fails with a conflict
    /// when it already exists.
    async fn create_item(&self, vault: &str, document: &Document) -> Result<()>;

    async fn get_item(&self, vault: &str, item: &str) -> Result<Document>;

    async fn update_item(&self, vault: &str, item: &str, document: &Document) -> Result<()>;

    async fn delete_item(&self, vault: &str, item: &str) -> Result<()>;
}

/// A partial search request: `fields` maps result keys to attribute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPlan {
    pub index: String,
    pub query: String,
    pub fields: BTreeMap<String, Vec<String>>,
}

/// The server-side search engine.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Execute a partial search, one JSON object per matching row.
    async fn partial_search(&self, plan: &SearchPlan) -> Result<Vec<Value>>;
}

/// Public key lookups for users (admins) and clients.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn user_key(&self, name: &str) -> Result<AccessKey>;

    async fn client_key(&self, name: &str) -> Result<AccessKey>;
}
