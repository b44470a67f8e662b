//! Chefvault Core - Chef-Vault items on a plain Chef Server
//!
//! A vault item is an encrypted content document plus key documents that
//! hold, for every authorized admin and client, an RSA-wrapped copy of the
//! item's shared secret. The server only stores JSON; this crate does the
//! rest on the client:
//! - key state model matching the Chef-Vault document layout
//! - actor resolution from explicit lists and node searches
//! - reconciliation of key documents, including default/sparse migration
//! - the vault verbs on [`VaultService`]
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use chefvault_store::MemoryServer;
//! # async fn demo(server: Arc<MemoryServer>) -> chefvault_core::Result<()> {
//! use chefvault_core::{Payload, ServiceConfig, VaultService};
//!
//! let identity = ServiceConfig::from_env()?.identity()?;
//! let service = VaultService::from_server(identity, server);
//!
//! let payload = Payload::new("passwords", "root")
//!     .with_admins(["pivotal"])
//!     .with_search_query("role:web");
//! service.create(&payload).await?;
//! let content = service.get("passwords", "root").await?;
//! # let _ = content;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod keys;
mod ops;
pub mod payload;
pub mod reconcile;
pub mod resolver;
pub mod service;

pub use config::{ClientIdentity, ServiceConfig};
pub use error::{Result, VaultError};
pub use keys::{KeysMode, KeysModeState, VaultItemKeys};
pub use ops::{merge_content, prune_content};
pub use payload::Payload;
pub use resolver::{ActorResolver, ResolvedActors};
pub use service::{
    CreateResponse, DataResponse, DeleteResponse, ItemType, RefreshResponse, RemoveResponse,
    RotateResponse, UpdateResponse, VaultService,
};
