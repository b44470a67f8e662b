//! Key reconciliation
//!
//! Moves an item's key documents from their current state to a desired one.
//! The store has no transactions or upsert, so every write is a create that
//! falls back to an update on conflict, and a failure part way through
//! leaves whatever was already written in place. Re-running the same
//! reconciliation converges.
//!
//! Order of remote calls:
//! 1. mode migration cleanup (documents of the mode being left)
//! 2. sparse documents of actors that lost access
//! 3. `<item>_keys` (full in default mode, metadata only in sparse mode)
//! 4. `<item>_key_<actor>` per actor, sparse mode only

use std::collections::{BTreeMap, BTreeSet};

use chefvault_crypto::{SecretWrapper, SharedSecret};
use chefvault_store::{Document, DocumentStore};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};
use crate::keys::{
    is_reserved, keys_id, sparse_document, sparse_key_id, KeysMode, KeysModeState, VaultItemKeys,
};
use crate::resolver::ResolvedActors;

/// Wrap `secret` for every resolved actor and assemble the desired state.
/// Actors named like a metadata field are left out in both modes.
pub fn build_keys(
    wrapper: &dyn SecretWrapper,
    item: &str,
    actors: &ResolvedActors,
    search_query: Option<String>,
    mode: KeysMode,
    secret: &SharedSecret,
) -> Result<VaultItemKeys> {
    let mut keys = BTreeMap::new();
    for (name, access) in actors.all() {
        if is_reserved(name) {
            warn!(actor = %name, "actor name collides with key metadata, skipping");
            continue;
        }
        let wrapped = wrapper.wrap_secret(&access.public_key, secret)?;
        keys.insert(name.to_string(), wrapped);
    }

    let usable = |names: Vec<String>| -> Vec<String> {
        names.into_iter().filter(|n| !is_reserved(n)).collect()
    };
    let admins = usable(actors.admin_names());
    if admins.is_empty() {
        return Err(VaultError::NoAdminKeys);
    }

    Ok(VaultItemKeys {
        id: keys_id(item),
        admins,
        clients: usable(actors.client_names()),
        search_query,
        mode,
        keys,
    })
}

pub struct KeyReconciler<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> KeyReconciler<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn item_uri(&self, vault: &str, id: &str) -> String {
        format!("{}/data/{}/{}", self.store.base_url(), vault, id)
    }

    /// Write `desired`, clean up what `current` leaves behind, and return
    /// the URI of every key document written.
    pub async fn reconcile(
        &self,
        vault: &str,
        item: &str,
        current: Option<&VaultItemKeys>,
        desired: &VaultItemKeys,
        mode_state: KeysModeState,
    ) -> Result<Vec<String>> {
        if desired.mode != mode_state.desired {
            return Err(VaultError::malformed(
                &desired.id,
                format!("desired mode {} does not match {}", desired.mode, mode_state.desired),
            ));
        }

        if mode_state.is_migration() {
            self.leave_mode(vault, item, current, desired, mode_state.current)
                .await?;
        } else if mode_state.desired == KeysMode::Sparse {
            if let Some(current) = current {
                self.prune_sparse(vault, item, current, desired).await?;
            }
        }

        match desired.mode {
            KeysMode::Default => {
                let uri = self.upsert(vault, &desired.to_document()).await?;
                Ok(vec![uri])
            }
            KeysMode::Sparse => {
                let mut uris = vec![self.upsert(vault, &desired.metadata_document()).await?];
                for (actor, cipher) in &desired.keys {
                    uris.push(self.upsert(vault, &sparse_document(item, actor, cipher)).await?);
                }
                Ok(uris)
            }
        }
    }

    /// Delete every document that belongs only to the mode being left.
    async fn leave_mode(
        &self,
        vault: &str,
        item: &str,
        current: Option<&VaultItemKeys>,
        desired: &VaultItemKeys,
        leaving: KeysMode,
    ) -> Result<()> {
        debug!(
            vault = %vault,
            item = %item,
            from = %leaving,
            to = %desired.mode,
            "migrating keys mode"
        );
        match leaving {
            KeysMode::Default => {
                self.delete_if_present(vault, &keys_id(item)).await?;
            }
            KeysMode::Sparse => {
                let mut actors: BTreeSet<String> = desired.keys.keys().cloned().collect();
                if let Some(current) = current {
                    actors.extend(current.actor_names());
                }
                for actor in actors {
                    self.delete_if_present(vault, &sparse_key_id(item, &actor)).await?;
                }
            }
        }
        Ok(())
    }

    /// Staying sparse: drop the documents of actors without a desired key.
    async fn prune_sparse(
        &self,
        vault: &str,
        item: &str,
        current: &VaultItemKeys,
        desired: &VaultItemKeys,
    ) -> Result<()> {
        for actor in current.actor_names() {
            if !desired.keys.contains_key(&actor) {
                self.delete_if_present(vault, &sparse_key_id(item, &actor)).await?;
            }
        }
        Ok(())
    }

    /// Create, or update in place when the document already exists.
    pub async fn upsert(&self, vault: &str, document: &Document) -> Result<String> {
        let id = document_id(document)?;
        match self.store.create_item(vault, document).await {
            Ok(()) => debug!(vault = %vault, id = %id, "created document"),
            Err(e) if e.is_conflict() => {
                self.store.update_item(vault, id, document).await?;
                debug!(vault = %vault, id = %id, "updated document");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(self.item_uri(vault, id))
    }

    /// Delete a document, treating not-found as already clean. Returns
    /// whether anything was deleted.
    pub async fn delete_if_present(&self, vault: &str, id: &str) -> Result<bool> {
        match self.store.delete_item(vault, id).await {
            Ok(()) => {
                debug!(vault = %vault, id = %id, "deleted document");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!(vault = %vault, id = %id, "document already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn document_id(document: &Document) -> Result<&str> {
    document
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| VaultError::malformed("", "document has no string id"))
}
