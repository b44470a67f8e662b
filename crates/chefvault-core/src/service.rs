//! The vault service
//!
//! Holds the caller identity, the three server collaborators and the two
//! crypto strategies. Each verb lives in its own module under `ops` as an
//! `impl VaultService` block; the shared plumbing is here.

use std::fmt;
use std::sync::Arc;

use chefvault_crypto::{
    generate_secret, AesGcmCipher, ContentCipher, RsaSecretWrapper, SecretWrapper, SharedSecret,
    SECRET_SIZE,
};
use chefvault_store::{ActorDirectory, Document, DocumentStore, SearchIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::ClientIdentity;
use crate::error::{Result, VaultError};
use crate::keys::{is_reserved, keys_id, sparse_key_id, KeysModeState, VaultItemKeys};
use crate::reconcile::{build_keys, KeyReconciler};
use crate::resolver::ActorResolver;

/// Location of a written content document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub uri: String,
    pub data: DataResponse,
    pub keys_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys_uris: Vec<String>,
}

pub type RefreshResponse = UpdateResponse;
pub type RemoveResponse = UpdateResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateResponse {
    pub uri: String,
    pub keys_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub uri: String,
    #[serde(rename = "keys", default, skip_serializing_if = "Vec::is_empty")]
    pub keys_uris: Vec<String>,
}

/// What a data bag item is, judged the way knife does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Vault,
    Encrypted,
    Normal,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vault => "vault",
            Self::Encrypted => "encrypted",
            Self::Normal => "normal",
        })
    }
}

/// Desired access state for one rekey.
pub(crate) struct KeyPlan<'a> {
    pub vault: &'a str,
    pub item: &'a str,
    pub current: Option<&'a VaultItemKeys>,
    pub admins: &'a [String],
    pub clients: &'a [String],
    pub search_query: Option<String>,
    /// Add the clients matched by `search_query` to `clients`.
    pub expand_search: bool,
    pub mode_state: KeysModeState,
}

pub struct VaultService {
    store: Arc<dyn DocumentStore>,
    search: Arc<dyn SearchIndex>,
    directory: Arc<dyn ActorDirectory>,
    identity: ClientIdentity,
    cipher: Arc<dyn ContentCipher>,
    wrapper: Arc<dyn SecretWrapper>,
}

impl VaultService {
    pub fn new(
        identity: ClientIdentity,
        store: Arc<dyn DocumentStore>,
        search: Arc<dyn SearchIndex>,
        directory: Arc<dyn ActorDirectory>,
    ) -> Self {
        Self {
            store,
            search,
            directory,
            identity,
            cipher: Arc::new(AesGcmCipher),
            wrapper: Arc::new(RsaSecretWrapper),
        }
    }

    /// One server object playing all three collaborator roles.
    pub fn from_server<S>(identity: ClientIdentity, server: Arc<S>) -> Self
    where
        S: DocumentStore + SearchIndex + ActorDirectory + 'static,
    {
        Self::new(identity, server.clone(), server.clone(), server)
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn ContentCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn SecretWrapper>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Same service, acting as someone else.
    pub fn as_actor(&self, identity: ClientIdentity) -> Self {
        Self {
            store: self.store.clone(),
            search: self.search.clone(),
            directory: self.directory.clone(),
            identity,
            cipher: self.cipher.clone(),
            wrapper: self.wrapper.clone(),
        }
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub(crate) fn resolver(&self) -> ActorResolver<'_> {
        ActorResolver::new(self.directory.as_ref(), self.search.as_ref())
    }

    pub(crate) fn reconciler(&self) -> KeyReconciler<'_> {
        KeyReconciler::new(self.store.as_ref())
    }

    pub fn vault_url(&self, vault: &str) -> String {
        format!("{}/data/{}", self.store.base_url(), vault)
    }

    pub fn item_uri(&self, vault: &str, item: &str) -> String {
        format!("{}/{}", self.vault_url(vault), item)
    }

    /// Fresh key state of an item from `<item>_keys`.
    pub async fn load_key_state(&self, vault: &str, item: &str) -> Result<VaultItemKeys> {
        let doc = self.store.get_item(vault, &keys_id(item)).await?;
        VaultItemKeys::from_document(&doc)
    }

    /// The caller's wrapped secret: `<item>_keys` first, then the caller's
    /// sparse document.
    pub async fn load_actor_key(&self, vault: &str, item: &str) -> Result<String> {
        let actor = self.identity.name();
        let denied = || VaultError::AccessDenied {
            vault: vault.to_string(),
            item: item.to_string(),
        };

        let keys = self.store.get_item(vault, &keys_id(item)).await?;
        if !is_reserved(actor) {
            if let Some(entry) = keys.get(actor) {
                return cipher_string(&keys_id(item), entry);
            }
        }

        let sparse_id = sparse_key_id(item, actor);
        match self.store.get_item(vault, &sparse_id).await {
            Ok(doc) => match doc.get(actor) {
                Some(entry) => cipher_string(&sparse_id, entry),
                None => Err(denied()),
            },
            Err(e) if e.is_not_found() => Err(denied()),
            Err(e) => Err(e.into()),
        }
    }

    /// Unwrap the caller's copy of the item secret.
    pub async fn load_shared_secret(&self, vault: &str, item: &str) -> Result<SharedSecret> {
        let wrapped = self.load_actor_key(vault, item).await?;
        Ok(self.wrapper.unwrap_secret(&wrapped, self.identity.private_key())?)
    }

    /// New secret, resolved actors, reconciled key documents.
    pub(crate) async fn rekey(&self, plan: KeyPlan<'_>) -> Result<(SharedSecret, Vec<String>)> {
        let secret = generate_secret(SECRET_SIZE);
        let query = plan.search_query.as_deref().filter(|_| plan.expand_search);
        let actors = self.resolver().resolve(plan.admins, plan.clients, query).await?;

        let desired = build_keys(
            self.wrapper.as_ref(),
            plan.item,
            &actors,
            plan.search_query,
            plan.mode_state.desired,
            &secret,
        )?;

        let uris = self
            .reconciler()
            .reconcile(plan.vault, plan.item, plan.current, &desired, plan.mode_state)
            .await?;

        debug!(
            vault = %plan.vault,
            item = %plan.item,
            actors = desired.keys.len(),
            mode = %desired.mode,
            "rekeyed item"
        );
        Ok((secret, uris))
    }

    /// Encrypt `content` under `secret` and write it as the item document.
    /// With `create`, an existing item is overwritten like a key document.
    pub(crate) async fn write_content(
        &self,
        vault: &str,
        item: &str,
        content: &Document,
        secret: &SharedSecret,
        create: bool,
    ) -> Result<()> {
        let encrypted = self.cipher.encrypt_item(item, content, secret)?;
        if create {
            self.reconciler().upsert(vault, &encrypted).await?;
        } else {
            self.store.update_item(vault, item, &encrypted).await?;
        }
        Ok(())
    }

    pub(crate) fn decrypt(&self, document: &Document, secret: &SharedSecret) -> Result<Document> {
        Ok(self.cipher.decrypt_item(document, secret)?)
    }
}

fn cipher_string(id: &str, entry: &Value) -> Result<String> {
    entry
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| VaultError::malformed(id, "actor key is not a string"))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uris() {
        let (_server, service) = fixture();
        assert_eq!(service.vault_url("vault1"), format!("{BASE_URL}/data/vault1"));
        assert_eq!(
            service.item_uri("vault1", "secret1"),
            format!("{BASE_URL}/data/vault1/secret1")
        );
    }

    #[test]
    fn test_response_shapes() {
        let rotate = RotateResponse {
            uri: "u".into(),
            keys_uris: vec!["k".into()],
        };
        assert_eq!(serde_json::to_value(&rotate).unwrap(), json!({"uri": "u", "keys_uris": ["k"]}));

        let refresh = RefreshResponse {
            uri: "u".into(),
            data: None,
            keys_uris: Vec::new(),
        };
        assert_eq!(serde_json::to_value(&refresh).unwrap(), json!({"uri": "u"}));

        let delete = DeleteResponse {
            uri: "u".into(),
            keys_uris: vec!["k".into()],
        };
        assert_eq!(serde_json::to_value(&delete).unwrap(), json!({"uri": "u", "keys": ["k"]}));
        assert_eq!(ItemType::Encrypted.to_string(), "encrypted");
    }

    #[tokio::test]
    async fn test_actor_key_falls_back_to_sparse_document() {
        let (server, service) = fixture();
        server.put_item(
            "vault1",
            json!({
                "id": "secret1_keys",
                "admins": ["pivotal"],
                "clients": [],
                "search_query": [],
                "mode": "sparse"
            })
                .as_object()
                .cloned()
                .unwrap(),
        );
        server.put_item(
            "vault1",
            json!({"id": "secret1_key_pivotal", "pivotal": "wrapped"})
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(service.load_actor_key("vault1", "secret1").await.unwrap(), "wrapped");

        let err = service.as_actor(tester()).load_actor_key("vault1", "secret1").await.unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied { .. }));
        assert_eq!(err.to_string(), "vault1/secret1 is not encrypted with your public key");
    }

    #[tokio::test]
    async fn test_non_string_actor_key_is_malformed() {
        let (server, service) = fixture();
        server.put_item(
            "vault1",
            json!({"id": "secret1_keys", "admins": ["pivotal"], "pivotal": 7})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let err = service.load_actor_key("vault1", "secret1").await.unwrap_err();
        assert!(matches!(err, VaultError::MalformedDocument { .. }));
    }

    #[tokio::test]
    async fn test_missing_keys_document_is_not_found() {
        let (_server, service) = fixture();
        let err = service.load_key_state("vault1", "secret1").await.unwrap_err();
        assert!(err.is_not_found());

        let err = service.get("vault1", "secret1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
