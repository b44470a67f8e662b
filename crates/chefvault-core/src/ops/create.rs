use chefvault_store::Document;
use tracing::{debug, info};

use crate::error::Result;
use crate::keys::{resolve_search_query, KeysModeState};
use crate::payload::Payload;
use crate::service::{CreateResponse, DataResponse, KeyPlan, VaultService};

impl VaultService {
    /// Create a vault item readable by the requested admins and clients.
    ///
    /// The vault itself is created when missing. Keys and content are
    /// written create-then-update, so repeating a create rewrites the item
    /// under a new secret and leaves it readable.
    pub async fn create(&self, payload: &Payload) -> Result<CreateResponse> {
        payload.validate()?;
        let vault = payload.vault_name.as_str();
        let item = payload.item_name.as_str();

        match self.store().create_vault(vault).await {
            Ok(()) => debug!(vault = %vault, "created vault"),
            Err(e) if e.is_conflict() => debug!(vault = %vault, "vault already exists"),
            Err(e) => return Err(e.into()),
        }

        let mode = payload.effective_keys_mode();
        let (secret, keys_uris) = self
            .rekey(KeyPlan {
                vault,
                item,
                current: None,
                admins: &payload.admins,
                clients: &payload.clients,
                search_query: resolve_search_query(None, payload.requested_query()),
                expand_search: true,
                mode_state: KeysModeState::steady(mode),
            })
            .await?;

        let content = payload.content.clone().unwrap_or_else(Document::new);
        self.write_content(vault, item, &content, &secret, true).await?;

        info!(
            vault = %vault,
            item = %item,
            mode = %mode,
            keys = keys_uris.len(),
            "created vault item"
        );
        Ok(CreateResponse {
            uri: self.vault_url(vault),
            data: DataResponse {
                uri: self.item_uri(vault, item),
            },
            keys_uris,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::VaultError;
    use crate::keys::{KeysMode, VaultItemKeys};
    use crate::payload::Payload;
    use crate::service::testing::*;
    use chefvault_crypto::EncryptedValue;
    use chefvault_store::OpKind;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_create_writes_keys_and_encrypted_content() {
        let (server, service) = fixture();
        let payload = Payload::new("vault1", "secret1")
            .with_content(json!({"baz": "v1"}).as_object().cloned().unwrap())
            .with_admins(["pivotal"])
            .with_clients(["hostA"]);

        let resp = service.create(&payload).await.unwrap();

        assert_eq!(resp.uri, format!("{BASE_URL}/data/vault1"));
        assert_eq!(resp.data.uri, format!("{BASE_URL}/data/vault1/secret1"));
        assert_eq!(resp.keys_uris, vec![format!("{BASE_URL}/data/vault1/secret1_keys")]);

        let content = server.item("vault1", "secret1").unwrap();
        assert_eq!(content["id"], json!("secret1"));
        assert!(EncryptedValue::looks_encrypted(&content["baz"]));

        let stored = server.item("vault1", "secret1_keys").unwrap();
        let keys = VaultItemKeys::from_document(&stored).unwrap();
        assert_eq!(keys.admins, vec!["pivotal"]);
        assert_eq!(keys.clients, vec!["hostA"]);
        assert_eq!(keys.mode, KeysMode::Default);
        assert_eq!(keys.keys.len(), 2);
        assert_eq!(
            server.item("vault1", "secret1_keys").unwrap()["search_query"],
            Value::Array(vec![])
        );
    }

    #[tokio::test]
    async fn test_create_in_existing_vault() {
        let (server, service) = fixture();
        server.put_item("vault1", json!({"id": "other"}).as_object().cloned().unwrap());

        service
            .create(&Payload::new("vault1", "secret1").with_admins(["pivotal"]))
            .await
            .unwrap();
        assert_eq!(server.item_names("vault1"), vec!["other", "secret1", "secret1_keys"]);
    }

    #[tokio::test]
    async fn test_create_sparse_with_search() {
        let (server, service) = fixture();
        let payload = Payload::new("vault1", "secret1")
            .with_admins(["pivotal"])
            .with_search_query("role:web")
            .with_keys_mode(KeysMode::Sparse);

        let resp = service.create(&payload).await.unwrap();

        assert_eq!(resp.keys_uris.len(), 3);
        let base = server.item("vault1", "secret1_keys").unwrap();
        assert_eq!(base["clients"], json!(["hostA"]));
        assert_eq!(base["search_query"], json!("role:web"));
        assert!(server.item("vault1", "secret1_key_hostA").is_some());
        assert!(server.item("vault1", "secret1_key_pivotal").is_some());
    }

    #[tokio::test]
    async fn test_repeated_create_stays_readable() {
        let (server, service) = fixture();
        let payload = Payload::new("vault1", "secret1")
            .with_content(json!({"baz": "v1"}).as_object().cloned().unwrap())
            .with_admins(["pivotal"]);

        service.create(&payload).await.unwrap();
        let first = server.item("vault1", "secret1_keys").unwrap();
        service.create(&payload).await.unwrap();

        let second = server.item("vault1", "secret1_keys").unwrap();
        assert_ne!(second["pivotal"], first["pivotal"]);
        let got = service.get("vault1", "secret1").await.unwrap();
        assert_eq!(Value::Object(got), json!({"baz": "v1"}));
    }

    #[tokio::test]
    async fn test_create_validates_before_remote_calls() {
        let (server, service) = fixture();
        let err = service.create(&Payload::new("", "secret1")).await.unwrap_err();
        assert!(matches!(err, VaultError::MissingVaultName));
        assert!(server.operations().is_empty());
    }

    #[tokio::test]
    async fn test_create_without_admin_keys() {
        let (server, service) = fixture();
        let err = service
            .create(&Payload::new("vault1", "secret1").with_admins(["nobody"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NoAdminKeys));
        // The vault container was already created
        assert_eq!(
            server.writes().iter().map(|op| op.kind).collect::<Vec<_>>(),
            vec![OpKind::CreateVault]
        );
    }
}
