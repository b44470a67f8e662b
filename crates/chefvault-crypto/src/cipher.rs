//! AES-256-GCM content cipher (encrypted data bag format version 3)
//!
//! Every field of a vault item is encrypted on its own. The stored record
//! keeps ciphertext and tag apart:
//!
//! ```json
//! {"encrypted_data": "..", "iv": "..", "auth_tag": "..", "version": 3, "cipher": "aes-256-gcm"}
//! ```
//!
//! The AES key is never the shared secret itself but `SHA-256(secret)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::wrap::SharedSecret;
use crate::{CryptoError, Result};

/// 256-bit key (32 bytes)
pub const KEY_SIZE: usize = 32;
/// 96-bit nonce (12 bytes)
pub const NONCE_SIZE: usize = 12;
/// 128-bit GCM tag (16 bytes)
pub const TAG_SIZE: usize = 16;
/// Encrypted data bag format version written by this crate
pub const FORMAT_VERSION: u32 = 3;
/// Cipher identifier stored alongside every value
pub const CIPHER_NAME: &str = "aes-256-gcm";

/// Non-object values are boxed under this key before encryption.
const JSON_WRAPPER: &str = "json_wrapper";

/// One encrypted field as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub encrypted_data: String,
    pub iv: String,
    pub auth_tag: String,
    pub version: u32,
    pub cipher: String,
}

impl EncryptedValue {
    /// Whether a raw document field has the shape of an encrypted value.
    pub fn looks_encrypted(value: &Value) -> bool {
        value
            .as_object()
            .map(|obj| obj.contains_key("encrypted_data"))
            .unwrap_or(false)
    }

    /// Type-checked decode of a raw document field.
    pub fn from_field(field: &str, value: &Value) -> Result<Self> {
        let malformed = |reason: &str| CryptoError::MalformedValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let obj = value.as_object().ok_or_else(|| malformed("not an object"))?;
        let text = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| malformed(&format!("missing string {key:?}")))
        };

        Ok(Self {
            encrypted_data: text("encrypted_data")?,
            iv: text("iv")?,
            auth_tag: text("auth_tag")?,
            version: obj
                .get("version")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(FORMAT_VERSION),
            cipher: obj
                .get("cipher")
                .and_then(Value::as_str)
                .unwrap_or(CIPHER_NAME)
                .to_string(),
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Derive the content key from a shared secret.
pub fn derive_content_key(secret: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let digest = Sha256::digest(secret);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&digest);
    key
}

/// Remove whitespace that Chef's line-wrapped base64 may contain.
pub fn clean_b64(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

fn decode_b64(field: &str, part: &str, s: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(clean_b64(s))
        .map_err(|e| CryptoError::MalformedValue {
            field: field.to_string(),
            reason: format!("{part}: {e}"),
        })
}

fn new_cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeySize {
            expected: KEY_SIZE,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize {
        expected: KEY_SIZE,
        got: key.len(),
    })
}

/// Encrypt a single JSON value under an already-derived content key.
pub fn encrypt_value(key: &[u8], field: &str, value: &Value) -> Result<EncryptedValue> {
    let cipher = new_cipher(key)?;

    let mut wrapped = Map::new();
    wrapped.insert(JSON_WRAPPER.to_string(), value.clone());
    let plaintext = Zeroizing::new(serde_json::to_vec(&Value::Object(wrapped))?);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| CryptoError::Encryption(field.to_string()))?;

    // aes-gcm appends the tag; the wire format stores it separately
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    Ok(EncryptedValue {
        encrypted_data: BASE64.encode(ciphertext),
        iv: BASE64.encode(nonce_bytes),
        auth_tag: BASE64.encode(tag),
        version: FORMAT_VERSION,
        cipher: CIPHER_NAME.to_string(),
    })
}

/// Decrypt a single encrypted value under an already-derived content key.
pub fn decrypt_value(key: &[u8], field: &str, ev: &EncryptedValue) -> Result<Value> {
    let cipher = new_cipher(key)?;

    let mut sealed = decode_b64(field, "encrypted_data", &ev.encrypted_data)?;
    let nonce_bytes = decode_b64(field, "iv", &ev.iv)?;
    let tag = decode_b64(field, "auth_tag", &ev.auth_tag)?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::MalformedValue {
            field: field.to_string(),
            reason: format!("iv must be {NONCE_SIZE} bytes, got {}", nonce_bytes.len()),
        });
    }

    sealed.extend_from_slice(&tag);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CryptoError::Decryption(field.to_string()))?,
    );

    let value: Value = serde_json::from_slice(&plaintext)?;
    Ok(unwrap_json_wrapper(value))
}

fn unwrap_json_wrapper(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.len() == 1 && obj.contains_key(JSON_WRAPPER) => {
            obj.remove(JSON_WRAPPER).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Encrypts and decrypts whole vault item documents.
pub trait ContentCipher: Send + Sync {
    /// Build the encrypted document for `item_name` from plaintext content.
    fn encrypt_item(
        &self,
        item_name: &str,
        content: &Map<String, Value>,
        secret: &SharedSecret,
    ) -> Result<Map<String, Value>>;

    /// Recover plaintext content; the `id` field is not returned.
    fn decrypt_item(
        &self,
        document: &Map<String, Value>,
        secret: &SharedSecret,
    ) -> Result<Map<String, Value>>;
}

/// The Chef encrypted data bag v3 cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl ContentCipher for AesGcmCipher {
    fn encrypt_item(
        &self,
        item_name: &str,
        content: &Map<String, Value>,
        secret: &SharedSecret,
    ) -> Result<Map<String, Value>> {
        let key = derive_content_key(secret.as_bytes());

        let mut document = Map::new();
        document.insert("id".to_string(), Value::String(item_name.to_string()));

        for (field, value) in content {
            if field == "id" {
                continue;
            }
            let encrypted = encrypt_value(key.as_slice(), field, value)?;
            document.insert(field.clone(), encrypted.to_value()?);
        }

        Ok(document)
    }

    fn decrypt_item(
        &self,
        document: &Map<String, Value>,
        secret: &SharedSecret,
    ) -> Result<Map<String, Value>> {
        let key = derive_content_key(secret.as_bytes());

        let mut content = Map::new();
        for (field, raw) in document {
            if field == "id" {
                continue;
            }
            let ev = EncryptedValue::from_field(field, raw)?;
            content.insert(field.clone(), decrypt_value(key.as_slice(), field, &ev)?);
        }

        Ok(content)
    }
}
