/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Key manager: signing keypairs and verify-key identifiers.
//!
//! A publisher owns exactly one [`KeyPair`]. Its secret half stays in the
//! publishing checkout's private storage; only the [`VerifyKey`] string
//! (`vk0-<hex public key>`) is handed to downstream checkouts.

use crate::crypto::{
    compute_key_fingerprint, generate_signing_keypair, public_key_for, validate_public_key,
    SigningError, PRIVATE_KEY_LENGTH, PUBLIC_KEY_LENGTH,
};
use crate::substrate::{Substrate, SubstrateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Algorithm/version tag carried by every verify key string.
pub const VERIFY_KEY_PREFIX: &str = "vk0-";

/// Algorithm behind the `vk0` tag.
pub const ALGORITHM_ED25519: &str = "ed25519";

/// Private file holding the publisher's key.
pub const KEY_FILE: &str = "signing-key.toml";

/// Errors that can occur during key management operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    Generation(#[source] SigningError),

    #[error("Invalid verify key {value:?}: {reason}")]
    InvalidVerifyKey { value: String, reason: String },

    #[error("Stored signing key is corrupt: {0}")]
    Corrupt(String),

    #[error("Unsupported stored key version {0}")]
    UnsupportedVersion(u32),

    #[error("Key storage error: {0}")]
    Storage(#[from] SubstrateError),

    #[error("Failed to serialize signing key: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Public verification key, printable as `vk0-<64 hex chars>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerifyKey {
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl VerifyKey {
    pub fn from_public_key(public_key: [u8; PUBLIC_KEY_LENGTH]) -> Result<Self, KeyError> {
        validate_public_key(&public_key).map_err(|e| KeyError::InvalidVerifyKey {
            value: hex::encode(public_key),
            reason: e.to_string(),
        })?;
        Ok(Self { public_key })
    }

    /// Parse a verify key string.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        let value = value.trim();
        let invalid = |reason: &str| KeyError::InvalidVerifyKey {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let encoded = value.strip_prefix(VERIFY_KEY_PREFIX).ok_or_else(|| {
            if value.starts_with("vk") {
                invalid("unsupported algorithm version tag")
            } else {
                invalid("missing 'vk0-' prefix")
            }
        })?;

        let bytes = hex::decode(encoded).map_err(|_| invalid("identifier is not hex"))?;
        let public_key: [u8; PUBLIC_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| invalid("identifier has the wrong length"))?;

        validate_public_key(&public_key).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self { public_key })
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    /// Algorithm tag of this key's signatures.
    pub fn algorithm(&self) -> &'static str {
        ALGORITHM_ED25519
    }

    /// SHA256 fingerprint, for logs.
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.public_key)
    }
}

impl fmt::Display for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", VERIFY_KEY_PREFIX, hex::encode(self.public_key))
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyKey({})", self)
    }
}

impl FromStr for VerifyKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VerifyKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VerifyKey> for String {
    fn from(key: VerifyKey) -> Self {
        key.to_string()
    }
}

/// A publisher's signing keypair.
///
/// The secret is only reachable inside this crate and is redacted from
/// `Debug` output.
#[derive(Clone)]
pub struct KeyPair {
    secret: [u8; PRIVATE_KEY_LENGTH],
    verify_key: VerifyKey,
    created_at: DateTime<Utc>,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Result<Self, KeyError> {
        let generated = generate_signing_keypair().map_err(KeyError::Generation)?;
        Ok(Self {
            secret: generated.private_key,
            verify_key: VerifyKey::from_public_key(generated.public_key)?,
            created_at: Utc::now(),
        })
    }

    fn from_secret(
        secret: [u8; PRIVATE_KEY_LENGTH],
        created_at: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        let public_key = public_key_for(&secret).map_err(|e| KeyError::Corrupt(e.to_string()))?;
        Ok(Self {
            secret,
            verify_key: VerifyKey::from_public_key(public_key)?,
            created_at,
        })
    }

    pub fn verify_key(&self) -> &VerifyKey {
        &self.verify_key
    }

    /// The distributable `vk0-…` identifier.
    pub fn verify_key_id(&self) -> String {
        self.verify_key.to_string()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn secret(&self) -> &[u8; PRIVATE_KEY_LENGTH] {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("verify_key", &self.verify_key)
            .field("secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// On-disk form of a [`KeyPair`].
#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    version: u32,
    algorithm: String,
    secret_key: String,
    verify_key: String,
    created_at: DateTime<Utc>,
}

impl StoredKey {
    const VERSION: u32 = 0;
}

/// Loads and stores the publisher key in a checkout's private storage.
pub struct KeyStore<'a> {
    substrate: &'a dyn Substrate,
}

impl<'a> KeyStore<'a> {
    pub fn new(substrate: &'a dyn Substrate) -> Self {
        Self { substrate }
    }

    /// Load the checkout's keypair, if one has been set up.
    pub async fn load(&self) -> Result<Option<KeyPair>, KeyError> {
        let Some(data) = self.substrate.read_private(KEY_FILE).await? else {
            return Ok(None);
        };

        let text = String::from_utf8(data).map_err(|e| KeyError::Corrupt(e.to_string()))?;
        let stored: StoredKey =
            toml::from_str(&text).map_err(|e| KeyError::Corrupt(e.to_string()))?;

        if stored.version != StoredKey::VERSION {
            return Err(KeyError::UnsupportedVersion(stored.version));
        }
        if stored.algorithm != ALGORITHM_ED25519 {
            return Err(KeyError::Corrupt(format!(
                "unknown algorithm {:?}",
                stored.algorithm
            )));
        }

        let secret_bytes =
            hex::decode(stored.secret_key.trim()).map_err(|e| KeyError::Corrupt(e.to_string()))?;
        let secret: [u8; PRIVATE_KEY_LENGTH] = secret_bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Corrupt("secret key has the wrong length".into()))?;

        let keypair = KeyPair::from_secret(secret, stored.created_at)?;
        if keypair.verify_key_id() != stored.verify_key.trim() {
            return Err(KeyError::Corrupt(
                "stored verify key does not match the secret key".into(),
            ));
        }

        Ok(Some(keypair))
    }

    /// Persist `keypair`, replacing any existing key.
    pub async fn store(&self, keypair: &KeyPair) -> Result<(), KeyError> {
        let stored = StoredKey {
            version: StoredKey::VERSION,
            algorithm: ALGORITHM_ED25519.to_string(),
            secret_key: hex::encode(keypair.secret),
            verify_key: keypair.verify_key_id(),
            created_at: keypair.created_at,
        };
        let text = toml::to_string(&stored)?;
        self.substrate
            .write_private(KEY_FILE, text.as_bytes())
            .await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), KeyError> {
        self.substrate.remove_private(KEY_FILE).await?;
        Ok(())
    }
}
