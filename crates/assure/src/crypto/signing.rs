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

//! Ed25519 signing utilities for commit signatures.
//!
//! Provides functions for:
//! - Generating Ed25519 signing keypairs from the OS random source
//! - Computing SHA256 key fingerprints (safe to log)
//! - Signing and verifying arbitrary messages

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an Ed25519 private key seed.
pub const PRIVATE_KEY_LENGTH: usize = 32;
/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;
/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// Errors that can occur during signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Secure random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    #[error("Invalid private key: expected 32 bytes, got {0}")]
    InvalidPrivateKeyLength(usize),

    #[error("Invalid public key: expected 32 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("Invalid signature: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("Failed to create verifying key: {0}")]
    KeyCreationFailed(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// A generated Ed25519 keypair.
pub struct GeneratedKeypair {
    /// The 32-byte private key seed
    pub private_key: [u8; PRIVATE_KEY_LENGTH],
    /// The 32-byte public key
    pub public_key: [u8; PUBLIC_KEY_LENGTH],
}

/// Generates a new Ed25519 signing keypair.
///
/// The seed is drawn from the operating system's CSPRNG. If the random
/// source cannot be read, no key is produced.
pub fn generate_signing_keypair() -> Result<GeneratedKeypair, SigningError> {
    let mut seed = [0u8; PRIVATE_KEY_LENGTH];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| SigningError::RandomSourceUnavailable(e.to_string()))?;

    let signing_key = SigningKey::from_bytes(&seed);
    let public_key = signing_key.verifying_key().to_bytes();

    Ok(GeneratedKeypair {
        private_key: seed,
        public_key,
    })
}

/// Derives the public key for a private key seed.
pub fn public_key_for(private_key: &[u8]) -> Result<[u8; PUBLIC_KEY_LENGTH], SigningError> {
    let key_bytes: [u8; PRIVATE_KEY_LENGTH] = private_key
        .try_into()
        .map_err(|_| SigningError::InvalidPrivateKeyLength(private_key.len()))?;

    Ok(SigningKey::from_bytes(&key_bytes).verifying_key().to_bytes())
}

/// Checks that the bytes form a usable Ed25519 public key.
pub fn validate_public_key(public_key: &[u8]) -> Result<(), SigningError> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKeyLength(public_key.len()))?;

    VerifyingKey::from_bytes(&key_bytes)
        .map(|_| ())
        .map_err(|e| SigningError::KeyCreationFailed(e.to_string()))
}

/// Computes the SHA256 hex fingerprint of a public key.
///
/// Fingerprints are what audit events carry; they identify a key without
/// reproducing it.
pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Signs a message using an Ed25519 private key seed.
///
/// Ed25519 signatures are deterministic: the same key and message always
/// produce the same 64 bytes.
pub fn sign_message(message: &[u8], private_key: &[u8]) -> Result<Vec<u8>, SigningError> {
    let key_bytes: [u8; PRIVATE_KEY_LENGTH] = private_key
        .try_into()
        .map_err(|_| SigningError::InvalidPrivateKeyLength(private_key.len()))?;

    let signing_key = SigningKey::from_bytes(&key_bytes);
    Ok(signing_key.sign(message).to_bytes().to_vec())
}

/// Verifies a message signature using an Ed25519 public key.
///
/// # Errors
///
/// Returns `SigningError` if any input is malformed or verification fails.
pub fn verify_signature(
    message: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> Result<(), SigningError> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKeyLength(public_key.len()))?;

    let sig_bytes: [u8; SIGNATURE_LENGTH] = signature
        .try_into()
        .map_err(|_| SigningError::InvalidSignatureLength(signature.len()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SigningError::KeyCreationFailed(e.to_string()))?;

    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| SigningError::VerificationFailed)
}
