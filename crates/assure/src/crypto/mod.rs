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

//! Cryptographic primitives for commit signing.
//!
//! This module provides:
//! - Ed25519 key generation and signing
//! - Key fingerprint computation

mod signing;

pub use signing::{
    compute_key_fingerprint, generate_signing_keypair, public_key_for, sign_message,
    validate_public_key, verify_signature, GeneratedKeypair, SigningError, PRIVATE_KEY_LENGTH,
    PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
