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

//! Signature codec: commit signatures and their side-channel encoding.
//!
//! A signature is stored as the note for the commit it signs. The note body
//! is one line of base64 wrapping a flat, length-delimited record:
//!
//! ```text
//! u8   format version (1)
//! u16  length | algorithm tag
//! u16  length | verify key id
//! u16  length | signature bytes
//! ```
//!
//! Lengths are big-endian. Because every field is framed, records written by
//! a newer algorithm still decode here; they just never verify.

use crate::crypto::{sign_message, verify_signature, SigningError};
use crate::keys::{KeyPair, VerifyKey};
use crate::substrate::CommitId;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use thiserror::Error;

/// Current record format version.
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Field {field} is {len} bytes, longer than a record allows")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("Record truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("Record has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("Field {field} is not valid UTF-8")]
    NotUtf8 { field: &'static str },

    #[error("Note is not valid base64: {0}")]
    Base64(String),
}

/// Outcome of checking one commit against a trusted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Valid,
    /// A signature is present but does not verify; the reason is diagnostic.
    Invalid(String),
    Missing,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid)
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Valid => f.write_str("valid signature"),
            VerificationResult::Invalid(reason) => write!(f, "invalid signature ({})", reason),
            VerificationResult::Missing => f.write_str("missing signature"),
        }
    }
}

/// A signature over one commit id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSignature {
    pub commit_id: CommitId,
    pub version: u8,
    pub algorithm: String,
    pub verify_key_id: String,
    pub signature: Vec<u8>,
}

/// Bytes that get signed for a commit: its object name.
pub fn signing_payload(commit: &CommitId) -> &[u8] {
    commit.as_str().as_bytes()
}

/// Sign `commit` with the publisher key.
pub fn sign(keypair: &KeyPair, commit: &CommitId) -> Result<CommitSignature, CodecError> {
    let signature = sign_message(signing_payload(commit), keypair.secret())?;
    Ok(CommitSignature {
        commit_id: commit.clone(),
        version: FORMAT_VERSION,
        algorithm: keypair.verify_key().algorithm().to_string(),
        verify_key_id: keypair.verify_key_id(),
        signature,
    })
}

/// Check raw signature bytes over `commit` against a verify key string.
///
/// Pure and fail-closed: malformed keys or signatures return `false`.
pub fn verify(verify_key_id: &str, commit: &CommitId, signature: &[u8]) -> bool {
    let Ok(key) = VerifyKey::parse(verify_key_id) else {
        return false;
    };
    verify_signature(signing_payload(commit), signature, key.public_key()).is_ok()
}

impl CommitSignature {
    /// Whether this record is a valid signature of its commit by `trusted`.
    pub fn verify_with(&self, trusted: &VerifyKey) -> VerificationResult {
        if self.algorithm != trusted.algorithm() {
            return VerificationResult::Invalid(format!(
                "unsupported algorithm {:?}",
                self.algorithm
            ));
        }
        if self.verify_key_id != trusted.to_string() {
            return VerificationResult::Invalid(format!(
                "signed by untrusted key {}",
                self.verify_key_id
            ));
        }
        if verify(&self.verify_key_id, &self.commit_id, &self.signature) {
            VerificationResult::Valid
        } else {
            VerificationResult::Invalid("cryptographic verification failed".into())
        }
    }

    /// Serialize to the framed binary record.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(
            1 + 6 + self.algorithm.len() + self.verify_key_id.len() + self.signature.len(),
        );
        out.push(self.version);
        put_field(&mut out, "algorithm", self.algorithm.as_bytes())?;
        put_field(&mut out, "verify_key_id", self.verify_key_id.as_bytes())?;
        put_field(&mut out, "signature", &self.signature)?;
        Ok(out)
    }

    /// Parse a framed binary record for `commit`.
    pub fn decode(commit: &CommitId, bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader { bytes, pos: 0 };
        let version = reader.u8("version")?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let algorithm = reader.string("algorithm")?;
        let verify_key_id = reader.string("verify_key_id")?;
        let signature = reader.field("signature")?.to_vec();
        let remaining = reader.remaining();
        if remaining != 0 {
            return Err(CodecError::TrailingBytes(remaining));
        }
        Ok(Self {
            commit_id: commit.clone(),
            version,
            algorithm,
            verify_key_id,
            signature,
        })
    }

    /// Note body for the side channel.
    pub fn to_note(&self) -> Result<String, CodecError> {
        Ok(format!("{}\n", BASE64.encode(self.encode()?)))
    }

    /// Parse a note body read from the side channel.
    pub fn from_note(commit: &CommitId, note: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(note).map_err(|_| CodecError::NotUtf8 { field: "note" })?;
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| CodecError::Base64(e.to_string()))?;
        Self::decode(commit, &bytes)
    }
}

/// Check the note attached to `commit` (if any) against `trusted`.
pub fn check_note(trusted: &VerifyKey, commit: &CommitId, note: Option<&[u8]>) -> VerificationResult {
    let Some(note) = note else {
        return VerificationResult::Missing;
    };
    match CommitSignature::from_note(commit, note) {
        Ok(record) => record.verify_with(trusted),
        Err(e) => VerificationResult::Invalid(format!("unreadable record: {}", e)),
    }
}

fn put_field(out: &mut Vec<u8>, field: &'static str, data: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(data.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: data.len(),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::Truncated { field })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    fn field(&mut self, field: &'static str) -> Result<&'a [u8], CodecError> {
        let len = self.take(2, field)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        self.take(len, field)
    }

    fn string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let bytes = self.field(field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::NotUtf8 { field })
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
