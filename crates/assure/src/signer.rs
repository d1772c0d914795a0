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

//! Commit signer: the hook that signs every commit in a publishing checkout.

use crate::audit;
use crate::keys::{KeyError, KeyPair, KeyStore};
use crate::signature::{self, CodecError, CommitSignature, VerificationResult};
use crate::substrate::{CommitHook, CommitId, HookError, Substrate, SubstrateError};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("No signing key in {0}; run setup-publish first")]
    NoKey(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Failed to encode signature: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to attach signature: {0}")]
    Storage(#[from] SubstrateError),
}

/// What signing a commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    Signed,
    /// An equivalent valid signature was already attached; nothing written.
    AlreadySigned,
}

/// Signs commits with the publisher key and attaches the signature note.
#[derive(Debug)]
pub struct CommitSigner {
    keypair: KeyPair,
    notes_ref: String,
}

impl CommitSigner {
    pub fn new(keypair: KeyPair, notes_ref: impl Into<String>) -> Self {
        Self {
            keypair,
            notes_ref: notes_ref.into(),
        }
    }

    /// Signer for the checkout's stored key.
    pub async fn load(substrate: &dyn Substrate, notes_ref: &str) -> Result<Self, SignerError> {
        let keypair = KeyStore::new(substrate)
            .load()
            .await?
            .ok_or_else(|| SignerError::NoKey(substrate.describe()))?;
        Ok(Self::new(keypair, notes_ref))
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn notes_ref(&self) -> &str {
        &self.notes_ref
    }

    /// Sign `commit` unless it already carries our valid signature.
    pub async fn sign(
        &self,
        substrate: &dyn Substrate,
        commit: &CommitId,
    ) -> Result<SignOutcome, SignerError> {
        if let Some(existing) = substrate.read_note(&self.notes_ref, commit).await? {
            if signature::check_note(self.keypair.verify_key(), commit, Some(&existing))
                == VerificationResult::Valid
            {
                tracing::debug!(commit = %commit, "Commit already signed");
                return Ok(SignOutcome::AlreadySigned);
            }
            tracing::warn!(commit = %commit, "Replacing unusable signature note");
        }

        let record: CommitSignature = signature::sign(&self.keypair, commit)?;
        substrate
            .write_note(&self.notes_ref, commit, record.to_note()?.as_bytes())
            .await?;
        audit::log_commit_signed(commit.as_str(), &self.keypair.verify_key().fingerprint());
        Ok(SignOutcome::Signed)
    }

    /// Resolve `revision` and sign it.
    pub async fn sign_revision(
        &self,
        substrate: &dyn Substrate,
        revision: &str,
    ) -> Result<(CommitId, SignOutcome), SignerError> {
        let commit = substrate.resolve_revision(revision).await?;
        let outcome = self.sign(substrate, &commit).await?;
        Ok((commit, outcome))
    }
}

#[async_trait]
impl CommitHook for CommitSigner {
    async fn on_commit(&self, substrate: &dyn Substrate, commit: &CommitId) -> Result<(), HookError> {
        match self.sign(substrate, commit).await {
            Ok(_) => Ok(()),
            Err(e) => {
                audit::log_commit_sign_failed(commit.as_str(), &e.to_string());
                Err(Box::new(e))
            }
        }
    }
}
