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

//! Crate-level error and the failure taxonomy operators see.
//!
//! Each component keeps its own error enum. [`AssureError`] wraps all of
//! them and [`AssureError::kind`] classifies a failure into an
//! [`ErrorKind`], which is what callers branch on (exit codes, retries).

use crate::config::ConfigError;
use crate::keys::KeyError;
use crate::proxy::{FailureReason, HelperError, Rejection, SyncError};
use crate::setup::{ArtifactError, SetupError};
use crate::signature::CodecError;
use crate::signer::SignerError;
use crate::substrate::SubstrateError;
use crate::trust::TrustError;
use std::fmt;
use thiserror::Error;

/// Classification of every failure the tool reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyGenerationFailure,
    HookInstallFailure,
    SignatureEncodingFailure,
    MissingSignature,
    InvalidSignature,
    UnknownTrustBinding,
    TransportFailure,
    ConcurrentSetupConflict,
    /// Lock wait or synchronization deadline exceeded.
    Timeout,
    /// Bad configuration, names or keys supplied by the operator.
    Configuration,
    /// Local history diverged from the verified remote history.
    Diverged,
    /// Reading or writing the local checkout failed.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::KeyGenerationFailure => "key generation failure",
            ErrorKind::HookInstallFailure => "hook install failure",
            ErrorKind::SignatureEncodingFailure => "signature encoding failure",
            ErrorKind::MissingSignature => "missing signature",
            ErrorKind::InvalidSignature => "invalid signature",
            ErrorKind::UnknownTrustBinding => "unknown trust binding",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::ConcurrentSetupConflict => "concurrent setup conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Diverged => "diverged history",
            ErrorKind::Storage => "storage error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AssureError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Helper(#[from] HelperError),

    #[error("{0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

impl From<Rejection> for AssureError {
    fn from(rejection: Rejection) -> Self {
        AssureError::Rejected(rejection)
    }
}

impl AssureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssureError::Config(_) => ErrorKind::Configuration,
            AssureError::Key(e) => key_kind(e),
            AssureError::Codec(_) => ErrorKind::SignatureEncodingFailure,
            AssureError::Signer(e) => signer_kind(e),
            AssureError::Trust(e) => trust_kind(e),
            AssureError::Setup(e) => setup_kind(e),
            AssureError::Sync(e) => sync_kind(e),
            AssureError::Helper(e) => helper_kind(e),
            AssureError::Rejected(rejection) => rejection_kind(rejection),
            AssureError::Substrate(e) => substrate_kind(e),
        }
    }
}

/// `InvalidSignature` if any commit carried a bad signature, otherwise
/// `MissingSignature`.
pub fn rejection_kind(rejection: &Rejection) -> ErrorKind {
    let any_invalid = rejection
        .failures
        .iter()
        .any(|failure| matches!(failure.reason, FailureReason::Invalid(_)));
    if any_invalid {
        ErrorKind::InvalidSignature
    } else {
        ErrorKind::MissingSignature
    }
}

fn substrate_kind(e: &SubstrateError) -> ErrorKind {
    match e {
        SubstrateError::Transport { .. } => ErrorKind::TransportFailure,
        SubstrateError::Locked(_) => ErrorKind::ConcurrentSetupConflict,
        SubstrateError::NonFastForward { .. } => ErrorKind::Diverged,
        SubstrateError::UnknownRevision(_) | SubstrateError::MalformedObjectId(_) => {
            ErrorKind::Configuration
        }
        _ => ErrorKind::Storage,
    }
}

fn key_kind(e: &KeyError) -> ErrorKind {
    match e {
        KeyError::Generation(_) => ErrorKind::KeyGenerationFailure,
        KeyError::InvalidVerifyKey { .. } => ErrorKind::Configuration,
        KeyError::Storage(e) => substrate_kind(e),
        _ => ErrorKind::Storage,
    }
}

fn signer_kind(e: &SignerError) -> ErrorKind {
    match e {
        SignerError::NoKey(_) => ErrorKind::Configuration,
        SignerError::Key(e) => key_kind(e),
        SignerError::Codec(_) => ErrorKind::SignatureEncodingFailure,
        SignerError::Storage(e) => substrate_kind(e),
    }
}

fn trust_kind(e: &TrustError) -> ErrorKind {
    match e {
        TrustError::UnknownBinding { .. } => ErrorKind::UnknownTrustBinding,
        TrustError::InvalidKey { .. } | TrustError::InvalidName { .. } => ErrorKind::Configuration,
        TrustError::Storage(e) => substrate_kind(e),
    }
}

fn setup_kind(e: &SetupError) -> ErrorKind {
    match e {
        SetupError::Locked(_) | SetupError::AlreadyConfigured { .. } => {
            ErrorKind::ConcurrentSetupConflict
        }
        SetupError::KeyGeneration(_) => ErrorKind::KeyGenerationFailure,
        SetupError::HookInstall { .. } => ErrorKind::HookInstallFailure,
        SetupError::NoBranch | SetupError::UnknownRemote(_) => ErrorKind::Configuration,
        SetupError::Key(e) => key_kind(e),
        SetupError::Trust(e) => trust_kind(e),
        SetupError::Artifact(ArtifactError::InvalidKey(_)) => ErrorKind::Configuration,
        SetupError::Artifact(ArtifactError::Io { .. }) => ErrorKind::Storage,
        SetupError::Artifact(_) => ErrorKind::Configuration,
        SetupError::Substrate(e) => substrate_kind(e),
    }
}

fn sync_kind(e: &SyncError) -> ErrorKind {
    match e {
        SyncError::Transport { .. } => ErrorKind::TransportFailure,
        SyncError::UnknownRemote(_) => ErrorKind::Configuration,
        SyncError::Trust(e) => trust_kind(e),
        SyncError::Timeout(_) | SyncError::LockTimeout(_) => ErrorKind::Timeout,
        SyncError::NotFastForward { .. } => ErrorKind::Diverged,
        SyncError::Substrate(e) => substrate_kind(e),
    }
}

fn helper_kind(e: &HelperError) -> ErrorKind {
    match e {
        HelperError::Rejected(rejection) => rejection_kind(rejection),
        HelperError::Stale { .. } => ErrorKind::TransportFailure,
        HelperError::Sync(e) => sync_kind(e),
        HelperError::Substrate(e) => substrate_kind(e),
        HelperError::Io(_) | HelperError::Protocol(_) => ErrorKind::TransportFailure,
    }
}

pub type Result<T, E = AssureError> = std::result::Result<T, E>;
