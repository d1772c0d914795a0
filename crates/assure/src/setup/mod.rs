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

//! Setup orchestrator: bootstraps publishing and downstream checkouts.
//!
//! Both setups are transactional. Every step that changes the checkout is
//! recorded first, and a failure anywhere rolls all recorded steps back, so
//! a failed setup leaves no key, hook, refspec or binding behind. Setup
//! never waits for the checkout lock: if a synchronization or another setup
//! holds it, setup fails at once.

mod artifact;
mod downstream;
mod publisher;
mod transaction;

pub use artifact::{
    extract_tool, helper_alias, ArtifactError, DownstreamArtifact, HELPER_ALIAS_KEY, HELPER_NAME,
    TOOL_NAME,
};
pub use downstream::{setup_downstream, DownstreamOptions, DownstreamReport};
pub use publisher::{
    hook_script, is_assure_hook, setup_publisher, PublisherOptions, PublisherReport,
    HOOK_MARKER, POST_COMMIT_HOOK, PUBLISH_BRANCH_KEY, PUBLISH_REMOTE_KEY,
};

use crate::keys::KeyError;
use crate::substrate::{CheckoutLock, Substrate, SubstrateError};
use crate::trust::TrustError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Another setup or synchronization is running in {0}")]
    Locked(String),

    #[error(
        "Checkout already publishes branch '{branch}' with key {verify_key}; \
         pass --rotate to replace the key"
    )]
    AlreadyConfigured { branch: String, verify_key: String },

    #[error("HEAD is not on a branch; pass --branch")]
    NoBranch,

    #[error("Remote '{0}' has no url configured")]
    UnknownRemote(String),

    #[error("Failed to generate signing key: {0}")]
    KeyGeneration(#[source] KeyError),

    #[error("Failed to install {hook} hook: {reason}")]
    HookInstall { hook: String, reason: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Setup failed: {0}")]
    Substrate(#[from] SubstrateError),
}

/// Take the checkout lock without waiting.
async fn lock_for_setup(substrate: &dyn Substrate) -> Result<CheckoutLock, SetupError> {
    substrate
        .try_lock()
        .await?
        .ok_or_else(|| SetupError::Locked(substrate.describe()))
}

/// `branch`, or the branch `HEAD` is on.
async fn resolve_branch(
    substrate: &dyn Substrate,
    branch: Option<&str>,
) -> Result<String, SetupError> {
    match branch {
        Some(branch) => Ok(branch.to_string()),
        None => substrate
            .current_branch()
            .await?
            .ok_or(SetupError::NoBranch),
    }
}
