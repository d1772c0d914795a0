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

use super::artifact::TOOL_NAME;
use super::transaction::SetupTransaction;
use super::{lock_for_setup, resolve_branch, ArtifactError, DownstreamArtifact, SetupError};
use crate::audit;
use crate::config::AssureConfig;
use crate::keys::{KeyPair, KeyStore, VerifyKey, KEY_FILE};
use crate::refspec::configure_push;
use crate::substrate::Substrate;
use crate::trust::validate_name;
use std::path::PathBuf;

pub const POST_COMMIT_HOOK: &str = "post-commit";

/// Marker line identifying hooks this tool may overwrite.
pub const HOOK_MARKER: &str = "# installed by git-assure";

pub const PUBLISH_BRANCH_KEY: &str = "assure.publish.branch";
pub const PUBLISH_REMOTE_KEY: &str = "assure.publish.remote";

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub remote: String,
    /// Branch to sign; defaults to the current branch.
    pub branch: Option<String>,
    /// Replace an existing key instead of refusing.
    pub rotate: bool,
    pub notes_ref: String,
    pub artifact_name: String,
    /// Command the installed hook runs.
    pub tool_command: String,
    /// Executable copied into the work tree beside the artifact, for clones
    /// that do not have git-assure installed.
    pub bundle_tool: Option<PathBuf>,
}

impl PublisherOptions {
    pub fn new(config: &AssureConfig) -> Self {
        Self {
            remote: "origin".to_string(),
            branch: None,
            rotate: false,
            notes_ref: config.notes_ref.clone(),
            artifact_name: config.artifact_name.clone(),
            tool_command: "git-assure".to_string(),
            bundle_tool: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherReport {
    pub remote: String,
    pub branch: String,
    pub verify_key: VerifyKey,
    /// Key replaced by a rotation.
    pub previous_key: Option<VerifyKey>,
    /// Work-tree path of the generated artifact.
    pub artifact: String,
    /// Work-tree path of the bundled tool, when one was requested.
    pub bundled_tool: Option<String>,
}

/// Post-commit hook body that signs new commits on `branch`.
pub fn hook_script(branch: &str, tool_command: &str) -> String {
    let quoted_branch = format!("'{}'", branch.replace('\'', r"'\''"));
    format!(
        "#!/bin/sh\n\
         {marker}: signs each new commit on {quoted_branch}\n\
         branch=$(git symbolic-ref --quiet --short HEAD) || exit 0\n\
         [ \"$branch\" = {quoted_branch} ] || exit 0\n\
         exec {tool} post-commit\n",
        marker = HOOK_MARKER,
        quoted_branch = quoted_branch,
        tool = tool_command,
    )
}

pub fn is_assure_hook(body: &str) -> bool {
    body.lines().any(|line| line.trim() == HOOK_MARKER || line.starts_with(HOOK_MARKER))
}

/// Set up the checkout to sign every commit on a branch and push the
/// signatures.
///
/// Generates the key, installs the signing hook, configures push refspecs
/// and writes the downstream artifact, plus the tool when it is bundled. A
/// checkout that already has a key is only reconfigured when
/// `options.rotate` is set.
pub async fn setup_publisher(
    substrate: &dyn Substrate,
    options: &PublisherOptions,
) -> Result<PublisherReport, SetupError> {
    let _lock = lock_for_setup(substrate).await?;

    let branch = resolve_branch(substrate, options.branch.as_deref()).await?;
    validate_name("branch", &branch, true)?;
    validate_name("remote", &options.remote, false)?;

    let store = KeyStore::new(substrate);
    let previous = match store.load().await {
        Ok(previous) => previous,
        Err(e) if options.rotate => {
            tracing::warn!(error = %e, "Discarding unreadable signing key");
            None
        }
        Err(e) => return Err(e.into()),
    };
    let published_branch = substrate.config_get(PUBLISH_BRANCH_KEY).await?;

    if !options.rotate && (previous.is_some() || published_branch.is_some()) {
        return Err(SetupError::AlreadyConfigured {
            branch: published_branch.unwrap_or_else(|| branch.clone()),
            verify_key: previous
                .as_ref()
                .map(KeyPair::verify_key_id)
                .unwrap_or_else(|| "<missing>".to_string()),
        });
    }

    // Generated before anything is written so a missing random source
    // leaves nothing to undo.
    let keypair = KeyPair::generate().map_err(SetupError::KeyGeneration)?;

    let mut tx = SetupTransaction::new(substrate);
    match publisher_steps(&mut tx, substrate, options, &branch, &keypair).await {
        Ok((artifact, bundled_tool)) => {
            tx.commit();
            let fingerprint = keypair.verify_key().fingerprint();
            match &previous {
                Some(old) => audit::log_key_rotated(
                    &substrate.describe(),
                    &old.verify_key().fingerprint(),
                    &fingerprint,
                ),
                None => audit::log_key_generated(&substrate.describe(), &fingerprint),
            }
            audit::log_hook_installed(&substrate.describe(), POST_COMMIT_HOOK, &branch);
            Ok(PublisherReport {
                remote: options.remote.clone(),
                branch,
                verify_key: keypair.verify_key().clone(),
                previous_key: previous.map(|old| old.verify_key().clone()),
                artifact,
                bundled_tool,
            })
        }
        Err(e) => {
            tx.rollback(&e.to_string()).await;
            Err(e)
        }
    }
}

async fn publisher_steps(
    tx: &mut SetupTransaction<'_>,
    substrate: &dyn Substrate,
    options: &PublisherOptions,
    branch: &str,
    keypair: &KeyPair,
) -> Result<(String, Option<String>), SetupError> {
    tx.step("store key");
    tx.snapshot_private(KEY_FILE).await?;
    KeyStore::new(substrate).store(keypair).await?;

    tx.step("install hook");
    if let Some(existing) = tx.snapshot_hook(POST_COMMIT_HOOK).await? {
        if !is_assure_hook(&existing) {
            return Err(SetupError::HookInstall {
                hook: POST_COMMIT_HOOK.to_string(),
                reason: "an existing hook was not installed by git-assure".to_string(),
            });
        }
    }
    substrate
        .install_hook(POST_COMMIT_HOOK, &hook_script(branch, &options.tool_command))
        .await
        .map_err(|e| SetupError::HookInstall {
            hook: POST_COMMIT_HOOK.to_string(),
            reason: e.to_string(),
        })?;

    tx.step("record publisher");
    tx.snapshot_config(PUBLISH_BRANCH_KEY).await?;
    substrate.config_set(PUBLISH_BRANCH_KEY, branch).await?;
    tx.snapshot_config(PUBLISH_REMOTE_KEY).await?;
    substrate.config_set(PUBLISH_REMOTE_KEY, &options.remote).await?;

    tx.step("configure push");
    let added = configure_push(substrate, &options.remote, branch, &options.notes_ref).await?;
    tx.added_refspecs(&format!("remote.{}.push", options.remote), added);

    tx.step("write artifact");
    let artifact = DownstreamArtifact::new(&options.remote, branch, keypair.verify_key().clone());
    let script = artifact.render(&options.artifact_name);
    tx.created_file(&options.artifact_name);
    substrate
        .write_file(&options.artifact_name, script.as_bytes(), true)
        .await?;

    let mut bundled = None;
    if let Some(tool) = &options.bundle_tool {
        tx.step("bundle tool");
        let binary = tokio::fs::read(tool).await.map_err(|source| ArtifactError::Io {
            path: tool.clone(),
            source,
        })?;
        tx.created_file(TOOL_NAME);
        substrate.write_file(TOOL_NAME, &binary, true).await?;
        bundled = Some(TOOL_NAME.to_string());
    }

    Ok((options.artifact_name.clone(), bundled))
}
