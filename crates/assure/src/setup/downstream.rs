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

use super::artifact::{helper_alias, HELPER_ALIAS_KEY};
use super::transaction::SetupTransaction;
use super::{lock_for_setup, DownstreamArtifact, SetupError};
use crate::audit;
use crate::keys::VerifyKey;
use crate::proxy::{proxied_url, PROXY_URL_PREFIX};
use crate::refspec::configure_fetch;
use crate::substrate::Substrate;
use crate::trust::{TrustBinding, TrustStore};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DownstreamOptions {
    pub remote: String,
    pub branch: String,
    pub verify_key: VerifyKey,
    pub notes_ref: String,
    /// Executable registered as the remote helper, for checkouts where git
    /// cannot find `git-remote-assure` on `PATH`.
    pub helper: Option<PathBuf>,
}

impl DownstreamOptions {
    pub fn from_artifact(artifact: DownstreamArtifact, notes_ref: impl Into<String>) -> Self {
        Self {
            remote: artifact.remote,
            branch: artifact.branch,
            verify_key: artifact.verify_key,
            notes_ref: notes_ref.into(),
            helper: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownstreamReport {
    pub remote: String,
    pub branch: String,
    pub verify_key: VerifyKey,
    /// Key the binding held before, when setup replaced or re-recorded it.
    pub previous_key: Option<VerifyKey>,
    /// Remote url after routing through the proxy.
    pub url: String,
}

/// Configure a consuming checkout to verify `options.branch` of
/// `options.remote` against `options.verify_key`.
///
/// Routes the remote through the verification proxy, registers the helper
/// when one is given, records the trust binding and adds the signature
/// notes to the remote's fetch refspecs.
/// Safe to re-run; a different key replaces the old binding.
pub async fn setup_downstream(
    substrate: &dyn Substrate,
    options: &DownstreamOptions,
) -> Result<DownstreamReport, SetupError> {
    let _lock = lock_for_setup(substrate).await?;

    let binding = TrustBinding::new(&options.remote, &options.branch, options.verify_key.clone())?;
    let url_key = format!("remote.{}.url", options.remote);
    let url = substrate
        .config_get(&url_key)
        .await?
        .ok_or_else(|| SetupError::UnknownRemote(options.remote.clone()))?;

    let mut tx = SetupTransaction::new(substrate);
    let result = async {
        tx.step("route remote");
        let routed = proxied_url(&url);
        if routed != url {
            tx.snapshot_config(&url_key).await?;
            substrate.config_set(&url_key, &routed).await?;
        }

        if let Some(tool) = &options.helper {
            tx.step("register helper");
            tx.snapshot_config(HELPER_ALIAS_KEY).await?;
            substrate.config_set(HELPER_ALIAS_KEY, &helper_alias(tool)).await?;
        }

        tx.step("record binding");
        tx.snapshot_config(&binding.config_key()).await?;
        let previous = TrustStore::new(substrate).record(&binding).await?;

        tx.step("configure fetch");
        let added = configure_fetch(substrate, &options.remote, &options.notes_ref).await?;
        tx.added_refspecs(&format!("remote.{}.fetch", options.remote), added);

        Ok::<_, SetupError>((routed, previous))
    }
    .await;

    match result {
        Ok((url, previous_key)) => {
            tx.commit();
            let fingerprint = options.verify_key.fingerprint();
            match &previous_key {
                Some(old) if old != &options.verify_key => audit::log_binding_replaced(
                    &options.remote,
                    &options.branch,
                    &old.fingerprint(),
                    &fingerprint,
                ),
                _ => audit::log_binding_recorded(&options.remote, &options.branch, &fingerprint),
            }
            tracing::debug!(
                remote = %options.remote,
                url = %url,
                proxied = url.starts_with(PROXY_URL_PREFIX),
                "Downstream setup complete"
            );
            Ok(DownstreamReport {
                remote: options.remote.clone(),
                branch: options.branch.clone(),
                verify_key: options.verify_key.clone(),
                previous_key,
                url,
            })
        }
        Err(e) => {
            tx.rollback(&e.to_string()).await;
            Err(e)
        }
    }
}
