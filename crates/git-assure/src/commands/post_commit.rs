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

//! Implementation of the `post-commit` command run by the installed hook.

use super::Checkout;
use anyhow::{Context, Result};
use assure::{audit, CommitSigner, SignOutcome, Substrate};

/// Sign `HEAD`.
///
/// Git has already created the commit when the hook runs, so a failure here
/// cannot undo it; the error tells the operator to sign it explicitly.
pub async fn run(checkout: &Checkout) -> Result<()> {
    let signer = CommitSigner::load(&checkout.substrate, &checkout.config.notes_ref).await?;
    let commit = checkout
        .substrate
        .resolve_revision("HEAD")
        .await
        .context("Cannot resolve the new commit")?;

    match signer.sign(&checkout.substrate, &commit).await {
        Ok(SignOutcome::Signed) => {
            tracing::debug!(commit = %commit, "Signed new commit");
            Ok(())
        }
        Ok(SignOutcome::AlreadySigned) => Ok(()),
        Err(e) => {
            audit::log_commit_sign_failed(commit.as_str(), &e.to_string());
            Err(e).with_context(|| {
                format!(
                    "Commit {} is NOT signed; run 'git-assure sign {}'",
                    commit.short(),
                    commit
                )
            })
        }
    }
}
