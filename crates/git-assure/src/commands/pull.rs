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

//! Implementation of the `pull` command.
//!
//! Synchronizes through the verification proxy directly instead of going
//! through git's remote helper, then fast-forwards the local branch.

use super::Checkout;
use anyhow::{Context, Result};
use assure::{AssureError, PullOutcome, Substrate, VerificationProxy};
use tracing::info;

pub async fn run(checkout: &Checkout, remote: &str, branch: Option<String>) -> Result<()> {
    let branch = match branch {
        Some(branch) => branch,
        None => checkout
            .substrate
            .current_branch()
            .await?
            .context("HEAD is not on a branch; pass --branch")?,
    };

    let proxy = VerificationProxy::new(&checkout.substrate, checkout.proxy_options());
    let outcome = proxy
        .pull(remote, &branch)
        .await
        .with_context(|| format!("Failed to pull {} from '{}'", branch, remote))?;

    match outcome {
        PullOutcome::Updated { head, previous } => {
            info!(branch = %branch, head = %head, "Branch updated");
            match previous {
                Some(previous) => println!("Updating {}..{}", previous.short(), head.short()),
                None => println!("Created branch '{}' at {}", branch, head.short()),
            }
        }
        PullOutcome::UpToDate { .. } => println!("Already up to date."),
        PullOutcome::NoRemoteBranch => {
            println!("Remote '{}' has no branch '{}'", remote, branch)
        }
        PullOutcome::Rejected(rejection) => return Err(AssureError::from(rejection).into()),
    }
    Ok(())
}
