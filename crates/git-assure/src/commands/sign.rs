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

//! Implementation of the `sign` command.

use super::Checkout;
use anyhow::{Context, Result};
use assure::{CommitSigner, SignOutcome};

/// Sign an existing commit, e.g. one made before setup or while the hook
/// was not installed.
pub async fn run(checkout: &Checkout, revision: &str) -> Result<()> {
    let signer = CommitSigner::load(&checkout.substrate, &checkout.config.notes_ref).await?;
    let (commit, outcome) = signer
        .sign_revision(&checkout.substrate, revision)
        .await
        .with_context(|| format!("Failed to sign '{}'", revision))?;
    match outcome {
        SignOutcome::Signed => println!("signed {}", commit),
        SignOutcome::AlreadySigned => println!("{} is already signed", commit),
    }
    Ok(())
}
