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

//! Implementation of the `verify` command.

use super::Checkout;
use anyhow::{anyhow, Context, Result};
use assure::{Substrate, VerificationProxy, VerificationResult};

pub async fn run(
    checkout: &Checkout,
    revision: &str,
    remote: &str,
    branch: Option<String>,
) -> Result<()> {
    let branch = match branch {
        Some(branch) => branch,
        None => checkout
            .substrate
            .current_branch()
            .await?
            .context("HEAD is not on a branch; pass --branch")?,
    };

    let proxy = VerificationProxy::new(&checkout.substrate, checkout.proxy_options());
    let (commit, result) = proxy.verify_commit(remote, &branch, revision).await?;
    match result {
        VerificationResult::Valid => {
            println!("{}: valid signature for {}/{}", commit, remote, branch);
            Ok(())
        }
        other => Err(anyhow!("{}: {}", commit, other)),
    }
}
