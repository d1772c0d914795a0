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

//! Implementation of the `setup-downstream` command.
//!
//! Invoked by hand with `--verify-key`, or by the generated artifact, which
//! passes everything it embeds.

use super::{current_tool, Checkout};
use anyhow::{anyhow, Context, Result};
use assure::{setup_downstream, DownstreamArtifact, DownstreamOptions, VerifyKey};
use std::path::PathBuf;
use tracing::warn;

pub struct SetupDownstreamArgs {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub verify_key: Option<String>,
    pub from: Option<PathBuf>,
}

/// Merge explicit arguments over the values embedded in an artifact.
async fn resolve(args: SetupDownstreamArgs, notes_ref: &str) -> Result<DownstreamOptions> {
    let embedded = match &args.from {
        Some(path) => {
            let script = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read artifact {}", path.display()))?;
            Some(
                DownstreamArtifact::parse(&script)
                    .with_context(|| format!("Malformed artifact {}", path.display()))?,
            )
        }
        None => None,
    };

    let verify_key = match (args.verify_key, &embedded) {
        (Some(value), _) => value
            .parse::<VerifyKey>()
            .with_context(|| format!("Invalid verify key '{}'", value))?,
        (None, Some(artifact)) => artifact.verify_key.clone(),
        (None, None) => return Err(anyhow!("Pass --verify-key or --from ARTIFACT")),
    };
    let remote = args
        .remote
        .or_else(|| embedded.as_ref().map(|a| a.remote.clone()))
        .unwrap_or_else(|| "origin".to_string());
    let branch = args
        .branch
        .or_else(|| embedded.as_ref().map(|a| a.branch.clone()))
        .ok_or_else(|| anyhow!("Pass --branch or --from ARTIFACT"))?;

    Ok(DownstreamOptions {
        remote,
        branch,
        verify_key,
        notes_ref: notes_ref.to_string(),
        helper: None,
    })
}

pub async fn run(checkout: &Checkout, args: SetupDownstreamArgs) -> Result<()> {
    let mut options = resolve(args, &checkout.config.notes_ref).await?;
    // git prefers a git-remote-assure on PATH; the alias covers clones
    // that only have the bundled tool.
    options.helper = Some(current_tool()?);
    let report = setup_downstream(&checkout.substrate, &options)
        .await
        .context("Downstream setup failed")?;

    if let Some(previous) = report.previous_key.as_ref().filter(|k| **k != report.verify_key) {
        warn!(
            remote = %report.remote,
            branch = %report.branch,
            previous = %previous,
            "Replaced existing trust binding"
        );
    }
    println!(
        "remote '{}' configured to use verification proxy",
        report.remote
    );
    println!(
        "branch '{}' configured to verify with key {}",
        report.branch, report.verify_key
    );
    Ok(())
}
