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

//! Implementation of the `setup-publish` command.

use super::{current_tool, shell_quote, Checkout};
use anyhow::{Context, Result};
use assure::{setup_publisher, PublisherOptions};
use tracing::info;

pub struct SetupPublishArgs {
    pub remote: String,
    pub branch: Option<String>,
    pub rotate: bool,
    pub artifact: Option<String>,
    pub bundle_tool: bool,
}

/// Run publisher setup and print what the operator has to do next.
pub async fn run(checkout: &Checkout, args: SetupPublishArgs) -> Result<()> {
    let tool = current_tool()?;
    let mut options = PublisherOptions::new(&checkout.config);
    options.remote = args.remote;
    options.branch = args.branch;
    options.rotate = args.rotate;
    options.tool_command = shell_quote(&tool.to_string_lossy());
    if let Some(artifact) = args.artifact {
        options.artifact_name = artifact;
    }
    if args.bundle_tool {
        options.bundle_tool = Some(tool.clone());
    }

    let report = setup_publisher(&checkout.substrate, &options)
        .await
        .context("Publisher setup failed")?;

    info!(remote = %report.remote, branch = %report.branch, "Publisher configured");
    if let Some(previous) = &report.previous_key {
        println!("replaced previous verifykey: {}", previous);
    }
    println!(
        "the post-commit hook will now sign changes on branch '{}'",
        report.branch
    );
    println!("verifykey: {}", report.verify_key);
    match &report.bundled_tool {
        Some(bundled) => println!(
            "you should now commit the generated '{}' and '{}'",
            report.artifact, bundled
        ),
        None => println!("you should now commit the generated '{}'", report.artifact),
    }
    Ok(())
}
