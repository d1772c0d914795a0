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

//! Implementation of the `extract-tool` command.

use super::current_tool;
use anyhow::{Context, Result};
use std::path::Path;

/// Copy the running executable to `WHERE/assure-tool`, with a
/// `git-remote-assure` entry point beside it.
pub async fn run(destination: &Path) -> Result<()> {
    let tool = current_tool()?;
    let target = assure::setup::extract_tool(&tool, destination)
        .await
        .with_context(|| format!("Failed to extract tool into {}", destination.display()))?;
    println!("wrote '{}'", target.display());
    println!(
        "add '{}' to PATH so git can run '{}'",
        destination.display(),
        assure::HELPER_NAME
    );
    Ok(())
}
