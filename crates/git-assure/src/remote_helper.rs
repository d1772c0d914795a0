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

//! The remote helper git runs for `assure::<url>` remotes.
//!
//! Reached three ways: the `git-remote-assure` binary, the `git-assure`
//! binary started under that name, and `git-assure remote-helper` (which
//! the `alias.remote-assure` registered by downstream setup runs).

use anyhow::{Context, Result};
use assure::{ConfigLoader, GitOptions, GitSubstrate, ProxyOptions, RemoteHelper, HELPER_NAME};
use clap::Args;
use std::path::Path;
use tokio::io::BufReader;

/// Arguments git passes to a remote helper.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct HelperArgs {
    /// Remote name, or the url itself when git has no remote name
    pub remote: String,

    /// Url of the remote, with or without the assure:: prefix
    pub url: Option<String>,
}

/// Whether the process was started as `git-remote-assure`.
pub fn invoked_as_helper(argv0: &Path) -> bool {
    argv0.file_stem().is_some_and(|stem| stem == HELPER_NAME)
}

/// Serve the helper protocol on stdin/stdout.
pub async fn run(args: HelperArgs) -> Result<()> {
    let verbose = std::env::var_os("GIT_ASSURE_VERBOSE").is_some();
    crate::init_tracing(verbose, "warn");

    let url = args.url.unwrap_or_else(|| args.remote.clone());

    let substrate = GitSubstrate::open(GitOptions::from_env())
        .await
        .context("git-remote-assure must be run by git inside a checkout")?;
    let config = ConfigLoader::new(Some(substrate.git_dir()))
        .load_config(None)
        .context("Failed to load configuration")?;
    let substrate = if config.git_binary.as_os_str() != "git" {
        GitSubstrate::open(GitOptions::from_env().with_binary(config.git_binary.clone())).await?
    } else {
        substrate
    };

    let helper = RemoteHelper::new(&substrate, ProxyOptions::from(&config), &args.remote, &url);
    helper
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .with_context(|| format!("assure: fetch from '{}' refused or failed", args.remote))?;
    Ok(())
}
