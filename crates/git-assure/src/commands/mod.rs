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

//! Command implementations.

pub mod bindings;
pub mod extract_tool;
pub mod post_commit;
pub mod pull;
pub mod setup_downstream;
pub mod setup_publish;
pub mod sign;
pub mod verify;

use anyhow::{Context, Result};
use assure::{AssureConfig, ConfigLoader, GitOptions, GitSubstrate, ProxyOptions};
use std::path::{Path, PathBuf};

/// An opened checkout together with its resolved configuration.
pub struct Checkout {
    pub substrate: GitSubstrate,
    pub config: AssureConfig,
}

impl Checkout {
    /// Open the checkout at `repo` (or the one git's environment points at)
    /// and load configuration, preferring `config_file` when given.
    pub async fn open(repo: Option<&Path>, config_file: Option<&Path>) -> Result<Self> {
        let options = match repo {
            Some(dir) => GitOptions::in_dir(dir),
            None => GitOptions::from_env(),
        };
        let substrate = GitSubstrate::open(options.clone())
            .await
            .context("Not inside a git checkout")?;

        let config = ConfigLoader::new(Some(substrate.git_dir()))
            .load_config(config_file)
            .context("Failed to load configuration")?;

        // Reopen with the configured git when it is not the default one.
        let substrate = if config.git_binary != Path::new("git") {
            GitSubstrate::open(options.with_binary(config.git_binary.clone()))
                .await
                .with_context(|| format!("Failed to run {}", config.git_binary.display()))?
        } else {
            substrate
        };

        tracing::debug!(git_dir = %substrate.git_dir().display(), "Opened checkout");
        Ok(Self { substrate, config })
    }

    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions::from(&self.config)
    }
}

/// Path of the running executable, used when installing hooks and
/// extracting the tool.
pub fn current_tool() -> Result<PathBuf> {
    std::env::current_exe().context("Cannot locate the running git-assure executable")
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
