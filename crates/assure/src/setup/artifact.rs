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

//! The downstream setup artifact.
//!
//! Publisher setup writes a small POSIX shell script into the work tree.
//! Committed alongside the code, it lets anyone with a clone configure
//! verification with one command. The script embeds the remote, the branch
//! and the verify key, and can be parsed back by `setup-downstream --from`.
//!
//! Clones without git-assure installed use the `assure-tool` bundled next
//! to the script (see `setup-publish --bundle-tool`). Downstream setup then
//! registers that executable as the remote helper through a git alias, so
//! no `git-remote-assure` has to be on `PATH`.

use crate::keys::{KeyError, VerifyKey};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the extracted tool that the artifact falls back to.
pub const TOOL_NAME: &str = "assure-tool";

/// Executable name git runs for `assure::` remotes.
pub const HELPER_NAME: &str = "git-remote-assure";

/// Alias git falls back to when no [`HELPER_NAME`] is on `PATH`.
pub const HELPER_ALIAS_KEY: &str = "alias.remote-assure";

const REMOTE_VAR: &str = "ASSURE_REMOTE";
const BRANCH_VAR: &str = "ASSURE_BRANCH";
const KEY_VAR: &str = "ASSURE_VERIFYKEY";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact does not define {0}")]
    MissingField(&'static str),

    #[error("Artifact value for {field} is not a quoted string")]
    BadQuoting { field: &'static str },

    #[error("Artifact verify key is invalid: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What a downstream checkout needs to trust a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamArtifact {
    pub remote: String,
    pub branch: String,
    pub verify_key: VerifyKey,
}

impl DownstreamArtifact {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>, verify_key: VerifyKey) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
            verify_key,
        }
    }

    /// Render the artifact script.
    pub fn render(&self, artifact_name: &str) -> String {
        format!(
            r#"#!/bin/sh
# {name}: configure this checkout to verify signed commits.
# Generated by `git-assure setup-publish`; commit it with your code.
# Run it once in a fresh clone: ./{name}
{remote_var}={remote}
{branch_var}={branch}
{key_var}={key}

here=$(cd "$(dirname "$0")" && pwd)
if command -v git-assure >/dev/null 2>&1; then
    tool=git-assure
elif [ -x "$here/{tool}" ]; then
    tool="$here/{tool}"
else
    echo "{name}: git-assure is not installed and no '{tool}' was found next to this script" >&2
    exit 1
fi

exec "$tool" setup-downstream --remote "${remote_var}" --branch "${branch_var}" --verify-key "${key_var}"
"#,
            name = artifact_name,
            tool = TOOL_NAME,
            remote_var = REMOTE_VAR,
            branch_var = BRANCH_VAR,
            key_var = KEY_VAR,
            remote = shell_quote(&self.remote),
            branch = shell_quote(&self.branch),
            key = shell_quote(&self.verify_key.to_string()),
        )
    }

    /// Read the embedded settings back out of a rendered artifact.
    pub fn parse(script: &str) -> Result<Self, ArtifactError> {
        let remote = assignment(script, REMOTE_VAR)?;
        let branch = assignment(script, BRANCH_VAR)?;
        let key = assignment(script, KEY_VAR)?;
        Ok(Self {
            remote,
            branch,
            verify_key: VerifyKey::parse(&key)?,
        })
    }
}

/// Value of [`HELPER_ALIAS_KEY`] that runs `tool` as the remote helper.
pub fn helper_alias(tool: &Path) -> String {
    format!("!{} remote-helper", shell_quote(&tool.to_string_lossy()))
}

/// Copy the tool executable at `source` into `dir` as [`TOOL_NAME`], with a
/// [`HELPER_NAME`] entry point beside it.
///
/// The tool acts as the remote helper when started under that name, so
/// adding `dir` to `PATH` is enough for git to find both.
pub async fn extract_tool(source: &Path, dir: &Path) -> Result<PathBuf, ArtifactError> {
    let target = dir.join(TOOL_NAME);
    tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
    tokio::fs::copy(source, &target).await.map_err(io_error(&target))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(io_error(&target))?;
    }

    let helper = dir.join(HELPER_NAME);
    match tokio::fs::remove_file(&helper).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(&helper)(e)),
    }
    #[cfg(unix)]
    tokio::fs::symlink(TOOL_NAME, &helper).await.map_err(io_error(&helper))?;
    #[cfg(not(unix))]
    tokio::fs::copy(&target, &helper).await.map_err(io_error(&helper))?;

    Ok(target)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError {
    let path = path.to_path_buf();
    move |source| ArtifactError::Io { path, source }
}

pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.replace(r"'\''", "").contains('\'') {
        return None;
    }
    Some(inner.replace(r"'\''", "'"))
}

fn assignment(script: &str, field: &'static str) -> Result<String, ArtifactError> {
    let prefix = format!("{}=", field);
    let line = script
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(&prefix))
        .ok_or(ArtifactError::MissingField(field))?;
    shell_unquote(&line[prefix.len()..]).ok_or(ArtifactError::BadQuoting { field })
}
