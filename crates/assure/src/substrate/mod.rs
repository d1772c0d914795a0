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

//! Capability interface over the version-control substrate.
//!
//! The signing and verification engine never talks to git directly. Every
//! operation it needs (refs, notes, config, hooks, transport, commit
//! enumeration, checkout locking) goes through the [`Substrate`] trait, so
//! the engine can be driven by the git CLI ([`GitSubstrate`]) or by an
//! in-memory repository in tests.

mod git;

pub use git::{GitOptions, GitSubstrate};

use crate::refspec::Refspec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Boxed error returned by commit hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by substrate operations.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Transport to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Reference {name} changed concurrently")]
    RefConflict { name: String },

    #[error("Non-fast-forward update of {name} rejected")]
    NonFastForward { name: String },

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Malformed object id: {0:?}")]
    MalformedObjectId(String),

    #[error("Checkout is locked: {0}")]
    Locked(String),

    #[error("Commit hook failed for {commit}: {source}")]
    HookFailed {
        commit: String,
        #[source]
        source: HookError,
    },

    #[error("Substrate I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubstrateError {
    /// Whether this error means the remote could not be reached or read.
    pub fn is_transport(&self) -> bool {
        matches!(self, SubstrateError::Transport { .. })
    }
}

/// A content-addressed object name (commit, notes commit).
///
/// Accepts SHA-1 (40) and SHA-256 (64) hex names; stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

/// Commits are identified by their object name.
pub type CommitId = ObjectId;

impl ObjectId {
    pub fn parse(value: &str) -> Result<Self, SubstrateError> {
        let value = value.trim();
        let valid_length = value.len() == 40 || value.len() == 64;
        if !valid_length || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SubstrateError::MalformedObjectId(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for human-facing output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectId {
    type Err = SubstrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = SubstrateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// One reference change inside an atomic transaction.
///
/// `old` is the value the ref must currently have (`None` = must not exist);
/// `new` is the value to set (`None` = delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

impl RefUpdate {
    pub fn set(name: impl Into<String>, old: Option<ObjectId>, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            old,
            new: Some(new),
        }
    }

    pub fn delete(name: impl Into<String>, old: ObjectId) -> Self {
        Self {
            name: name.into(),
            old: Some(old),
            new: None,
        }
    }
}

/// Held while a synchronization or setup mutates the checkout.
///
/// Released on drop.
pub struct CheckoutLock {
    _guard: Box<dyn Send + Sync>,
}

impl CheckoutLock {
    pub fn new<G: Send + Sync + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for CheckoutLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CheckoutLock")
    }
}

/// Callback run synchronously after a commit object and branch update have
/// been written, before the commit operation returns.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn on_commit(&self, substrate: &dyn Substrate, commit: &CommitId)
        -> Result<(), HookError>;
}

/// Hook that does nothing; commits created with it are unsigned.
pub struct NoHook;

#[async_trait]
impl CommitHook for NoHook {
    async fn on_commit(&self, _: &dyn Substrate, _: &CommitId) -> Result<(), HookError> {
        Ok(())
    }
}

/// Runs `hook` for a freshly written commit and undoes the branch update if
/// it fails, so a failed hook never leaves the new commit on the branch.
pub async fn finish_commit(
    substrate: &dyn Substrate,
    branch_ref: &str,
    parent: Option<CommitId>,
    commit: CommitId,
    hook: &dyn CommitHook,
) -> Result<CommitId, SubstrateError> {
    match hook.on_commit(substrate, &commit).await {
        Ok(()) => Ok(commit),
        Err(source) => {
            let rollback = match parent {
                Some(parent) => RefUpdate::set(branch_ref, Some(commit.clone()), parent),
                None => RefUpdate::delete(branch_ref, commit.clone()),
            };
            if let Err(e) = substrate.update_refs(&[rollback]).await {
                tracing::error!(
                    branch = %branch_ref,
                    commit = %commit,
                    error = %e,
                    "Failed to roll back branch after commit hook failure"
                );
            }
            Err(SubstrateError::HookFailed {
                commit: commit.to_string(),
                source,
            })
        }
    }
}

/// Full ref name of a local branch.
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Full ref name of a remote-tracking branch.
pub fn remote_tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

/// Everything the protocol engine needs from a version-control checkout.
///
/// Implementations must be thread-safe. Methods taking a `url` talk to the
/// raw transport; they never consult remote helpers.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Human-readable location of the checkout, for logs.
    fn describe(&self) -> String;

    /// Directory files such as the downstream artifact are written to.
    fn work_tree(&self) -> Option<PathBuf>;

    /// Branch `HEAD` points at, if any.
    async fn current_branch(&self) -> Result<Option<String>, SubstrateError>;

    async fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, SubstrateError>;

    /// Resolve a revision expression (`HEAD`, a branch, an object name).
    async fn resolve_revision(&self, revision: &str) -> Result<CommitId, SubstrateError>;

    /// All refs whose full name starts with `prefix`, sorted by name.
    async fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>, SubstrateError>;

    /// Apply every update or none of them.
    async fn update_refs(&self, updates: &[RefUpdate]) -> Result<(), SubstrateError>;

    /// Create a commit on `branch` and run `hook` before returning.
    ///
    /// If the hook fails the branch is restored and `HookFailed` returned.
    async fn create_commit(
        &self,
        branch: &str,
        message: &str,
        hook: &dyn CommitHook,
    ) -> Result<CommitId, SubstrateError>;

    /// Move local `branch` forward to `target`, updating the work tree when
    /// the branch is checked out. Fails with `NonFastForward` otherwise.
    async fn fast_forward(&self, branch: &str, target: &CommitId) -> Result<(), SubstrateError>;

    /// Commits reachable from `tip` but from none of `exclude`, newest first.
    async fn commits_between(
        &self,
        tip: &CommitId,
        exclude: &[ObjectId],
    ) -> Result<Vec<CommitId>, SubstrateError>;

    async fn is_ancestor(
        &self,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool, SubstrateError>;

    async fn read_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
    ) -> Result<Option<Vec<u8>>, SubstrateError>;

    /// Attach (or replace) the note for `commit` under `notes_ref`.
    async fn write_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
        body: &[u8],
    ) -> Result<(), SubstrateError>;

    /// Commits that carry a note under `notes_ref`.
    async fn list_notes(&self, notes_ref: &str) -> Result<Vec<CommitId>, SubstrateError>;

    async fn config_get(&self, key: &str) -> Result<Option<String>, SubstrateError>;

    async fn config_get_all(&self, key: &str) -> Result<Vec<String>, SubstrateError>;

    async fn config_set(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    /// Append a value to a multi-valued key.
    async fn config_add(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    /// Remove every value of `key`; absent keys are not an error.
    async fn config_unset(&self, key: &str) -> Result<(), SubstrateError>;

    /// Remove only the values of `key` equal to `value`.
    async fn config_unset_value(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    async fn config_list(&self, prefix: &str) -> Result<Vec<(String, String)>, SubstrateError>;

    async fn read_hook(&self, name: &str) -> Result<Option<String>, SubstrateError>;

    async fn install_hook(&self, name: &str, body: &str) -> Result<(), SubstrateError>;

    async fn remove_hook(&self, name: &str) -> Result<(), SubstrateError>;

    /// Read a file private to this checkout (never transferred).
    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SubstrateError>;

    async fn write_private(&self, name: &str, data: &[u8]) -> Result<(), SubstrateError>;

    async fn remove_private(&self, name: &str) -> Result<(), SubstrateError>;

    /// Write a file into the work tree.
    async fn write_file(
        &self,
        path: &str,
        contents: &[u8],
        executable: bool,
    ) -> Result<(), SubstrateError>;

    async fn remove_file(&self, path: &str) -> Result<(), SubstrateError>;

    async fn fetch(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError>;

    async fn push(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError>;

    /// Refs advertised by the repository at `url`.
    async fn list_remote_refs(&self, url: &str)
        -> Result<Vec<(String, ObjectId)>, SubstrateError>;

    /// Acquire the checkout lock, waiting while another holder has it.
    ///
    /// Callers bound the wait by dropping the future.
    async fn lock(&self) -> Result<CheckoutLock, SubstrateError>;

    /// Acquire the checkout lock only if nobody holds it.
    async fn try_lock(&self) -> Result<Option<CheckoutLock>, SubstrateError>;
}
