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

//! Verification proxy: all-or-nothing acceptance of incoming history.
//!
//! A synchronization fetches the remote into a quarantine, enumerates the
//! commits it would introduce on bound branches, verifies each one against
//! the branch's trusted key and only then moves local refs, in one atomic
//! update. A single missing or invalid signature rejects the whole
//! transfer and leaves every local ref as it was.

mod helper;
mod quarantine;
mod verify;

pub use helper::{HelperError, RemoteHelper};

use crate::audit;
use crate::config::AssureConfig;
use crate::keys::VerifyKey;
use crate::signature::{check_note, VerificationResult};
use crate::substrate::{
    remote_tracking_ref, CommitId, ObjectId, RefUpdate, Substrate, SubstrateError,
};
use crate::trust::{TrustError, TrustStore};
use quarantine::{clear_stale, Quarantine};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use verify::{verify_all, NoteSources, VerifyJob};

/// Url prefix that routes a remote through the proxy.
pub const PROXY_URL_PREFIX: &str = "assure::";

/// `url` routed through the proxy (unchanged if it already is).
pub fn proxied_url(url: &str) -> String {
    if url.starts_with(PROXY_URL_PREFIX) {
        url.to_string()
    } else {
        format!("{}{}", PROXY_URL_PREFIX, url)
    }
}

/// The real transport url behind a proxied one.
pub fn upstream_url(url: &str) -> &str {
    url.strip_prefix(PROXY_URL_PREFIX).unwrap_or(url)
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Cannot reach remote '{remote}': {source}")]
    Transport {
        remote: String,
        #[source]
        source: SubstrateError,
    },

    #[error("Remote '{0}' has no url configured")]
    UnknownRemote(String),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error("Synchronization did not finish within {0:?}; nothing was changed")]
    Timeout(Duration),

    #[error("Checkout lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("Local branch '{branch}' has diverged from {remote}/{branch}")]
    NotFastForward { remote: String, branch: String },

    #[error("Synchronization failed: {0}")]
    Substrate(#[from] SubstrateError),
}

/// Why one commit failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Missing,
    Invalid(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Missing => f.write_str("missing signature"),
            FailureReason::Invalid(reason) => write!(f, "invalid signature: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub commit: CommitId,
    pub branch: String,
    pub reason: FailureReason,
}

/// A refused transfer: every commit that failed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub remote: String,
    pub failures: Vec<CommitFailure>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rejected fetch from '{}': {} commit(s) failed verification",
            self.remote,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  {} on branch '{}': {}",
                failure.commit, failure.branch, failure.reason
            )?;
        }
        Ok(())
    }
}

/// One branch accepted by a synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchUpdate {
    pub branch: String,
    pub old: Option<CommitId>,
    pub new: CommitId,
    /// Whether the branch has a trust binding (unbound branches pass through).
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub remote: String,
    pub branches: Vec<BranchUpdate>,
    /// Number of incoming commits whose signatures were checked.
    pub verified_commits: usize,
    /// Remote notes commit, if the remote publishes signatures.
    pub notes: Option<ObjectId>,
}

impl Acceptance {
    pub fn tip(&self, branch: &str) -> Option<&CommitId> {
        self.branches
            .iter()
            .find(|update| update.branch == branch)
            .map(|update| &update.new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Accepted(Acceptance),
    Rejected(Rejection),
}

impl SyncOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncOutcome::Accepted(_))
    }
}

/// Whether an accepted synchronization moves local refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Update remote-tracking refs and the notes ref.
    Apply,
    /// Verify only; the caller moves refs itself (remote-helper mode).
    VerifyOnly,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub notes_ref: String,
    pub verify_workers: usize,
    pub sync_timeout: Duration,
    pub lock_wait: Duration,
}

impl From<&AssureConfig> for ProxyOptions {
    fn from(config: &AssureConfig) -> Self {
        Self {
            notes_ref: config.notes_ref.clone(),
            verify_workers: config.verify_workers,
            sync_timeout: config.sync_timeout(),
            lock_wait: config.lock_wait(),
        }
    }
}

/// Result of [`VerificationProxy::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The local branch now points at `head`.
    Updated { head: CommitId, previous: Option<CommitId> },
    UpToDate { head: CommitId },
    /// The remote does not have the branch.
    NoRemoteBranch,
    Rejected(Rejection),
}

/// Gatekeeper for synchronizations of one checkout.
pub struct VerificationProxy<'a> {
    substrate: &'a dyn Substrate,
    options: ProxyOptions,
}

impl<'a> VerificationProxy<'a> {
    pub fn new(substrate: &'a dyn Substrate, options: ProxyOptions) -> Self {
        Self { substrate, options }
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Url configured for `remote`, without the proxy prefix.
    pub async fn remote_url(&self, remote: &str) -> Result<String, SyncError> {
        let url = self
            .substrate
            .config_get(&format!("remote.{}.url", remote))
            .await?
            .ok_or_else(|| SyncError::UnknownRemote(remote.to_string()))?;
        Ok(upstream_url(&url).to_string())
    }

    /// Synchronize from `remote`'s configured url and apply on acceptance.
    pub async fn synchronize(&self, remote: &str) -> Result<SyncOutcome, SyncError> {
        let url = self.remote_url(remote).await?;
        self.synchronize_url(remote, &url, SyncMode::Apply).await
    }

    /// Synchronize from `url` on behalf of `remote`.
    ///
    /// Waits up to `lock_wait` for the checkout lock and gives up after
    /// `sync_timeout`. Whatever happens, the quarantine is cleared and no
    /// local ref outside it has moved unless the outcome is `Accepted` in
    /// `SyncMode::Apply`.
    pub async fn synchronize_url(
        &self,
        remote: &str,
        url: &str,
        mode: SyncMode,
    ) -> Result<SyncOutcome, SyncError> {
        let _lock = tokio::time::timeout(self.options.lock_wait, self.substrate.lock())
            .await
            .map_err(|_| SyncError::LockTimeout(self.options.lock_wait))??;

        clear_stale(self.substrate).await?;

        let quarantine = Quarantine::new();
        let result = tokio::time::timeout(
            self.options.sync_timeout,
            self.attempt(&quarantine, remote, url, mode),
        )
        .await
        .unwrap_or(Err(SyncError::Timeout(self.options.sync_timeout)));

        if let Err(e) = quarantine.clear(self.substrate).await {
            tracing::warn!(error = %e, "Failed to clear quarantine; it is removed on the next attempt");
        }

        match &result {
            Ok(SyncOutcome::Accepted(acceptance)) => audit::log_sync_accepted(
                remote,
                acceptance.verified_commits,
                acceptance.branches.len(),
            ),
            Ok(SyncOutcome::Rejected(rejection)) => {
                audit::log_sync_rejected(remote, rejection.failures.len())
            }
            Err(e @ SyncError::Transport { .. }) => {
                audit::log_sync_transport_failure(remote, &e.to_string())
            }
            Err(_) => {}
        }
        result
    }

    async fn attempt(
        &self,
        quarantine: &Quarantine,
        remote: &str,
        url: &str,
        mode: SyncMode,
    ) -> Result<SyncOutcome, SyncError> {
        let substrate = self.substrate;
        let notes_ref = self.options.notes_ref.as_str();
        let transport = |source: SubstrateError| {
            if source.is_transport() {
                SyncError::Transport {
                    remote: remote.to_string(),
                    source,
                }
            } else {
                SyncError::Substrate(source)
            }
        };

        // Land everything the remote advertises in the quarantine.
        let advertised = substrate.list_remote_refs(url).await.map_err(transport)?;
        let has_heads = advertised.iter().any(|(name, _)| name.starts_with("refs/heads/"));
        let remote_notes = advertised
            .iter()
            .find(|(name, _)| name == notes_ref)
            .map(|(_, id)| id.clone());
        if has_heads || remote_notes.is_some() {
            let mut refspecs = quarantine.fetch_refspecs(remote_notes.as_ref().map(|_| notes_ref));
            if !has_heads {
                refspecs.remove(0);
            }
            substrate.fetch(url, &refspecs).await.map_err(transport)?;
        }
        let incoming = quarantine.incoming_heads(substrate).await?;
        let fetched_notes = substrate.resolve_ref(&quarantine.notes_ref()).await?;

        // Commits each bound branch would introduce.
        let bindings: BTreeMap<String, VerifyKey> = TrustStore::new(substrate)
            .for_remote(remote)
            .await?
            .into_iter()
            .map(|binding| (binding.branch, binding.verify_key))
            .collect();
        // Only history already accepted under the same key is skipped: the
        // current tracking tips of branches bound to that key. Other local
        // refs (unbound tracking refs, local branches) prove nothing.
        let mut trusted: BTreeMap<String, Vec<CommitId>> = BTreeMap::new();
        for (branch, key) in &bindings {
            if let Some(tip) = substrate.resolve_ref(&remote_tracking_ref(remote, branch)).await? {
                trusted.entry(key.to_string()).or_default().push(tip);
            }
        }

        // A commit reached from several branches bound to the same key is
        // checked once; the branches are kept for reporting.
        let mut jobs: BTreeMap<(CommitId, String), (VerifyKey, Vec<String>)> = BTreeMap::new();
        for (branch, tip) in &incoming {
            let Some(key) = bindings.get(branch) else {
                tracing::debug!(branch = %branch, "Branch has no trust binding; passing through");
                continue;
            };
            let exclude = trusted.get(&key.to_string()).map(Vec::as_slice).unwrap_or(&[]);
            let commits = substrate.commits_between(tip, exclude).await?;
            tracing::debug!(branch = %branch, commits = commits.len(), "Enumerated incoming commits");
            for commit in commits {
                jobs.entry((commit, key.to_string()))
                    .or_insert_with(|| (key.clone(), Vec::new()))
                    .1
                    .push(branch.clone());
            }
        }
        for branch in bindings.keys().filter(|b| !incoming.contains_key(*b)) {
            tracing::debug!(branch = %branch, "Bound branch not present on remote");
        }

        // Check signatures.
        let job_list: Vec<VerifyJob> = jobs
            .iter()
            .map(|((commit, _), (verify_key, _))| VerifyJob {
                commit: commit.clone(),
                verify_key: verify_key.clone(),
            })
            .collect();
        let verified_commits = job_list.len();
        let incoming_notes = quarantine.notes_ref();
        let sources = NoteSources {
            incoming: fetched_notes.as_ref().map(|_| incoming_notes.as_str()),
            local: notes_ref,
        };
        let results = verify_all(substrate, &sources, job_list, self.options.verify_workers).await?;

        // Any failure rejects the whole transfer.
        let mut failures = Vec::new();
        for (job, result) in results {
            let reason = match result {
                VerificationResult::Valid => continue,
                VerificationResult::Missing => FailureReason::Missing,
                VerificationResult::Invalid(reason) => FailureReason::Invalid(reason),
            };
            let branches = jobs
                .get(&(job.commit.clone(), job.verify_key.to_string()))
                .map(|(_, branches)| branches.clone())
                .unwrap_or_default();
            for branch in branches {
                audit::log_verification_failure(
                    remote,
                    &branch,
                    job.commit.as_str(),
                    &reason.to_string(),
                    &job.verify_key.fingerprint(),
                );
                failures.push(CommitFailure {
                    commit: job.commit.clone(),
                    branch,
                    reason: reason.clone(),
                });
            }
        }
        if !failures.is_empty() {
            return Ok(SyncOutcome::Rejected(Rejection {
                remote: remote.to_string(),
                failures,
            }));
        }

        // Move tracking refs and notes in one transaction.
        let mut branches = Vec::new();
        let mut updates = Vec::new();
        for (branch, tip) in &incoming {
            let name = remote_tracking_ref(remote, branch);
            let old = substrate.resolve_ref(&name).await?;
            if old.as_ref() != Some(tip) {
                updates.push(RefUpdate::set(name, old.clone(), tip.clone()));
            }
            branches.push(BranchUpdate {
                branch: branch.clone(),
                old,
                new: tip.clone(),
                verified: bindings.contains_key(branch),
            });
        }
        if let Some(fetched) = &fetched_notes {
            if let Some(update) = self.notes_update(fetched).await? {
                updates.push(update);
            }
        }

        if mode == SyncMode::Apply {
            substrate.update_refs(&updates).await?;
        }

        Ok(SyncOutcome::Accepted(Acceptance {
            remote: remote.to_string(),
            branches,
            verified_commits,
            notes: fetched_notes,
        }))
    }

    /// How the local notes ref should move to include `fetched`.
    ///
    /// Fast-forwards when possible, keeps local notes that are already
    /// ahead, and otherwise follows the remote (as the forced fetch refspec
    /// would).
    async fn notes_update(&self, fetched: &ObjectId) -> Result<Option<RefUpdate>, SyncError> {
        let notes_ref = &self.options.notes_ref;
        let local = self.substrate.resolve_ref(notes_ref).await?;
        let Some(local) = local else {
            return Ok(Some(RefUpdate::set(notes_ref, None, fetched.clone())));
        };
        if &local == fetched || self.substrate.is_ancestor(fetched, &local).await? {
            return Ok(None);
        }
        if !self.substrate.is_ancestor(&local, fetched).await? {
            tracing::warn!(notes_ref = %notes_ref, "Local notes diverged from remote; following remote");
        }
        Ok(Some(RefUpdate::set(notes_ref, Some(local), fetched.clone())))
    }

    /// Synchronize, then fast-forward the local `branch` to the accepted
    /// remote tip.
    pub async fn pull(&self, remote: &str, branch: &str) -> Result<PullOutcome, SyncError> {
        let acceptance = match self.synchronize(remote).await? {
            SyncOutcome::Accepted(acceptance) => acceptance,
            SyncOutcome::Rejected(rejection) => return Ok(PullOutcome::Rejected(rejection)),
        };
        let Some(tip) = acceptance.tip(branch).cloned() else {
            return Ok(PullOutcome::NoRemoteBranch);
        };

        let previous = self
            .substrate
            .resolve_ref(&crate::substrate::branch_ref(branch))
            .await?;
        if previous.as_ref() == Some(&tip) {
            return Ok(PullOutcome::UpToDate { head: tip });
        }
        match self.substrate.fast_forward(branch, &tip).await {
            Ok(()) => Ok(PullOutcome::Updated {
                head: tip,
                previous,
            }),
            Err(SubstrateError::NonFastForward { .. }) => Err(SyncError::NotFastForward {
                remote: remote.to_string(),
                branch: branch.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Check one local commit against the binding for `remote`/`branch`.
    pub async fn verify_commit(
        &self,
        remote: &str,
        branch: &str,
        revision: &str,
    ) -> Result<(CommitId, VerificationResult), SyncError> {
        let binding = TrustStore::new(self.substrate).require(remote, branch).await?;
        let commit = self.substrate.resolve_revision(revision).await?;
        let note = self
            .substrate
            .read_note(&self.options.notes_ref, &commit)
            .await?;
        let result = check_note(&binding.verify_key, &commit, note.as_deref());
        Ok((commit, result))
    }
}
