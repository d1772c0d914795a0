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

//! Security audit events.
//!
//! Every security-relevant decision (key issuance, signing, trust changes,
//! accepted and rejected synchronizations) is logged through `tracing` with
//! an `event_type` field so it can be filtered out of ordinary logs. Keys are
//! identified by fingerprint; secret material is never a field.

/// Event type names.
pub mod events {
    pub const KEY_GENERATED: &str = "key.generated";
    pub const KEY_ROTATED: &str = "key.rotated";

    pub const HOOK_INSTALLED: &str = "hook.installed";

    pub const COMMIT_SIGNED: &str = "commit.signed";
    pub const COMMIT_SIGN_FAILED: &str = "commit.sign_failed";

    pub const BINDING_RECORDED: &str = "binding.recorded";
    pub const BINDING_REPLACED: &str = "binding.replaced";

    pub const SETUP_ROLLED_BACK: &str = "setup.rolled_back";

    pub const SYNC_ACCEPTED: &str = "sync.accepted";
    pub const SYNC_REJECTED: &str = "sync.rejected";
    pub const SYNC_TRANSPORT_FAILURE: &str = "sync.transport_failure";

    pub const VERIFICATION_FAILURE: &str = "verification.failure";
}

/// Log a new publisher key.
pub fn log_key_generated(checkout: &str, key_fingerprint: &str) {
    tracing::info!(
        event_type = events::KEY_GENERATED,
        checkout = %checkout,
        key_fingerprint = %key_fingerprint,
        "Signing key generated"
    );
}

/// Log a key rotation.
pub fn log_key_rotated(checkout: &str, old_fingerprint: &str, new_fingerprint: &str) {
    tracing::warn!(
        event_type = events::KEY_ROTATED,
        checkout = %checkout,
        old_fingerprint = %old_fingerprint,
        new_fingerprint = %new_fingerprint,
        "Signing key rotated"
    );
}

pub fn log_hook_installed(checkout: &str, hook: &str, branch: &str) {
    tracing::info!(
        event_type = events::HOOK_INSTALLED,
        checkout = %checkout,
        hook = %hook,
        branch = %branch,
        "Commit signing hook installed"
    );
}

pub fn log_commit_signed(commit: &str, key_fingerprint: &str) {
    tracing::info!(
        event_type = events::COMMIT_SIGNED,
        commit = %commit,
        key_fingerprint = %key_fingerprint,
        "Commit signed"
    );
}

pub fn log_commit_sign_failed(commit: &str, error: &str) {
    tracing::error!(
        event_type = events::COMMIT_SIGN_FAILED,
        commit = %commit,
        error = %error,
        "Commit signing failed"
    );
}

/// Log a trust binding written for a branch that had none.
pub fn log_binding_recorded(remote: &str, branch: &str, key_fingerprint: &str) {
    tracing::info!(
        event_type = events::BINDING_RECORDED,
        remote = %remote,
        branch = %branch,
        key_fingerprint = %key_fingerprint,
        "Trust binding recorded"
    );
}

/// Log a trust binding that replaced a different key.
pub fn log_binding_replaced(
    remote: &str,
    branch: &str,
    old_fingerprint: &str,
    new_fingerprint: &str,
) {
    tracing::warn!(
        event_type = events::BINDING_REPLACED,
        remote = %remote,
        branch = %branch,
        old_fingerprint = %old_fingerprint,
        new_fingerprint = %new_fingerprint,
        "Trust binding replaced with a different key"
    );
}

pub fn log_setup_rolled_back(checkout: &str, step: &str, error: &str) {
    tracing::warn!(
        event_type = events::SETUP_ROLLED_BACK,
        checkout = %checkout,
        failed_step = %step,
        error = %error,
        "Setup failed and was rolled back"
    );
}

pub fn log_sync_accepted(remote: &str, verified_commits: usize, updated_refs: usize) {
    tracing::info!(
        event_type = events::SYNC_ACCEPTED,
        remote = %remote,
        verified_commits = verified_commits,
        updated_refs = updated_refs,
        "Synchronization accepted"
    );
}

pub fn log_sync_rejected(remote: &str, failed_commits: usize) {
    tracing::warn!(
        event_type = events::SYNC_REJECTED,
        remote = %remote,
        failed_commits = failed_commits,
        "Synchronization rejected"
    );
}

pub fn log_sync_transport_failure(remote: &str, error: &str) {
    tracing::error!(
        event_type = events::SYNC_TRANSPORT_FAILURE,
        remote = %remote,
        error = %error,
        "Synchronization transport failure"
    );
}

/// Log one commit that failed verification.
pub fn log_verification_failure(
    remote: &str,
    branch: &str,
    commit: &str,
    failure_reason: &str,
    key_fingerprint: &str,
) {
    tracing::warn!(
        event_type = events::VERIFICATION_FAILURE,
        remote = %remote,
        branch = %branch,
        commit = %commit,
        failure_reason = %failure_reason,
        key_fingerprint = %key_fingerprint,
        "Commit signature verification failed"
    );
}
