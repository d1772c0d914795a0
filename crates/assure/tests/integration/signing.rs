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

//! Commit signer integration tests.

use crate::fixtures::{configured_publisher, signed_commit};
use assure::signature::check_note;
use assure::{
    CommitSigner, SignOutcome, Substrate, SubstrateError, VerificationResult, DEFAULT_NOTES_REF,
};
use assure_testing::{MemoryNetwork, Operation};

#[tokio::test]
async fn test_every_hooked_commit_carries_one_valid_signature() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;

    let mut commits = Vec::new();
    for i in 0..5 {
        commits.push(signed_commit(&publisher, &format!("change {}", i)).await);
    }

    let notes = publisher.list_notes(DEFAULT_NOTES_REF).await.unwrap();
    assert_eq!(notes.len(), commits.len());
    for commit in &commits {
        let note = publisher.read_note(DEFAULT_NOTES_REF, commit).await.unwrap();
        assert_eq!(
            check_note(&report.verify_key, commit, note.as_deref()),
            VerificationResult::Valid
        );
    }
}

#[tokio::test]
async fn test_resigning_writes_nothing_new() {
    let network = MemoryNetwork::new();
    let (publisher, _) = configured_publisher(&network).await;
    let commit = signed_commit(&publisher, "signed once").await;
    let notes_before = publisher.resolve_ref(DEFAULT_NOTES_REF).await.unwrap();
    let note_before = publisher.read_note(DEFAULT_NOTES_REF, &commit).await.unwrap();

    let signer = CommitSigner::load(&publisher, DEFAULT_NOTES_REF).await.unwrap();
    let outcome = signer.sign(&publisher, &commit).await.unwrap();

    assert_eq!(outcome, SignOutcome::AlreadySigned);
    assert_eq!(publisher.resolve_ref(DEFAULT_NOTES_REF).await.unwrap(), notes_before);
    assert_eq!(
        publisher.read_note(DEFAULT_NOTES_REF, &commit).await.unwrap(),
        note_before
    );
}

#[tokio::test]
async fn test_backfill_signs_pre_setup_commit() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let unsigned = publisher.head().unwrap();
    assert!(publisher
        .read_note(DEFAULT_NOTES_REF, &unsigned)
        .await
        .unwrap()
        .is_none());

    let signer = CommitSigner::load(&publisher, DEFAULT_NOTES_REF).await.unwrap();
    let (commit, outcome) = signer.sign_revision(&publisher, "HEAD").await.unwrap();

    assert_eq!(commit, unsigned);
    assert_eq!(outcome, SignOutcome::Signed);
    let note = publisher.read_note(DEFAULT_NOTES_REF, &commit).await.unwrap();
    assert!(check_note(&report.verify_key, &commit, note.as_deref()).is_valid());
}

#[tokio::test]
async fn test_failed_signing_fails_the_commit() {
    let network = MemoryNetwork::new();
    let (publisher, _) = configured_publisher(&network).await;
    let before = publisher.head();

    publisher.fail_next(Operation::WriteNote);
    let signer = CommitSigner::load(&publisher, DEFAULT_NOTES_REF).await.unwrap();
    let err = publisher
        .create_commit("master", "will not stick", &signer)
        .await
        .unwrap_err();

    assert!(matches!(err, SubstrateError::HookFailed { .. }));
    assert_eq!(publisher.head(), before);
    assert!(publisher
        .list_notes(DEFAULT_NOTES_REF)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_signer_requires_a_key() {
    let network = MemoryNetwork::new();
    let repo = network.init("mem://keyless");
    let err = CommitSigner::load(&repo, DEFAULT_NOTES_REF).await.unwrap_err();
    assert!(matches!(err, assure::SignerError::NoKey(_)));
}

#[tokio::test]
async fn test_amended_commit_needs_its_own_signature() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let signed = signed_commit(&publisher, "original").await;

    // A commit with a new id is not covered by the old signature.
    let other = publisher.commit("amended").await.unwrap();
    let stolen = publisher.read_note(DEFAULT_NOTES_REF, &signed).await.unwrap();
    assert!(matches!(
        check_note(&report.verify_key, &other, stolen.as_deref()),
        VerificationResult::Invalid(_)
    ));
}
