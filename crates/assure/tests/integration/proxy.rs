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

//! Verification proxy integration tests.

use crate::fixtures::{
    configured_publisher, downstream, proxy_options, push, signed_commit, visible_refs, UPSTREAM,
};
use assure::refspec::fetch_refspecs_for;
use assure::signature::sign;
use assure::{
    FailureReason, KeyPair, PullOutcome, Refspec, RefUpdate, Substrate, SyncError,
    SyncOutcome, TrustError, VerificationProxy, VerificationResult, DEFAULT_NOTES_REF,
};
use assure_testing::MemoryNetwork;

#[tokio::test]
async fn test_signed_history_is_accepted_with_signatures() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    let commit = signed_commit(&publisher, "signed change").await;
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let outcome = proxy.synchronize("origin").await.unwrap();
    let acceptance = match outcome {
        SyncOutcome::Accepted(acceptance) => acceptance,
        SyncOutcome::Rejected(rejection) => panic!("unexpected rejection: {}", rejection),
    };

    assert_eq!(acceptance.verified_commits, 1);
    assert_eq!(acceptance.tip("master"), Some(&commit));
    assert_eq!(
        consumer.resolve_ref("refs/remotes/origin/master").await.unwrap(),
        Some(commit.clone())
    );
    assert!(consumer
        .read_note(DEFAULT_NOTES_REF, &commit)
        .await
        .unwrap()
        .is_some());
    // Local branch only moves on pull.
    assert_ne!(consumer.head(), Some(commit));
}

#[tokio::test]
async fn test_unconfigured_clone_receives_no_signatures() {
    let network = MemoryNetwork::new();
    let (publisher, _) = configured_publisher(&network).await;
    signed_commit(&publisher, "signed change").await;
    push(&publisher, "master").await;

    let plain = network.clone_repo(UPSTREAM, "mem://plain").unwrap();
    let refspecs = fetch_refspecs_for(&plain, "origin").await.unwrap();
    plain.fetch(UPSTREAM, &refspecs).await.unwrap();

    assert!(plain.list_notes(DEFAULT_NOTES_REF).await.unwrap().is_empty());
    assert!(network
        .clone_repo(UPSTREAM, "mem://plain2")
        .unwrap()
        .list_notes(DEFAULT_NOTES_REF)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_one_unsigned_commit_rejects_the_whole_transfer() {
    for bad in 0..4 {
        let network = MemoryNetwork::new();
        let (publisher, report) = configured_publisher(&network).await;
        let consumer = downstream(&network, "mem://consumer", &report).await;
        let before = visible_refs(&consumer).await;

        let mut unsigned = None;
        for i in 0..4 {
            if i == bad {
                unsigned = Some(publisher.commit(&format!("unsigned {}", i)).await.unwrap());
            } else {
                signed_commit(&publisher, &format!("signed {}", i)).await;
            }
        }
        push(&publisher, "master").await;

        let proxy = VerificationProxy::new(&consumer, proxy_options());
        let rejection = match proxy.synchronize("origin").await.unwrap() {
            SyncOutcome::Rejected(rejection) => rejection,
            SyncOutcome::Accepted(_) => panic!("commit {} was unsigned but accepted", bad),
        };

        assert_eq!(rejection.failures.len(), 1, "position {}", bad);
        assert_eq!(Some(&rejection.failures[0].commit), unsigned.as_ref());
        assert_eq!(rejection.failures[0].reason, FailureReason::Missing);
        assert_eq!(rejection.failures[0].branch, "master");
        assert_eq!(visible_refs(&consumer).await, before, "position {}", bad);
    }
}

#[tokio::test]
async fn test_signature_from_untrusted_key_is_invalid() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    // Someone else's key, attached the same way.
    let intruder = KeyPair::generate().unwrap();
    let commit = publisher.commit("forged").await.unwrap();
    let forged = sign(&intruder, &commit).unwrap();
    publisher
        .write_note(DEFAULT_NOTES_REF, &commit, forged.to_note().unwrap().as_bytes())
        .await
        .unwrap();
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    match proxy.synchronize("origin").await.unwrap() {
        SyncOutcome::Rejected(rejection) => {
            assert_eq!(rejection.failures.len(), 1);
            assert!(matches!(rejection.failures[0].reason, FailureReason::Invalid(_)));
        }
        SyncOutcome::Accepted(_) => panic!("forged signature accepted"),
    }
    assert!(consumer
        .read_note(DEFAULT_NOTES_REF, &commit)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_garbage_note_is_invalid() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    let commit = publisher.commit("noted").await.unwrap();
    publisher
        .write_note(DEFAULT_NOTES_REF, &commit, b"not a signature\n")
        .await
        .unwrap();
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let outcome = proxy.synchronize("origin").await.unwrap();
    assert!(!outcome.is_accepted());
}

#[tokio::test]
async fn test_unbound_branches_pass_through() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    let feature = publisher
        .create_commit("feature", "unsigned work", &assure::NoHook)
        .await
        .unwrap();
    publisher
        .push(
            UPSTREAM,
            &[Refspec::new("refs/heads/feature", "refs/heads/feature", false)],
        )
        .await
        .unwrap();

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let acceptance = match proxy.synchronize("origin").await.unwrap() {
        SyncOutcome::Accepted(acceptance) => acceptance,
        SyncOutcome::Rejected(rejection) => panic!("unexpected rejection: {}", rejection),
    };
    let update = acceptance
        .branches
        .iter()
        .find(|u| u.branch == "feature")
        .unwrap();
    assert!(!update.verified);
    assert_eq!(acceptance.verified_commits, 0);
    assert_eq!(
        consumer.resolve_ref("refs/remotes/origin/feature").await.unwrap(),
        Some(feature)
    );
}

#[tokio::test]
async fn test_transport_failure_is_not_a_rejection() {
    let network = MemoryNetwork::new();
    let (_, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let before = visible_refs(&consumer).await;

    network.set_offline(UPSTREAM, true);
    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let err = proxy.synchronize("origin").await.unwrap_err();

    assert!(matches!(err, SyncError::Transport { ref remote, .. } if remote == "origin"));
    assert_eq!(visible_refs(&consumer).await, before);
}

#[tokio::test]
async fn test_pull_fast_forwards_and_rejects() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let proxy = VerificationProxy::new(&consumer, proxy_options());

    assert!(matches!(
        proxy.pull("origin", "master").await.unwrap(),
        PullOutcome::UpToDate { .. }
    ));

    let signed = signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;
    match proxy.pull("origin", "master").await.unwrap() {
        PullOutcome::Updated { head, .. } => assert_eq!(head, signed),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(consumer.head(), Some(signed.clone()));

    publisher.commit("unsigned").await.unwrap();
    push(&publisher, "master").await;
    assert!(matches!(
        proxy.pull("origin", "master").await.unwrap(),
        PullOutcome::Rejected(_)
    ));
    assert_eq!(consumer.head(), Some(signed));
}

#[tokio::test]
async fn test_pull_refuses_diverged_branch() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    consumer.commit("local work").await.unwrap();
    signed_commit(&publisher, "upstream work").await;
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let err = proxy.pull("origin", "master").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFastForward { .. }));
}

#[tokio::test]
async fn test_quarantine_is_always_cleared() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    // Leftovers from an attempt that never finished.
    let head = consumer.head().unwrap();
    consumer
        .update_refs(&[
            RefUpdate::set("refs/assure/incoming/stale/heads/master", None, head.clone()),
            RefUpdate::set("refs/notes/assure-incoming/stale", None, head),
        ])
        .await
        .unwrap();

    publisher.commit("unsigned").await.unwrap();
    push(&publisher, "master").await;
    let proxy = VerificationProxy::new(&consumer, proxy_options());
    assert!(!proxy.synchronize("origin").await.unwrap().is_accepted());

    assert!(consumer.list_refs("refs/assure/").await.unwrap().is_empty());
    assert!(consumer
        .list_refs("refs/notes/assure-incoming/")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_local_notes_ahead_are_kept() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    signed_commit(&publisher, "first").await;
    push(&publisher, "master").await;
    let proxy = VerificationProxy::new(&consumer, proxy_options());
    assert!(proxy.synchronize("origin").await.unwrap().is_accepted());

    // A local note on top of the fetched ones.
    let head = consumer.head().unwrap();
    consumer
        .write_note(DEFAULT_NOTES_REF, &head, b"local annotation")
        .await
        .unwrap();
    let local_notes = consumer.resolve_ref(DEFAULT_NOTES_REF).await.unwrap();

    assert!(proxy.synchronize("origin").await.unwrap().is_accepted());
    assert_eq!(consumer.resolve_ref(DEFAULT_NOTES_REF).await.unwrap(), local_notes);
}

#[tokio::test]
async fn test_verify_commit() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let pre_setup = consumer.head().unwrap();
    signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    proxy.pull("origin", "master").await.unwrap();

    let (_, result) = proxy.verify_commit("origin", "master", "HEAD").await.unwrap();
    assert_eq!(result, VerificationResult::Valid);

    let (commit, result) = proxy
        .verify_commit("origin", "master", pre_setup.as_str())
        .await
        .unwrap();
    assert_eq!(commit, pre_setup);
    assert_eq!(result, VerificationResult::Missing);

    let err = proxy
        .verify_commit("origin", "release", "HEAD")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Trust(TrustError::UnknownBinding { .. })
    ));
}

#[tokio::test]
async fn test_unsigned_commit_from_unbound_branch_is_checked_when_bound_branch_reaches_it() {
    let network = MemoryNetwork::new();
    let (_, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    // An unsigned commit arrives first on an unbound branch and passes through.
    let attacker = network.clone_repo(UPSTREAM, "mem://attacker").unwrap();
    let bad = attacker.commit("unsigned").await.unwrap();
    attacker
        .push(
            UPSTREAM,
            &[Refspec::new("refs/heads/master", "refs/heads/feature", false)],
        )
        .await
        .unwrap();
    let proxy = VerificationProxy::new(&consumer, proxy_options());
    assert!(proxy.synchronize("origin").await.unwrap().is_accepted());
    assert_eq!(
        consumer.resolve_ref("refs/remotes/origin/feature").await.unwrap(),
        Some(bad.clone())
    );

    // The bound branch then fast-forwards to it.
    push(&attacker, "master").await;
    let before = consumer.head();
    match proxy.pull("origin", "master").await.unwrap() {
        PullOutcome::Rejected(rejection) => {
            assert_eq!(rejection.failures.len(), 1);
            assert_eq!(rejection.failures[0].commit, bad);
            assert_eq!(rejection.failures[0].reason, FailureReason::Missing);
        }
        other => panic!("unsigned commit accepted on bound branch: {:?}", other),
    }
    assert_eq!(consumer.head(), before);
    assert_ne!(
        consumer.resolve_ref("refs/remotes/origin/master").await.unwrap(),
        Some(bad)
    );
}

#[tokio::test]
async fn test_unreadable_binding_fails_closed() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    consumer
        .config_set("assure.origin/master.verifykey", "vk0-garbled")
        .await
        .unwrap();
    let before = visible_refs(&consumer).await;

    publisher.commit("unsigned").await.unwrap();
    push(&publisher, "master").await;

    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let err = proxy.synchronize("origin").await.unwrap_err();
    assert!(matches!(err, SyncError::Trust(TrustError::InvalidKey { .. })), "{:?}", err);
    assert_eq!(visible_refs(&consumer).await, before);

    // Listing still shows the readable bindings and skips the broken one.
    assert!(assure::TrustStore::new(&consumer).list().await.unwrap().is_empty());
}
