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

//! Locking, deadlines and cancellation of synchronizations.

use crate::fixtures::{
    configured_publisher, downstream, proxy_options, push, signed_commit, visible_refs,
};
use assure::{Substrate, SyncError, SyncOutcome, VerificationProxy};
use assure_testing::MemoryNetwork;
use std::time::Duration;

#[tokio::test]
async fn test_sync_waits_for_lock_then_gives_up() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;

    let mut options = proxy_options();
    options.lock_wait = Duration::from_millis(100);
    let held = consumer.lock().await.unwrap();

    let proxy = VerificationProxy::new(&consumer, options);
    let err = proxy.synchronize("origin").await.unwrap_err();
    assert!(matches!(err, SyncError::LockTimeout(_)));

    drop(held);
    assert!(proxy.synchronize("origin").await.unwrap().is_accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_syncs_are_serialized() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let head = signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;
    network.set_latency(Some(Duration::from_millis(20)));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let checkout = consumer.clone();
        tasks.push(tokio::spawn(async move {
            let proxy = VerificationProxy::new(&checkout, proxy_options());
            proxy.synchronize("origin").await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_accepted());
    }

    assert_eq!(
        consumer.resolve_ref("refs/remotes/origin/master").await.unwrap(),
        Some(head)
    );
    assert!(consumer.list_refs("refs/assure/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deadline_leaves_refs_unchanged() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;
    let before = visible_refs(&consumer).await;

    network.set_latency(Some(Duration::from_millis(500)));
    let mut options = proxy_options();
    options.sync_timeout = Duration::from_millis(50);
    let proxy = VerificationProxy::new(&consumer, options);

    let err = proxy.synchronize("origin").await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout(_)));
    assert_eq!(visible_refs(&consumer).await, before);
    assert!(consumer.try_lock().await.unwrap().is_some());
}

#[tokio::test]
async fn test_dropped_sync_releases_lock_and_changes_nothing() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;
    let before = visible_refs(&consumer).await;

    network.set_latency(Some(Duration::from_millis(500)));
    let proxy = VerificationProxy::new(&consumer, proxy_options());
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), proxy.synchronize("origin")).await;
    assert!(abandoned.is_err());

    assert_eq!(visible_refs(&consumer).await, before);
    assert!(consumer.try_lock().await.unwrap().is_some());

    // The next attempt clears whatever the abandoned one left and succeeds.
    network.set_latency(None);
    assert!(proxy.synchronize("origin").await.unwrap().is_accepted());
    assert!(consumer.list_refs("refs/assure/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_many_commits_verified_in_parallel() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    for i in 0..40 {
        signed_commit(&publisher, &format!("change {}", i)).await;
    }
    push(&publisher, "master").await;

    let mut options = proxy_options();
    options.verify_workers = 3;
    let proxy = VerificationProxy::new(&consumer, options);
    match proxy.synchronize("origin").await.unwrap() {
        SyncOutcome::Accepted(acceptance) => assert_eq!(acceptance.verified_commits, 40),
        SyncOutcome::Rejected(rejection) => panic!("unexpected rejection: {}", rejection),
    }
}
