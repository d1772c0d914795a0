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

//! End-to-end publisher to downstream scenario on the in-memory substrate.

use crate::fixtures::{proxy_options, publisher_options, push, signed_commit, UPSTREAM};
use assure::{
    setup_downstream, setup_publisher, DownstreamArtifact, DownstreamOptions, PullOutcome,
    Substrate, VerificationProxy, DEFAULT_NOTES_REF,
};
use assure_testing::MemoryNetwork;

#[tokio::test]
async fn test_publish_verify_and_reject_third_party() {
    let network = MemoryNetwork::new();
    let upstream = network.init_bare(UPSTREAM);

    // Publisher starts with an unsigned commit that is already upstream.
    let publisher = network.clone_repo(UPSTREAM, "mem://publisher").unwrap();
    publisher.commit("initial, unsigned").await.unwrap();
    push(&publisher, "master").await;

    let report = setup_publisher(&publisher, &publisher_options()).await.unwrap();
    assert!(report.verify_key.to_string().starts_with("vk0-"));

    // The artifact is committed and the commit is signed by the hook.
    let first = signed_commit(&publisher, "add setup-assure").await;
    assert_eq!(publisher.list_notes(DEFAULT_NOTES_REF).await.unwrap(), vec![first.clone()]);
    push(&publisher, "master").await;
    assert_eq!(upstream.head(), Some(first.clone()));
    assert_eq!(
        upstream.list_notes(DEFAULT_NOTES_REF).await.unwrap(),
        vec![first.clone()]
    );

    // A plain clone sees no signatures.
    let downstream = network.clone_repo(UPSTREAM, "mem://downstream").unwrap();
    assert!(downstream.list_notes(DEFAULT_NOTES_REF).await.unwrap().is_empty());

    // Running the published artifact configures it.
    let (script, _) = publisher.file(&report.artifact).unwrap();
    let artifact = DownstreamArtifact::parse(&String::from_utf8(script).unwrap()).unwrap();
    setup_downstream(
        &downstream,
        &DownstreamOptions::from_artifact(artifact, DEFAULT_NOTES_REF),
    )
    .await
    .unwrap();

    let proxy = VerificationProxy::new(&downstream, proxy_options());
    assert!(matches!(
        proxy.pull("origin", "master").await.unwrap(),
        PullOutcome::UpToDate { .. }
    ));
    assert_eq!(downstream.head(), publisher.head());

    // A second signed commit propagates.
    let second = signed_commit(&publisher, "second signed change").await;
    push(&publisher, "master").await;
    assert!(matches!(
        proxy.pull("origin", "master").await.unwrap(),
        PullOutcome::Updated { .. }
    ));
    assert_eq!(downstream.head(), Some(second.clone()));
    assert!(downstream
        .read_note(DEFAULT_NOTES_REF, &second)
        .await
        .unwrap()
        .is_some());

    // A third party pushes an unsigned commit straight to the upstream.
    let third_party = network.clone_repo(UPSTREAM, "mem://third-party").unwrap();
    let intruding = third_party.commit("unsigned change").await.unwrap();
    push(&third_party, "master").await;
    assert_eq!(upstream.head(), Some(intruding.clone()));

    match proxy.pull("origin", "master").await.unwrap() {
        PullOutcome::Rejected(rejection) => {
            assert_eq!(rejection.failures.len(), 1);
            assert_eq!(rejection.failures[0].commit, intruding);
        }
        other => panic!("unsigned push was not rejected: {:?}", other),
    }
    assert_eq!(downstream.head(), Some(second.clone()));
    assert_eq!(
        downstream
            .resolve_ref("refs/remotes/origin/master")
            .await
            .unwrap(),
        Some(second)
    );
}
