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

//! Remote helper protocol tests.

use crate::fixtures::{
    configured_publisher, downstream, proxy_options, push, signed_commit, visible_refs, UPSTREAM,
};
use assure::{HelperError, RemoteHelper, Substrate};
use assure_testing::MemoryRepo;
use tokio::io::BufReader;

async fn session(checkout: &MemoryRepo, script: &str) -> (Result<(), HelperError>, String) {
    let helper = RemoteHelper::new(
        checkout,
        proxy_options(),
        "origin",
        &format!("assure::{}", UPSTREAM),
    );
    let mut output = Vec::new();
    let result = helper
        .run(BufReader::new(script.as_bytes()), &mut output)
        .await;
    (result, String::from_utf8(output).unwrap())
}

#[tokio::test]
async fn test_capabilities_and_list() {
    let network = assure_testing::MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let head = signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;

    let (result, output) = session(&consumer, "capabilities\nlist\n\n").await;
    result.unwrap();

    let mut sections = output.split("\n\n");
    assert_eq!(sections.next(), Some("fetch\noption\npush"));
    let listing = sections.next().unwrap();
    assert!(listing.contains(&format!("{} refs/heads/master", head)));
    assert!(listing.contains(&format!("{} HEAD", head)));
    assert!(listing.contains(" refs/notes/assure"));
}

#[tokio::test]
async fn test_fetch_of_signed_history_succeeds_without_moving_refs() {
    let network = assure_testing::MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let head = signed_commit(&publisher, "signed").await;
    push(&publisher, "master").await;
    let before = visible_refs(&consumer).await;

    let script = format!(
        "option verbosity 1\nfetch {} refs/heads/master\n\n\n",
        head
    );
    let (result, output) = session(&consumer, &script).await;
    result.unwrap();

    assert_eq!(output, "ok\n\n");
    // Git moves the refs itself once the helper reports success.
    assert_eq!(visible_refs(&consumer).await, before);
}

#[tokio::test]
async fn test_fetch_of_unsigned_history_fails() {
    let network = assure_testing::MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let head = publisher.commit("unsigned").await.unwrap();
    push(&publisher, "master").await;

    let script = format!("fetch {} refs/heads/master\n\n", head);
    let (result, output) = session(&consumer, &script).await;

    match result {
        Err(HelperError::Rejected(rejection)) => {
            assert_eq!(rejection.failures[0].commit, head);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(output.is_empty(), "no success reported: {:?}", output);
}

#[tokio::test]
async fn test_fetch_of_stale_tip_fails() {
    let network = assure_testing::MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let old = signed_commit(&publisher, "first").await;
    signed_commit(&publisher, "second").await;
    push(&publisher, "master").await;

    let script = format!("fetch {} refs/heads/master\n\n", old);
    let (result, _) = session(&consumer, &script).await;
    assert!(matches!(result, Err(HelperError::Stale { .. })));
}

#[tokio::test]
async fn test_push_is_forwarded() {
    let network = assure_testing::MemoryNetwork::new();
    let (_, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;
    let head = consumer.commit("from downstream").await.unwrap();

    let (result, output) =
        session(&consumer, "push refs/heads/master:refs/heads/master\n\n").await;
    result.unwrap();

    assert_eq!(output, "ok refs/heads/master\n\n");
    let upstream_head = consumer
        .list_remote_refs(UPSTREAM)
        .await
        .unwrap()
        .into_iter()
        .find(|(name, _)| name == "refs/heads/master")
        .map(|(_, id)| id);
    assert_eq!(upstream_head, Some(head));
}

#[tokio::test]
async fn test_unknown_command_is_a_protocol_error() {
    let network = assure_testing::MemoryNetwork::new();
    let (_, report) = configured_publisher(&network).await;
    let consumer = downstream(&network, "mem://consumer", &report).await;

    let (result, _) = session(&consumer, "connect git-upload-pack\n").await;
    assert!(matches!(result, Err(HelperError::Protocol(_))));
}
