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

//! Setup orchestrator integration tests.

use crate::fixtures::{configured_publisher, publisher_options, upstream_with_publisher, UPSTREAM};
use assure::setup::{
    helper_alias, is_assure_hook, HELPER_ALIAS_KEY, POST_COMMIT_HOOK, PUBLISH_BRANCH_KEY, TOOL_NAME,
};
use std::path::PathBuf;
use assure::{
    setup_downstream, setup_publisher, DownstreamArtifact, DownstreamOptions, ErrorKind,
    AssureError, KeyPair, KeyStore, SetupError, Substrate, TrustStore, DEFAULT_NOTES_REF,
};
use assure_testing::{MemoryNetwork, Operation};

#[tokio::test]
async fn test_publisher_setup_configures_checkout() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;

    assert_eq!(report.branch, "master");
    assert_eq!(report.remote, "origin");
    assert!(report.previous_key.is_none());

    let stored = KeyStore::new(&publisher).load().await.unwrap().unwrap();
    assert_eq!(stored.verify_key(), &report.verify_key);

    let hook = publisher.read_hook(POST_COMMIT_HOOK).await.unwrap().unwrap();
    assert!(is_assure_hook(&hook));
    assert!(hook.contains("'master'"));

    let push = publisher.config_get_all("remote.origin.push").await.unwrap();
    assert!(push.contains(&"refs/heads/master:refs/heads/master".to_string()));
    assert!(push.contains(&"refs/notes/assure:refs/notes/assure".to_string()));

    let (script, executable) = publisher.file(&report.artifact).unwrap();
    assert!(executable);
    let artifact = DownstreamArtifact::parse(&String::from_utf8(script).unwrap()).unwrap();
    assert_eq!(artifact.verify_key, report.verify_key);
    assert_eq!(artifact.branch, "master");
}

#[tokio::test]
async fn test_publisher_rerun_requires_rotate() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;

    let err = setup_publisher(&publisher, &publisher_options())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::AlreadyConfigured { .. }));
    assert_eq!(AssureError::from(err).kind(), ErrorKind::ConcurrentSetupConflict);

    // The refused rerun left the original key in place.
    let stored = KeyStore::new(&publisher).load().await.unwrap().unwrap();
    assert_eq!(stored.verify_key(), &report.verify_key);
}

#[tokio::test]
async fn test_publisher_rotation_replaces_key() {
    let network = MemoryNetwork::new();
    let (publisher, first) = configured_publisher(&network).await;

    let mut options = publisher_options();
    options.rotate = true;
    let second = setup_publisher(&publisher, &options).await.unwrap();

    assert_ne!(second.verify_key, first.verify_key);
    assert_eq!(second.previous_key.as_ref(), Some(&first.verify_key));
    let push = publisher.config_get_all("remote.origin.push").await.unwrap();
    assert_eq!(push.len(), 2, "refspecs are not duplicated: {:?}", push);
}

#[tokio::test]
async fn test_failed_publisher_setup_leaves_nothing_behind() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;

    publisher.fail_next(Operation::WriteFile);
    let err = setup_publisher(&publisher, &publisher_options())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Substrate(_)));

    assert!(KeyStore::new(&publisher).load().await.unwrap().is_none());
    assert!(publisher.read_hook(POST_COMMIT_HOOK).await.unwrap().is_none());
    assert!(publisher
        .config_get_all("remote.origin.push")
        .await
        .unwrap()
        .is_empty());
    assert!(publisher.config_get(PUBLISH_BRANCH_KEY).await.unwrap().is_none());

    // Nothing left over means a retry succeeds.
    setup_publisher(&publisher, &publisher_options()).await.unwrap();
}

#[tokio::test]
async fn test_hook_failure_rolls_back_key() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;

    publisher.fail_next(Operation::InstallHook);
    let err = setup_publisher(&publisher, &publisher_options())
        .await
        .unwrap_err();
    assert_eq!(AssureError::from(err).kind(), ErrorKind::HookInstallFailure);
    assert!(KeyStore::new(&publisher).load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_foreign_hook_is_preserved() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;
    publisher
        .install_hook(POST_COMMIT_HOOK, "#!/bin/sh\nmake lint\n")
        .await
        .unwrap();

    let err = setup_publisher(&publisher, &publisher_options())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::HookInstall { .. }));
    assert_eq!(
        publisher.read_hook(POST_COMMIT_HOOK).await.unwrap().as_deref(),
        Some("#!/bin/sh\nmake lint\n")
    );
    assert!(KeyStore::new(&publisher).load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_setup_refuses_locked_checkout() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;

    let _held = publisher.lock().await.unwrap();
    let err = setup_publisher(&publisher, &publisher_options())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Locked(_)));
    assert_eq!(AssureError::from(err).kind(), ErrorKind::ConcurrentSetupConflict);
}

fn downstream_options(verify_key: assure::VerifyKey) -> DownstreamOptions {
    DownstreamOptions {
        remote: "origin".into(),
        branch: "master".into(),
        verify_key,
        notes_ref: DEFAULT_NOTES_REF.into(),
        helper: None,
    }
}

#[tokio::test]
async fn test_downstream_setup_routes_binds_and_fetches_notes() {
    let network = MemoryNetwork::new();
    network.init_bare(UPSTREAM);
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();
    let key = KeyPair::generate().unwrap().verify_key().clone();

    let report = setup_downstream(&clone, &downstream_options(key.clone()))
        .await
        .unwrap();

    assert_eq!(report.url, format!("assure::{}", UPSTREAM));
    assert_eq!(
        clone.config_get("remote.origin.url").await.unwrap(),
        Some(report.url.clone())
    );
    let binding = TrustStore::new(&clone).require("origin", "master").await.unwrap();
    assert_eq!(binding.verify_key, key);
    let fetch = clone.config_get_all("remote.origin.fetch").await.unwrap();
    assert!(fetch.contains(&"+refs/notes/assure:refs/notes/assure".to_string()));

    // Running it again changes nothing.
    let again = setup_downstream(&clone, &downstream_options(key.clone()))
        .await
        .unwrap();
    assert_eq!(again.url, report.url);
    assert_eq!(again.previous_key, Some(key));
    assert_eq!(clone.config_get_all("remote.origin.fetch").await.unwrap(), fetch);
}

#[tokio::test]
async fn test_downstream_setup_replaces_binding() {
    let network = MemoryNetwork::new();
    network.init_bare(UPSTREAM);
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();
    let old = KeyPair::generate().unwrap().verify_key().clone();
    let new = KeyPair::generate().unwrap().verify_key().clone();

    setup_downstream(&clone, &downstream_options(old.clone()))
        .await
        .unwrap();
    let report = setup_downstream(&clone, &downstream_options(new.clone()))
        .await
        .unwrap();

    assert_eq!(report.previous_key, Some(old));
    let bindings = TrustStore::new(&clone).list().await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].verify_key, new);
}

#[tokio::test]
async fn test_failed_downstream_setup_restores_remote() {
    let network = MemoryNetwork::new();
    network.init_bare(UPSTREAM);
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();
    let key = KeyPair::generate().unwrap().verify_key().clone();

    clone.fail_next(Operation::ConfigAdd);
    assert!(setup_downstream(&clone, &downstream_options(key)).await.is_err());

    assert_eq!(
        clone.config_get("remote.origin.url").await.unwrap().as_deref(),
        Some(UPSTREAM)
    );
    assert!(TrustStore::new(&clone).list().await.unwrap().is_empty());
    assert_eq!(clone.config_get_all("remote.origin.fetch").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_downstream_setup_unknown_remote() {
    let network = MemoryNetwork::new();
    let repo = network.init("mem://lonely");
    let key = KeyPair::generate().unwrap().verify_key().clone();

    let err = setup_downstream(&repo, &downstream_options(key))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::UnknownRemote(ref r) if r == "origin"));
}

#[tokio::test]
async fn test_downstream_setup_from_published_artifact() {
    let network = MemoryNetwork::new();
    let (publisher, report) = configured_publisher(&network).await;
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();

    let (script, _) = publisher.file(&report.artifact).unwrap();
    let artifact = DownstreamArtifact::parse(&String::from_utf8(script).unwrap()).unwrap();
    let options = DownstreamOptions::from_artifact(artifact, DEFAULT_NOTES_REF);
    let downstream = setup_downstream(&clone, &options).await.unwrap();

    assert_eq!(downstream.branch, report.branch);
    assert_eq!(downstream.verify_key, report.verify_key);
}

#[tokio::test]
async fn test_publisher_bundles_tool_beside_artifact() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;
    let dir = tempfile::TempDir::new().unwrap();
    let tool = dir.path().join("git-assure");
    std::fs::write(&tool, b"tool binary").unwrap();

    let mut options = publisher_options();
    options.bundle_tool = Some(tool);
    let report = setup_publisher(&publisher, &options).await.unwrap();

    assert_eq!(report.bundled_tool.as_deref(), Some(TOOL_NAME));
    let (binary, executable) = publisher.file(TOOL_NAME).unwrap();
    assert_eq!(binary, b"tool binary");
    assert!(executable);
}

#[tokio::test]
async fn test_missing_bundled_tool_rolls_back() {
    let network = MemoryNetwork::new();
    let publisher = upstream_with_publisher(&network).await;
    let dir = tempfile::TempDir::new().unwrap();

    let mut options = publisher_options();
    options.bundle_tool = Some(dir.path().join("absent"));
    let err = setup_publisher(&publisher, &options).await.unwrap_err();
    assert!(matches!(err, SetupError::Artifact(_)));

    assert!(KeyStore::new(&publisher).load().await.unwrap().is_none());
    assert!(publisher.file(&options.artifact_name).is_none());
    assert!(publisher.file(TOOL_NAME).is_none());
}

#[tokio::test]
async fn test_downstream_setup_registers_helper() {
    let network = MemoryNetwork::new();
    network.init_bare(UPSTREAM);
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();
    let key = KeyPair::generate().unwrap().verify_key().clone();
    let tool = PathBuf::from("/work/clone/assure-tool");

    let mut options = downstream_options(key);
    options.helper = Some(tool.clone());
    setup_downstream(&clone, &options).await.unwrap();

    assert_eq!(
        clone.config_get(HELPER_ALIAS_KEY).await.unwrap(),
        Some(helper_alias(&tool))
    );
}

#[tokio::test]
async fn test_failed_downstream_setup_removes_helper() {
    let network = MemoryNetwork::new();
    network.init_bare(UPSTREAM);
    let clone = network.clone_repo(UPSTREAM, "mem://clone").unwrap();
    let key = KeyPair::generate().unwrap().verify_key().clone();

    let mut options = downstream_options(key);
    options.helper = Some(PathBuf::from("/work/clone/assure-tool"));
    clone.fail_next(Operation::ConfigAdd);
    assert!(setup_downstream(&clone, &options).await.is_err());

    assert_eq!(clone.config_get(HELPER_ALIAS_KEY).await.unwrap(), None);
}
