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

//! Tests against the real git CLI. Skipped when git is not installed.

use assure::{
    CommitSigner, GitOptions, GitSubstrate, KeyPair, KeyStore, NoHook, RefUpdate, Substrate,
    SubstrateError, VerificationResult, DEFAULT_NOTES_REF,
};
use assure::signature::check_note;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git_init(dir: &Path, bare: bool) {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "init.defaultBranch=master", "init", "-q"]);
    if bare {
        cmd.arg("--bare");
    }
    let status = cmd.arg(dir).status().unwrap();
    assert!(status.success());
}

async fn checkout(dir: &Path) -> GitSubstrate {
    let options = GitOptions::in_dir(dir)
        .with_env("GIT_AUTHOR_NAME", "Assure Test")
        .with_env("GIT_AUTHOR_EMAIL", "assure@example.com")
        .with_env("GIT_COMMITTER_NAME", "Assure Test")
        .with_env("GIT_COMMITTER_EMAIL", "assure@example.com")
        .with_env("GIT_CONFIG_NOSYSTEM", "1");
    GitSubstrate::open(options).await.unwrap()
}

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not found, skipping");
            return;
        }
    };
}

#[tokio::test]
async fn test_config_round_trip() {
    require_git!();
    let dir = TempDir::new().unwrap();
    git_init(dir.path(), false);
    let repo = checkout(dir.path()).await;

    assert_eq!(repo.config_get("assure.origin/master.verifykey").await.unwrap(), None);
    repo.config_set("assure.origin/master.verifykey", "vk0-00")
        .await
        .unwrap();
    assert_eq!(
        repo.config_get("assure.origin/master.verifykey")
            .await
            .unwrap()
            .as_deref(),
        Some("vk0-00")
    );

    repo.config_add("remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*")
        .await
        .unwrap();
    repo.config_add("remote.origin.fetch", "+refs/notes/assure:refs/notes/assure")
        .await
        .unwrap();
    assert_eq!(repo.config_get_all("remote.origin.fetch").await.unwrap().len(), 2);

    repo.config_unset_value("remote.origin.fetch", "+refs/notes/assure:refs/notes/assure")
        .await
        .unwrap();
    assert_eq!(
        repo.config_get_all("remote.origin.fetch").await.unwrap(),
        vec!["+refs/heads/*:refs/remotes/origin/*".to_string()]
    );

    let listed = repo.config_list("assure.").await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_signed_commit_with_git() {
    require_git!();
    let dir = TempDir::new().unwrap();
    git_init(dir.path(), false);
    let repo = checkout(dir.path()).await;

    let pair = KeyPair::generate().unwrap();
    KeyStore::new(&repo).store(&pair).await.unwrap();
    let signer = CommitSigner::load(&repo, DEFAULT_NOTES_REF).await.unwrap();

    let first = repo.create_commit("master", "first", &signer).await.unwrap();
    let second = repo.create_commit("master", "second", &signer).await.unwrap();

    assert_eq!(repo.resolve_revision("HEAD").await.unwrap(), second);
    assert!(repo.is_ancestor(&first, &second).await.unwrap());
    assert_eq!(
        repo.commits_between(&second, &[first.clone()]).await.unwrap(),
        vec![second.clone()]
    );

    let mut noted = repo.list_notes(DEFAULT_NOTES_REF).await.unwrap();
    noted.sort();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(noted, expected);

    let note = repo.read_note(DEFAULT_NOTES_REF, &second).await.unwrap();
    assert_eq!(
        check_note(pair.verify_key(), &second, note.as_deref()),
        VerificationResult::Valid
    );
}

#[tokio::test]
async fn test_update_refs_is_atomic() {
    require_git!();
    let dir = TempDir::new().unwrap();
    git_init(dir.path(), false);
    let repo = checkout(dir.path()).await;

    let first = repo.create_commit("master", "first", &NoHook).await.unwrap();
    let second = repo.create_commit("master", "second", &NoHook).await.unwrap();

    // Second update has a stale expectation, so neither applies.
    let err = repo
        .update_refs(&[
            RefUpdate::set("refs/heads/topic", None, first.clone()),
            RefUpdate::set("refs/heads/master", Some(first.clone()), second.clone()),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, SubstrateError::RefConflict { .. }), "{:?}", err);
    assert_eq!(repo.resolve_ref("refs/heads/topic").await.unwrap(), None);

    repo.update_refs(&[
        RefUpdate::set("refs/heads/topic", None, first.clone()),
        RefUpdate::set("refs/heads/master", Some(second.clone()), first.clone()),
    ])
    .await
    .unwrap();
    assert_eq!(repo.resolve_ref("refs/heads/topic").await.unwrap(), Some(first.clone()));
    assert_eq!(repo.resolve_ref("refs/heads/master").await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_push_fetch_and_remote_listing() {
    require_git!();
    let upstream_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    git_init(upstream_dir.path(), true);
    git_init(work_dir.path(), false);
    let repo = checkout(work_dir.path()).await;
    let url = upstream_dir.path().display().to_string();

    let commit = repo.create_commit("master", "first", &NoHook).await.unwrap();
    repo.write_note(DEFAULT_NOTES_REF, &commit, b"annotation")
        .await
        .unwrap();
    repo.push(
        &url,
        &[
            "refs/heads/master:refs/heads/master".parse().unwrap(),
            "refs/notes/assure:refs/notes/assure".parse().unwrap(),
        ],
    )
    .await
    .unwrap();

    let remote = repo.list_remote_refs(&url).await.unwrap();
    assert!(remote.contains(&("refs/heads/master".to_string(), commit.clone())));
    assert!(remote.iter().any(|(name, _)| name == DEFAULT_NOTES_REF));

    repo.fetch(&url, &["+refs/heads/*:refs/remotes/up/*".parse().unwrap()])
        .await
        .unwrap();
    assert_eq!(
        repo.resolve_ref("refs/remotes/up/master").await.unwrap(),
        Some(commit)
    );

    let missing = work_dir.path().join("nowhere").display().to_string();
    let err = repo.list_remote_refs(&missing).await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_lock_file_excludes_second_holder() {
    require_git!();
    let dir = TempDir::new().unwrap();
    git_init(dir.path(), false);
    let repo = checkout(dir.path()).await;
    let other = checkout(dir.path()).await;

    let held = repo.try_lock().await.unwrap().unwrap();
    assert!(other.try_lock().await.unwrap().is_none());
    drop(held);
    assert!(other.try_lock().await.unwrap().is_some());
}

#[tokio::test]
async fn test_hooks_and_private_files() {
    require_git!();
    let dir = TempDir::new().unwrap();
    git_init(dir.path(), false);
    let repo = checkout(dir.path()).await;

    assert!(repo.read_hook("post-commit").await.unwrap().is_none());
    repo.install_hook("post-commit", "#!/bin/sh\ntrue\n").await.unwrap();
    assert_eq!(
        repo.read_hook("post-commit").await.unwrap().as_deref(),
        Some("#!/bin/sh\ntrue\n")
    );
    repo.remove_hook("post-commit").await.unwrap();
    assert!(repo.read_hook("post-commit").await.unwrap().is_none());

    repo.write_private("signing-key", b"secret").await.unwrap();
    assert_eq!(
        repo.read_private("signing-key").await.unwrap().as_deref(),
        Some(&b"secret"[..])
    );
    repo.remove_private("signing-key").await.unwrap();
    assert!(repo.read_private("signing-key").await.unwrap().is_none());
}
