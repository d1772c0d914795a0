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

//! Shared object store and url registry for in-memory repositories.

use crate::repo::{MemoryRepo, RepoState};
use assure::substrate::{branch_ref, CommitId, ObjectId, SubstrateError};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Object {
    Commit {
        parents: Vec<CommitId>,
        message: String,
    },
    /// Full snapshot of a notes ref; `parent` is the previous notes commit.
    Notes {
        parent: Option<ObjectId>,
        entries: BTreeMap<CommitId, Vec<u8>>,
    },
}

impl Object {
    fn parents(&self) -> Vec<ObjectId> {
        match self {
            Object::Commit { parents, .. } => parents.clone(),
            Object::Notes { parent, .. } => parent.iter().cloned().collect(),
        }
    }
}

#[derive(Default)]
struct NetworkInner {
    objects: Mutex<HashMap<ObjectId, Object>>,
    repos: Mutex<HashMap<String, MemoryRepo>>,
    offline: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    clock: AtomicU64,
}

/// A set of in-memory repositories that can reach each other by url.
///
/// Objects are content addressed and shared by every repository on the
/// network; what a repository "has" is decided by its refs alone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-bare repository at `url` with `HEAD` on `master`.
    pub fn init(&self, url: &str) -> MemoryRepo {
        self.register(url, RepoState::new(Some("master".to_string()), false))
    }

    pub fn init_bare(&self, url: &str) -> MemoryRepo {
        self.register(url, RepoState::new(Some("master".to_string()), true))
    }

    /// Clone `source` to `url` the way `git clone` does: branches become
    /// `origin` remote-tracking refs, the source's current branch is checked
    /// out and notes are not copied.
    pub fn clone_repo(&self, source: &str, url: &str) -> Result<MemoryRepo, SubstrateError> {
        let origin = self.repo(source)?;
        let head = origin.head_branch();
        let mut state = RepoState::new(head.clone(), false);
        for (name, id) in origin.refs_snapshot() {
            if let Some(branch) = name.strip_prefix("refs/heads/") {
                state
                    .refs
                    .insert(format!("refs/remotes/origin/{}", branch), id.clone());
            }
        }
        if let Some(head) = &head {
            if let Some(id) = origin.refs_snapshot().get(&branch_ref(head)) {
                state.refs.insert(branch_ref(head), id.clone());
            }
        }
        state.config_push("remote.origin.url", source);
        state.config_push("remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*");
        Ok(self.register(url, state))
    }

    /// Make `url` unreachable (or reachable again).
    pub fn set_offline(&self, url: &str, offline: bool) {
        let mut set = self.inner.offline.lock();
        if offline {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }

    /// Delay every transport operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    fn register(&self, url: &str, state: RepoState) -> MemoryRepo {
        let repo = MemoryRepo::new(self.clone(), url, state);
        self.inner.repos.lock().insert(url.to_string(), repo.clone());
        repo
    }

    /// Repository reachable at `url`, as a transport would see it.
    pub(crate) fn repo(&self, url: &str) -> Result<MemoryRepo, SubstrateError> {
        let transport = |message: &str| SubstrateError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        };
        if url.contains("::") {
            return Err(transport("no transport for remote-helper urls"));
        }
        if self.inner.offline.lock().contains(url) {
            return Err(transport("connection refused"));
        }
        self.inner
            .repos
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| transport("repository not found"))
    }

    pub(crate) async fn transport_delay(&self) {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub(crate) fn store(&self, object: Object) -> Result<ObjectId, SubstrateError> {
        let tick = self.inner.clock.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(tick.to_be_bytes());
        match &object {
            Object::Commit { parents, message } => {
                hasher.update(b"commit\0");
                for parent in parents {
                    hasher.update(parent.as_str().as_bytes());
                }
                hasher.update(message.as_bytes());
            }
            Object::Notes { parent, entries } => {
                hasher.update(b"notes\0");
                if let Some(parent) = parent {
                    hasher.update(parent.as_str().as_bytes());
                }
                for (commit, body) in entries {
                    hasher.update(commit.as_str().as_bytes());
                    hasher.update(body);
                }
            }
        }
        let digest = hex::encode(hasher.finalize());
        let id = ObjectId::parse(&digest[..40])?;
        self.inner.objects.lock().insert(id.clone(), object);
        Ok(id)
    }

    pub(crate) fn object(&self, id: &ObjectId) -> Option<Object> {
        self.inner.objects.lock().get(id).cloned()
    }

    pub(crate) fn has_object(&self, id: &ObjectId) -> bool {
        self.inner.objects.lock().contains_key(id)
    }

    /// `start` and everything reachable from it.
    pub(crate) fn closure(&self, start: &[ObjectId]) -> BTreeSet<ObjectId> {
        let objects = self.inner.objects.lock();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ObjectId> = start.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(object) = objects.get(&id) {
                stack.extend(object.parents());
            }
        }
        seen
    }

    /// Commits reachable from `tip` outside `excluded`, children before
    /// parents.
    pub(crate) fn walk(&self, tip: &CommitId, excluded: &BTreeSet<ObjectId>) -> Vec<CommitId> {
        let objects = self.inner.objects.lock();
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        // Iterative post-order; reversed it is a topological order.
        let mut stack = vec![(tip.clone(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if excluded.contains(&id) || !visited.insert(id.clone()) {
                continue;
            }
            stack.push((id.clone(), true));
            if let Some(object) = objects.get(&id) {
                for parent in object.parents() {
                    stack.push((parent, false));
                }
            }
        }
        order.reverse();
        order
    }
}
