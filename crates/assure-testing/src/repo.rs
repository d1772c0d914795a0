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

//! In-memory checkout implementing [`Substrate`].

use crate::network::{MemoryNetwork, Object};
use assure::refspec::Refspec;
use assure::substrate::{
    branch_ref, finish_commit, CheckoutLock, CommitHook, CommitId, NoHook, ObjectId, RefUpdate,
    Substrate, SubstrateError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Operations that can be made to fail once, for rollback tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    UpdateRefs,
    WriteNote,
    ConfigSet,
    ConfigAdd,
    InstallHook,
    WritePrivate,
    WriteFile,
    Fetch,
    Push,
}

pub(crate) struct RepoState {
    pub(crate) refs: BTreeMap<String, ObjectId>,
    head: Option<String>,
    bare: bool,
    config: Vec<(String, String)>,
    hooks: BTreeMap<String, String>,
    private: BTreeMap<String, Vec<u8>>,
    files: BTreeMap<String, (Vec<u8>, bool)>,
}

impl RepoState {
    pub(crate) fn new(head: Option<String>, bare: bool) -> Self {
        Self {
            refs: BTreeMap::new(),
            head,
            bare,
            config: Vec::new(),
            hooks: BTreeMap::new(),
            private: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub(crate) fn config_push(&mut self, key: &str, value: &str) {
        self.config.push((normalize_key(key), value.to_string()));
    }
}

/// Lowercase the section and variable name; the subsection keeps its case.
fn normalize_key(key: &str) -> String {
    match (key.find('.'), key.rfind('.')) {
        (Some(first), Some(last)) if first != last => format!(
            "{}{}{}",
            key[..first].to_ascii_lowercase(),
            &key[first..last],
            key[last..].to_ascii_lowercase()
        ),
        _ => key.to_ascii_lowercase(),
    }
}

/// A checkout (or bare repository) living in a [`MemoryNetwork`].
///
/// Cloning the handle shares the checkout, so two handles behave like two
/// processes working in the same directory.
#[derive(Clone)]
pub struct MemoryRepo {
    network: MemoryNetwork,
    url: String,
    state: Arc<Mutex<RepoState>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    faults: Arc<Mutex<HashSet<Operation>>>,
}

impl MemoryRepo {
    pub(crate) fn new(network: MemoryNetwork, url: &str, state: RepoState) -> Self {
        Self {
            network,
            url: url.to_string(),
            state: Arc::new(Mutex::new(state)),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            faults: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Make the next call of `operation` fail.
    pub fn fail_next(&self, operation: Operation) {
        self.faults.lock().insert(operation);
    }

    fn check_fault(&self, operation: Operation) -> Result<(), SubstrateError> {
        if self.faults.lock().remove(&operation) {
            let message = format!("injected failure in {:?}", operation);
            return Err(match operation {
                Operation::Fetch | Operation::Push => SubstrateError::Transport {
                    url: self.url.clone(),
                    message,
                },
                _ => SubstrateError::Io(std::io::Error::other(message)),
            });
        }
        Ok(())
    }

    pub(crate) fn head_branch(&self) -> Option<String> {
        self.state.lock().head.clone()
    }

    pub(crate) fn refs_snapshot(&self) -> BTreeMap<String, ObjectId> {
        self.state.lock().refs.clone()
    }

    /// Tip of the branch `HEAD` is on.
    pub fn head(&self) -> Option<CommitId> {
        let state = self.state.lock();
        let branch = state.head.as_ref()?;
        state.refs.get(&branch_ref(branch)).cloned()
    }

    pub fn set_head(&self, branch: &str) {
        self.state.lock().head = Some(branch.to_string());
    }

    /// Add a remote the way `git remote add` does.
    pub fn add_remote(&self, name: &str, url: &str) {
        let mut state = self.state.lock();
        state.config_push(&format!("remote.{}.url", name), url);
        state.config_push(
            &format!("remote.{}.fetch", name),
            &format!("+refs/heads/*:refs/remotes/{}/*", name),
        );
    }

    /// Unsigned commit on the current branch.
    pub async fn commit(&self, message: &str) -> Result<CommitId, SubstrateError> {
        let branch = self
            .head_branch()
            .ok_or_else(|| SubstrateError::UnknownRevision("HEAD".to_string()))?;
        self.create_commit(&branch, message, &NoHook).await
    }

    /// Message of a commit, for assertions.
    pub fn commit_message(&self, commit: &CommitId) -> Option<String> {
        match self.network.object(commit)? {
            Object::Commit { message, .. } => Some(message),
            Object::Notes { .. } => None,
        }
    }

    /// Path of a file written into the work tree, with its executable bit.
    pub fn file(&self, path: &str) -> Option<(Vec<u8>, bool)> {
        self.state.lock().files.get(path).cloned()
    }

    fn notes_entries(&self, notes_ref: &str) -> BTreeMap<CommitId, Vec<u8>> {
        let tip = self.state.lock().refs.get(notes_ref).cloned();
        match tip.and_then(|id| self.network.object(&id)) {
            Some(Object::Notes { entries, .. }) => entries,
            _ => BTreeMap::new(),
        }
    }

    /// Apply updates after checking every old value; nothing moves on error.
    fn apply_updates(&self, updates: &[RefUpdate]) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        for update in updates {
            if state.refs.get(&update.name) != update.old.as_ref() {
                return Err(SubstrateError::RefConflict {
                    name: update.name.clone(),
                });
            }
            if let Some(new) = &update.new {
                if !self.network.has_object(new) {
                    return Err(SubstrateError::UnknownRevision(new.to_string()));
                }
            }
        }
        for update in updates {
            match &update.new {
                Some(new) => state.refs.insert(update.name.clone(), new.clone()),
                None => state.refs.remove(&update.name),
            };
        }
        Ok(())
    }

    /// Compute the updates `refspecs` produce when copying `source` refs
    /// into `target` refs, refusing non-fast-forward unforced updates.
    fn transfer(
        &self,
        source: &BTreeMap<String, ObjectId>,
        target: &BTreeMap<String, ObjectId>,
        refspecs: &[Refspec],
    ) -> Result<Vec<RefUpdate>, SubstrateError> {
        let mut updates: BTreeMap<String, RefUpdate> = BTreeMap::new();
        for refspec in refspecs {
            for (name, id) in source {
                let Some(dst) = refspec.map(name) else {
                    continue;
                };
                let old = target.get(&dst).cloned();
                if old.as_ref() == Some(id) {
                    continue;
                }
                if let Some(old) = &old {
                    let fast_forward = self.network.closure(std::slice::from_ref(id)).contains(old);
                    if !fast_forward && !refspec.force {
                        return Err(SubstrateError::NonFastForward { name: dst });
                    }
                }
                updates.insert(dst.clone(), RefUpdate::set(dst, old, id.clone()));
            }
        }
        Ok(updates.into_values().collect())
    }
}

#[async_trait]
impl Substrate for MemoryRepo {
    fn describe(&self) -> String {
        format!("memory:{}", self.url)
    }

    fn work_tree(&self) -> Option<PathBuf> {
        None
    }

    async fn current_branch(&self) -> Result<Option<String>, SubstrateError> {
        Ok(self.head_branch())
    }

    async fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, SubstrateError> {
        Ok(self.state.lock().refs.get(name).cloned())
    }

    async fn resolve_revision(&self, revision: &str) -> Result<CommitId, SubstrateError> {
        if revision == "HEAD" {
            return self
                .head()
                .ok_or_else(|| SubstrateError::UnknownRevision(revision.to_string()));
        }
        {
            let state = self.state.lock();
            for candidate in [
                revision.to_string(),
                format!("refs/heads/{}", revision),
                format!("refs/remotes/{}", revision),
            ] {
                if let Some(id) = state.refs.get(&candidate) {
                    return Ok(id.clone());
                }
            }
        }
        match ObjectId::parse(revision) {
            Ok(id) if self.network.has_object(&id) => Ok(id),
            _ => Err(SubstrateError::UnknownRevision(revision.to_string())),
        }
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>, SubstrateError> {
        Ok(self
            .state
            .lock()
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect())
    }

    async fn update_refs(&self, updates: &[RefUpdate]) -> Result<(), SubstrateError> {
        self.check_fault(Operation::UpdateRefs)?;
        self.apply_updates(updates)
    }

    async fn create_commit(
        &self,
        branch: &str,
        message: &str,
        hook: &dyn CommitHook,
    ) -> Result<CommitId, SubstrateError> {
        let name = branch_ref(branch);
        let parent = self.state.lock().refs.get(&name).cloned();
        let commit = self.network.store(Object::Commit {
            parents: parent.iter().cloned().collect(),
            message: message.to_string(),
        })?;
        self.apply_updates(&[RefUpdate::set(&name, parent.clone(), commit.clone())])?;
        finish_commit(self, &name, parent, commit, hook).await
    }

    async fn fast_forward(&self, branch: &str, target: &CommitId) -> Result<(), SubstrateError> {
        let name = branch_ref(branch);
        let current = self.state.lock().refs.get(&name).cloned();
        if current.as_ref() == Some(target) {
            return Ok(());
        }
        if let Some(current) = &current {
            if !self.is_ancestor(current, target).await? {
                return Err(SubstrateError::NonFastForward { name });
            }
        }
        self.apply_updates(&[RefUpdate::set(name, current, target.clone())])
    }

    async fn commits_between(
        &self,
        tip: &CommitId,
        exclude: &[ObjectId],
    ) -> Result<Vec<CommitId>, SubstrateError> {
        let excluded = self.network.closure(exclude);
        Ok(self.network.walk(tip, &excluded))
    }

    async fn is_ancestor(
        &self,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool, SubstrateError> {
        Ok(self
            .network
            .closure(std::slice::from_ref(descendant))
            .contains(ancestor))
    }

    async fn read_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
    ) -> Result<Option<Vec<u8>>, SubstrateError> {
        Ok(self.notes_entries(notes_ref).remove(commit))
    }

    async fn write_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
        body: &[u8],
    ) -> Result<(), SubstrateError> {
        self.check_fault(Operation::WriteNote)?;
        let old = self.state.lock().refs.get(notes_ref).cloned();
        let mut entries = self.notes_entries(notes_ref);
        entries.insert(commit.clone(), body.to_vec());
        let notes = self.network.store(Object::Notes {
            parent: old.clone(),
            entries,
        })?;
        self.apply_updates(&[RefUpdate::set(notes_ref, old, notes)])
    }

    async fn list_notes(&self, notes_ref: &str) -> Result<Vec<CommitId>, SubstrateError> {
        Ok(self.notes_entries(notes_ref).into_keys().collect())
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.config_get_all(key).await?.pop())
    }

    async fn config_get_all(&self, key: &str) -> Result<Vec<String>, SubstrateError> {
        let key = normalize_key(key);
        Ok(self
            .state
            .lock()
            .config
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.check_fault(Operation::ConfigSet)?;
        let key = normalize_key(key);
        let mut state = self.state.lock();
        state.config.retain(|(k, _)| *k != key);
        state.config.push((key, value.to_string()));
        Ok(())
    }

    async fn config_add(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.check_fault(Operation::ConfigAdd)?;
        self.state.lock().config_push(key, value);
        Ok(())
    }

    async fn config_unset(&self, key: &str) -> Result<(), SubstrateError> {
        let key = normalize_key(key);
        self.state.lock().config.retain(|(k, _)| *k != key);
        Ok(())
    }

    async fn config_unset_value(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        let key = normalize_key(key);
        self.state
            .lock()
            .config
            .retain(|(k, v)| !(*k == key && v == value));
        Ok(())
    }

    async fn config_list(&self, prefix: &str) -> Result<Vec<(String, String)>, SubstrateError> {
        Ok(self
            .state
            .lock()
            .config
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn read_hook(&self, name: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.state.lock().hooks.get(name).cloned())
    }

    async fn install_hook(&self, name: &str, body: &str) -> Result<(), SubstrateError> {
        self.check_fault(Operation::InstallHook)?;
        self.state
            .lock()
            .hooks
            .insert(name.to_string(), body.to_string());
        Ok(())
    }

    async fn remove_hook(&self, name: &str) -> Result<(), SubstrateError> {
        self.state.lock().hooks.remove(name);
        Ok(())
    }

    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SubstrateError> {
        Ok(self.state.lock().private.get(name).cloned())
    }

    async fn write_private(&self, name: &str, data: &[u8]) -> Result<(), SubstrateError> {
        self.check_fault(Operation::WritePrivate)?;
        self.state
            .lock()
            .private
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove_private(&self, name: &str) -> Result<(), SubstrateError> {
        self.state.lock().private.remove(name);
        Ok(())
    }

    async fn write_file(
        &self,
        path: &str,
        contents: &[u8],
        executable: bool,
    ) -> Result<(), SubstrateError> {
        self.check_fault(Operation::WriteFile)?;
        let mut state = self.state.lock();
        if state.bare {
            return Err(SubstrateError::Io(std::io::Error::other(
                "bare repository has no work tree",
            )));
        }
        state
            .files
            .insert(path.to_string(), (contents.to_vec(), executable));
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SubstrateError> {
        self.state.lock().files.remove(path);
        Ok(())
    }

    async fn fetch(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError> {
        self.check_fault(Operation::Fetch)?;
        let source = self.network.repo(url)?;
        self.network.transport_delay().await;
        let updates = self.transfer(&source.refs_snapshot(), &self.refs_snapshot(), refspecs)?;
        tracing::trace!(url = %url, updates = updates.len(), "memory fetch");
        self.apply_updates(&updates)
    }

    async fn push(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError> {
        self.check_fault(Operation::Push)?;
        let target = self.network.repo(url)?;
        self.network.transport_delay().await;
        let updates = self.transfer(&self.refs_snapshot(), &target.refs_snapshot(), refspecs)?;
        tracing::trace!(url = %url, updates = updates.len(), "memory push");
        target.apply_updates(&updates)
    }

    async fn list_remote_refs(
        &self,
        url: &str,
    ) -> Result<Vec<(String, ObjectId)>, SubstrateError> {
        let source = self.network.repo(url)?;
        self.network.transport_delay().await;
        let mut refs: Vec<(String, ObjectId)> = source.refs_snapshot().into_iter().collect();
        if let Some(head) = source.head() {
            refs.insert(0, ("HEAD".to_string(), head));
        }
        Ok(refs)
    }

    async fn lock(&self) -> Result<CheckoutLock, SubstrateError> {
        let guard = self.lock.clone().lock_owned().await;
        Ok(CheckoutLock::new(guard))
    }

    async fn try_lock(&self) -> Result<Option<CheckoutLock>, SubstrateError> {
        Ok(self.lock.clone().try_lock_owned().ok().map(CheckoutLock::new))
    }
}
