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

//! [`Substrate`] implementation that drives the `git` command line.
//!
//! Every subprocess gets its repository location through explicit
//! `GIT_DIR`/`GIT_WORK_TREE` variables set on that command only; the
//! process environment is never modified.

use super::{
    branch_ref, finish_commit, CheckoutLock, CommitHook, CommitId, ObjectId, RefUpdate,
    Substrate, SubstrateError,
};
use crate::refspec::Refspec;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const LOCK_FILE: &str = "assure.lock";
const PRIVATE_DIR: &str = "assure";
const LOCK_POLL: Duration = Duration::from_millis(50);
/// A lock file without a readable owner is considered abandoned after this.
const UNOWNED_LOCK_AGE: Duration = Duration::from_secs(10);

/// How to locate and run git for one checkout.
#[derive(Debug, Clone)]
pub struct GitOptions {
    /// The git executable.
    pub git_binary: PathBuf,
    /// Directory git is started in to discover the repository.
    pub cwd: Option<PathBuf>,
    /// Explicit repository directory (`GIT_DIR`).
    pub git_dir: Option<PathBuf>,
    /// Explicit work tree (`GIT_WORK_TREE`).
    pub work_tree: Option<PathBuf>,
    /// Extra variables applied to every git subprocess.
    pub env: Vec<(OsString, OsString)>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            cwd: None,
            git_dir: None,
            work_tree: None,
            env: Vec::new(),
        }
    }
}

impl GitOptions {
    /// Discover the repository containing `path`.
    pub fn in_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(path.into()),
            ..Self::default()
        }
    }

    /// Options for a process started by git itself (hooks, remote helpers),
    /// which passes the repository through `GIT_DIR`.
    pub fn from_env() -> Self {
        Self {
            git_dir: std::env::var_os("GIT_DIR").map(PathBuf::from),
            work_tree: std::env::var_os("GIT_WORK_TREE").map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, git_binary: impl Into<PathBuf>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A checkout driven through the git CLI.
#[derive(Debug, Clone)]
pub struct GitSubstrate {
    options: GitOptions,
    git_dir: PathBuf,
    work_tree: Option<PathBuf>,
    hooks_dir: PathBuf,
}

impl GitSubstrate {
    /// Locate the repository described by `options`.
    pub async fn open(options: GitOptions) -> Result<Self, SubstrateError> {
        let cwd = match options.cwd.clone() {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };

        let rev_parse = |args: &'static [&'static str]| {
            let mut cmd = Command::new(&options.git_binary);
            cmd.args(args).current_dir(&cwd).env("LC_ALL", "C");
            if let Some(git_dir) = &options.git_dir {
                cmd.env("GIT_DIR", git_dir);
            }
            if let Some(work_tree) = &options.work_tree {
                cmd.env("GIT_WORK_TREE", work_tree);
            }
            for (key, value) in &options.env {
                cmd.env(key, value);
            }
            cmd
        };

        let git_dir = PathBuf::from(
            capture(rev_parse(&["rev-parse", "--absolute-git-dir"]), "rev-parse --absolute-git-dir")
                .await?
                .trim(),
        );

        let output = run(rev_parse(&["rev-parse", "--show-toplevel"]), "rev-parse --show-toplevel").await?;
        let work_tree = if output.status.success() {
            let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!top.is_empty()).then(|| PathBuf::from(top))
        } else {
            None
        };

        let hooks = PathBuf::from(
            capture(rev_parse(&["rev-parse", "--git-path", "hooks"]), "rev-parse --git-path hooks")
                .await?
                .trim(),
        );
        let hooks_dir = if hooks.is_absolute() {
            hooks
        } else {
            cwd.join(hooks)
        };

        tracing::debug!(git_dir = %git_dir.display(), "Opened git checkout");
        Ok(Self {
            options,
            git_dir,
            work_tree,
            hooks_dir,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new(&self.options.git_binary);
        cmd.env("GIT_DIR", &self.git_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .current_dir(self.work_tree.as_ref().unwrap_or(&self.git_dir))
            .kill_on_drop(true);
        if let Some(work_tree) = &self.work_tree {
            cmd.env("GIT_WORK_TREE", work_tree);
        }
        for (key, value) in &self.options.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run git and return raw output regardless of exit status.
    async fn output(&self, args: &[&str]) -> Result<Output, SubstrateError> {
        let mut cmd = self.git();
        cmd.args(args);
        run(cmd, &args.join(" ")).await
    }

    /// Run git and return stdout, failing on a non-zero exit.
    async fn stdout(&self, args: &[&str]) -> Result<String, SubstrateError> {
        let output = self.output(args).await?;
        check(&output, &args.join(" "))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn output_with_input(&self, args: &[&str], input: &[u8]) -> Result<Output, SubstrateError> {
        let command = args.join(" ");
        let mut cmd = self.git();
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| SubstrateError::Spawn {
            command: command.clone(),
            source,
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }
        Ok(child.wait_with_output().await?)
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(PRIVATE_DIR).join(name)
    }

    fn work_path(&self, path: &str) -> Result<PathBuf, SubstrateError> {
        match &self.work_tree {
            Some(root) => Ok(root.join(path)),
            None => Err(SubstrateError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} has no work tree", self.git_dir.display()),
            ))),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.git_dir.join(LOCK_FILE)
    }

    fn try_create_lock(&self) -> Result<Option<CheckoutLock>, SubstrateError> {
        let path = self.lock_path();
        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let guard = LockFileGuard { path };
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(Some(CheckoutLock::new(guard)));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !remove_abandoned_lock(&path)? {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn empty_tree(&self) -> Result<String, SubstrateError> {
        let output = self.output_with_input(&["mktree"], b"").await?;
        check(&output, "mktree")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

struct LockFileGuard {
    path: PathBuf,
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

/// Owner recorded in a lock file, if it names one.
fn lock_owner(contents: &str) -> Option<u32> {
    contents.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let mut system = System::new();
    system.refresh_processes();
    system.process(Pid::from(pid as usize)).is_some()
}

/// Remove the lock at `path` if the process that took it is gone.
///
/// Returns whether the lock was removed (or had already disappeared).
fn remove_abandoned_lock(path: &Path) -> Result<bool, SubstrateError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    let abandoned = match lock_owner(&contents) {
        Some(pid) => !process_alive(pid),
        // Owner not written yet, or the file was truncated.
        None => std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > UNOWNED_LOCK_AGE),
    };
    if !abandoned {
        return Ok(false);
    }

    // Only remove the file if it still holds what was inspected.
    if std::fs::read_to_string(path).ok().as_deref() != Some(contents.as_str()) {
        return Ok(false);
    }
    tracing::warn!(
        path = %path.display(),
        owner = contents.trim(),
        "Removing checkout lock left by a process that no longer exists"
    );
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

async fn run(mut cmd: Command, command: &str) -> Result<Output, SubstrateError> {
    cmd.stdin(Stdio::null());
    cmd.output().await.map_err(|source| SubstrateError::Spawn {
        command: format!("git {}", command),
        source,
    })
}

async fn capture(cmd: Command, command: &str) -> Result<String, SubstrateError> {
    let output = run(cmd, command).await?;
    check(&output, command)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn check(output: &Output, command: &str) -> Result<(), SubstrateError> {
    if output.status.success() {
        return Ok(());
    }
    Err(SubstrateError::CommandFailed {
        command: format!("git {}", command),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Escape `value` for git's value-regex arguments.
fn regex_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('^');
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('$');
    out
}

fn parse_ref_lines(text: &str, separator: char) -> Result<Vec<(String, ObjectId)>, SubstrateError> {
    let mut refs = Vec::new();
    for line in text.lines() {
        let Some((id, name)) = line.split_once(separator) else {
            continue;
        };
        if name.ends_with("^{}") {
            continue;
        }
        refs.push((name.trim().to_string(), ObjectId::parse(id)?));
    }
    Ok(refs)
}

#[async_trait]
impl Substrate for GitSubstrate {
    fn describe(&self) -> String {
        self.git_dir.display().to_string()
    }

    fn work_tree(&self) -> Option<PathBuf> {
        self.work_tree.clone()
    }

    async fn current_branch(&self) -> Result<Option<String>, SubstrateError> {
        let output = self.output(&["symbolic-ref", "--quiet", "HEAD"]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(head.strip_prefix("refs/heads/").map(str::to_string))
    }

    async fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, SubstrateError> {
        let output = self.output(&["rev-parse", "--verify", "--quiet", name]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(ObjectId::parse(&String::from_utf8_lossy(&output.stdout))?))
    }

    async fn resolve_revision(&self, revision: &str) -> Result<CommitId, SubstrateError> {
        let spec = format!("{}^{{commit}}", revision);
        let output = self.output(&["rev-parse", "--verify", "--quiet", &spec]).await?;
        if !output.status.success() {
            return Err(SubstrateError::UnknownRevision(revision.to_string()));
        }
        ObjectId::parse(&String::from_utf8_lossy(&output.stdout))
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>, SubstrateError> {
        let text = self
            .stdout(&["for-each-ref", "--format=%(objectname) %(refname)"])
            .await?;
        let mut refs = parse_ref_lines(&text, ' ')?;
        refs.retain(|(name, _)| name.starts_with(prefix));
        refs.sort();
        Ok(refs)
    }

    async fn update_refs(&self, updates: &[RefUpdate]) -> Result<(), SubstrateError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut script = String::from("start\n");
        for update in updates {
            let line = match (&update.old, &update.new) {
                (Some(old), Some(new)) => format!("update {} {} {}\n", update.name, new, old),
                (None, Some(new)) => format!("create {} {}\n", update.name, new),
                (Some(old), None) => format!("delete {} {}\n", update.name, old),
                (None, None) => format!("verify {}\n", update.name),
            };
            script.push_str(&line);
        }
        script.push_str("prepare\ncommit\n");

        let output = self
            .output_with_input(&["update-ref", "--stdin"], script.as_bytes())
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        let conflicted = updates
            .iter()
            .find(|u| stderr.contains(&u.name))
            .map(|u| u.name.clone());
        match conflicted {
            Some(name) => Err(SubstrateError::RefConflict { name }),
            None => Err(SubstrateError::CommandFailed {
                command: "git update-ref --stdin".into(),
                status: output.status.to_string(),
                stderr,
            }),
        }
    }

    async fn create_commit(
        &self,
        branch: &str,
        message: &str,
        hook: &dyn CommitHook,
    ) -> Result<CommitId, SubstrateError> {
        let branch_ref = branch_ref(branch);
        let parent = self.resolve_ref(&branch_ref).await?;
        let on_head = self.current_branch().await?.as_deref() == Some(branch);

        let tree = if on_head && self.work_tree.is_some() {
            self.stdout(&["write-tree"]).await?.trim().to_string()
        } else if let Some(parent) = &parent {
            self.stdout(&["rev-parse", &format!("{}^{{tree}}", parent)])
                .await?
                .trim()
                .to_string()
        } else {
            self.empty_tree().await?
        };

        let mut args = vec!["commit-tree".to_string(), tree];
        if let Some(parent) = &parent {
            args.push("-p".into());
            args.push(parent.to_string());
        }
        args.push("-m".into());
        args.push(message.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let commit = ObjectId::parse(&self.stdout(&args).await?)?;

        self.update_refs(&[RefUpdate {
            name: branch_ref.clone(),
            old: parent.clone(),
            new: Some(commit.clone()),
        }])
        .await?;
        tracing::debug!(branch = %branch, commit = %commit, "Created commit");

        finish_commit(self, &branch_ref, parent, commit, hook).await
    }

    async fn fast_forward(&self, branch: &str, target: &CommitId) -> Result<(), SubstrateError> {
        let name = branch_ref(branch);
        let current = self.resolve_ref(&name).await?;
        if current.as_ref() == Some(target) {
            return Ok(());
        }
        if let Some(current) = &current {
            if !self.is_ancestor(current, target).await? {
                return Err(SubstrateError::NonFastForward { name });
            }
        }

        let on_head = self.current_branch().await?.as_deref() == Some(branch);
        if on_head && self.work_tree.is_some() {
            let output = self
                .output(&["merge", "--ff-only", "--quiet", target.as_str()])
                .await?;
            return check(&output, "merge --ff-only");
        }
        self.update_refs(&[RefUpdate {
            name,
            old: current,
            new: Some(target.clone()),
        }])
        .await
    }

    async fn commits_between(
        &self,
        tip: &CommitId,
        exclude: &[ObjectId],
    ) -> Result<Vec<CommitId>, SubstrateError> {
        let mut input = format!("{}\n", tip);
        for id in exclude {
            input.push_str(&format!("^{}\n", id));
        }
        let output = self
            .output_with_input(&["rev-list", "--topo-order", "--stdin"], input.as_bytes())
            .await?;
        check(&output, "rev-list --topo-order --stdin")?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ObjectId::parse)
            .collect()
    }

    async fn is_ancestor(
        &self,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool, SubstrateError> {
        let output = self
            .output(&[
                "merge-base",
                "--is-ancestor",
                ancestor.as_str(),
                descendant.as_str(),
            ])
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                check(&output, "merge-base --is-ancestor")?;
                Ok(false)
            }
        }
    }

    async fn read_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
    ) -> Result<Option<Vec<u8>>, SubstrateError> {
        let output = self
            .output(&["notes", "--ref", notes_ref, "show", commit.as_str()])
            .await?;
        if output.status.success() {
            return Ok(Some(output.stdout));
        }
        if stderr_of(&output).contains("no note found") {
            return Ok(None);
        }
        check(&output, "notes show")?;
        Ok(None)
    }

    async fn write_note(
        &self,
        notes_ref: &str,
        commit: &CommitId,
        body: &[u8],
    ) -> Result<(), SubstrateError> {
        let args = ["notes", "--ref", notes_ref, "add", "-f", "-F", "-", commit.as_str()];
        let output = self.output_with_input(&args, body).await?;
        check(&output, "notes add")
    }

    async fn list_notes(&self, notes_ref: &str) -> Result<Vec<CommitId>, SubstrateError> {
        if self.resolve_ref(notes_ref).await?.is_none() {
            return Ok(Vec::new());
        }
        let text = self.stdout(&["notes", "--ref", notes_ref, "list"]).await?;
        text.lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(ObjectId::parse)
            .collect()
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        let output = self.output(&["config", "--get", key]).await?;
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            )),
            Some(1) => Ok(None),
            _ => {
                check(&output, "config --get")?;
                Ok(None)
            }
        }
    }

    async fn config_get_all(&self, key: &str) -> Result<Vec<String>, SubstrateError> {
        let output = self.output(&["config", "--get-all", key]).await?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect()),
            Some(1) => Ok(Vec::new()),
            _ => {
                check(&output, "config --get-all")?;
                Ok(Vec::new())
            }
        }
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.stdout(&["config", "--local", "--replace-all", key, value])
            .await
            .map(|_| ())
    }

    async fn config_add(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.stdout(&["config", "--local", "--add", key, value])
            .await
            .map(|_| ())
    }

    async fn config_unset(&self, key: &str) -> Result<(), SubstrateError> {
        let output = self.output(&["config", "--local", "--unset-all", key]).await?;
        // 5: no such key
        if output.status.success() || output.status.code() == Some(5) {
            return Ok(());
        }
        check(&output, "config --unset-all")
    }

    async fn config_unset_value(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        let pattern = regex_escape(value);
        let output = self
            .output(&["config", "--local", "--unset-all", key, &pattern])
            .await?;
        if output.status.success() || output.status.code() == Some(5) {
            return Ok(());
        }
        check(&output, "config --unset-all")
    }

    async fn config_list(&self, prefix: &str) -> Result<Vec<(String, String)>, SubstrateError> {
        let output = self.output(&["config", "--null", "--list"]).await?;
        check(&output, "config --list")?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .split('\0')
            .filter_map(|entry| {
                let (key, value) = entry.split_once('\n').unwrap_or((entry, ""));
                (!key.is_empty() && key.starts_with(prefix))
                    .then(|| (key.to_string(), value.to_string()))
            })
            .collect())
    }

    async fn read_hook(&self, name: &str) -> Result<Option<String>, SubstrateError> {
        match tokio::fs::read_to_string(self.hooks_dir.join(name)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn install_hook(&self, name: &str, body: &str) -> Result<(), SubstrateError> {
        tokio::fs::create_dir_all(&self.hooks_dir).await?;
        let path = self.hooks_dir.join(name);
        tokio::fs::write(&path, body).await?;
        set_mode(&path, 0o755).await
    }

    async fn remove_hook(&self, name: &str) -> Result<(), SubstrateError> {
        remove_if_exists(&self.hooks_dir.join(name)).await
    }

    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SubstrateError> {
        match tokio::fs::read(self.private_path(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_private(&self, name: &str, data: &[u8]) -> Result<(), SubstrateError> {
        let path = self.private_path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        set_mode(&tmp, 0o600).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_private(&self, name: &str) -> Result<(), SubstrateError> {
        remove_if_exists(&self.private_path(name)).await
    }

    async fn write_file(
        &self,
        path: &str,
        contents: &[u8],
        executable: bool,
    ) -> Result<(), SubstrateError> {
        let path = self.work_path(path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        if executable {
            set_mode(&path, 0o755).await?;
        }
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SubstrateError> {
        remove_if_exists(&self.work_path(path)?).await
    }

    async fn fetch(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError> {
        let specs: Vec<String> = refspecs.iter().map(Refspec::to_string).collect();
        // FETCH_HEAD belongs to the git command that may be running us.
        let mut args = vec!["fetch", "--quiet", "--no-tags", "--no-write-fetch-head", url];
        args.extend(specs.iter().map(String::as_str));
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(SubstrateError::Transport {
            url: url.to_string(),
            message: stderr_of(&output),
        })
    }

    async fn push(&self, url: &str, refspecs: &[Refspec]) -> Result<(), SubstrateError> {
        let specs: Vec<String> = refspecs.iter().map(Refspec::to_string).collect();
        let mut args = vec!["push", "--quiet", "--porcelain", url];
        args.extend(specs.iter().map(String::as_str));
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }

        // Porcelain lines: "<flag>\t<src>:<dst>\t<summary>", '!' for rejected.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(line) = stdout.lines().find(|line| line.starts_with('!')) {
            let name = line
                .split('\t')
                .nth(1)
                .and_then(|spec| spec.split(':').nth(1))
                .unwrap_or_default()
                .to_string();
            return Err(SubstrateError::NonFastForward { name });
        }
        Err(SubstrateError::Transport {
            url: url.to_string(),
            message: stderr_of(&output),
        })
    }

    async fn list_remote_refs(
        &self,
        url: &str,
    ) -> Result<Vec<(String, ObjectId)>, SubstrateError> {
        let output = self.output(&["ls-remote", url]).await?;
        if !output.status.success() {
            return Err(SubstrateError::Transport {
                url: url.to_string(),
                message: stderr_of(&output),
            });
        }
        parse_ref_lines(&String::from_utf8_lossy(&output.stdout), '\t')
    }

    async fn lock(&self) -> Result<CheckoutLock, SubstrateError> {
        loop {
            if let Some(lock) = self.try_create_lock()? {
                return Ok(lock);
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    async fn try_lock(&self) -> Result<Option<CheckoutLock>, SubstrateError> {
        self.try_create_lock()
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), SubstrateError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), SubstrateError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), SubstrateError> {
    Ok(())
}
