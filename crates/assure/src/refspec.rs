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

//! Refspec handling and the notes/refspec configurator.
//!
//! Signatures travel in a notes ref that git does not transfer by default.
//! Publishers add it to their push refspecs and downstream checkouts add it
//! to their fetch refspecs; an unconfigured clone never sees it.

use crate::substrate::{Substrate, SubstrateError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Notes ref holding commit signatures unless configured otherwise.
pub const DEFAULT_NOTES_REF: &str = "refs/notes/assure";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefspecError {
    #[error("Refspec {0:?} is missing ':'")]
    MissingSeparator(String),

    #[error("Refspec {0:?} has an empty side")]
    EmptySide(String),

    #[error("Refspec {0:?} must use '*' on both sides or neither")]
    UnbalancedGlob(String),

    #[error("Refspec {0:?} has more than one '*' on a side")]
    MultipleGlobs(String),
}

/// A parsed `[+]<src>:<dst>` refspec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub src: String,
    pub dst: String,
}

impl Refspec {
    pub fn new(src: impl Into<String>, dst: impl Into<String>, force: bool) -> Self {
        Self {
            force,
            src: src.into(),
            dst: dst.into(),
        }
    }

    pub fn is_glob(&self) -> bool {
        self.src.contains('*')
    }

    /// Map a source ref name to its destination, if this refspec covers it.
    pub fn map(&self, name: &str) -> Option<String> {
        match self.src.split_once('*') {
            None => (self.src == name).then(|| self.dst.clone()),
            Some((prefix, suffix)) => {
                let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
                if middle.is_empty() {
                    return None;
                }
                Some(self.dst.replacen('*', middle, 1))
            }
        }
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            f.write_str("+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

impl FromStr for Refspec {
    type Err = RefspecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (force, body) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (src, dst) = body
            .split_once(':')
            .ok_or_else(|| RefspecError::MissingSeparator(s.to_string()))?;
        if src.is_empty() || dst.is_empty() {
            return Err(RefspecError::EmptySide(s.to_string()));
        }
        let src_globs = src.matches('*').count();
        let dst_globs = dst.matches('*').count();
        if src_globs > 1 || dst_globs > 1 {
            return Err(RefspecError::MultipleGlobs(s.to_string()));
        }
        if src_globs != dst_globs {
            return Err(RefspecError::UnbalancedGlob(s.to_string()));
        }
        Ok(Self::new(src, dst, force))
    }
}

/// Refspecs a publisher pushes: the signed branch plus the signature notes.
pub fn publisher_push_refspecs(branch: &str, notes_ref: &str) -> Vec<Refspec> {
    vec![
        Refspec::new(
            format!("refs/heads/{}", branch),
            format!("refs/heads/{}", branch),
            false,
        ),
        Refspec::new(notes_ref, notes_ref, false),
    ]
}

/// Refspec a downstream checkout adds so fetches include signatures.
pub fn downstream_fetch_refspec(notes_ref: &str) -> Refspec {
    Refspec::new(notes_ref, notes_ref, true)
}

/// Add each refspec to the multi-valued config `key` unless already present.
///
/// Returns the refspecs that were actually added, which is exactly what a
/// rollback has to remove.
pub async fn ensure_refspecs(
    substrate: &dyn Substrate,
    key: &str,
    refspecs: &[Refspec],
) -> Result<Vec<Refspec>, SubstrateError> {
    let existing = substrate.config_get_all(key).await?;
    let mut added = Vec::new();
    for refspec in refspecs {
        let text = refspec.to_string();
        if existing.iter().any(|value| value.trim() == text) {
            continue;
        }
        substrate.config_add(key, &text).await?;
        added.push(refspec.clone());
    }
    Ok(added)
}

/// Remove refspecs previously added with [`ensure_refspecs`].
pub async fn remove_refspecs(
    substrate: &dyn Substrate,
    key: &str,
    refspecs: &[Refspec],
) -> Result<(), SubstrateError> {
    for refspec in refspecs {
        substrate
            .config_unset_value(key, &refspec.to_string())
            .await?;
    }
    Ok(())
}

/// Configure `remote` so pushes carry `branch` and its signatures.
pub async fn configure_push(
    substrate: &dyn Substrate,
    remote: &str,
    branch: &str,
    notes_ref: &str,
) -> Result<Vec<Refspec>, SubstrateError> {
    let key = format!("remote.{}.push", remote);
    let added = ensure_refspecs(
        substrate,
        &key,
        &publisher_push_refspecs(branch, notes_ref),
    )
    .await?;
    tracing::debug!(remote = %remote, branch = %branch, added = added.len(), "Configured push refspecs");
    Ok(added)
}

/// Configure `remote` so fetches include the signature notes.
pub async fn configure_fetch(
    substrate: &dyn Substrate,
    remote: &str,
    notes_ref: &str,
) -> Result<Vec<Refspec>, SubstrateError> {
    let key = format!("remote.{}.fetch", remote);
    let added = ensure_refspecs(substrate, &key, &[downstream_fetch_refspec(notes_ref)]).await?;
    tracing::debug!(remote = %remote, added = added.len(), "Configured fetch refspecs");
    Ok(added)
}

/// Parse every value of a multi-valued refspec key, skipping unparseable ones.
async fn configured_refspecs(
    substrate: &dyn Substrate,
    key: &str,
) -> Result<Vec<Refspec>, SubstrateError> {
    Ok(substrate
        .config_get_all(key)
        .await?
        .iter()
        .filter_map(|value| match value.parse::<Refspec>() {
            Ok(refspec) => Some(refspec),
            Err(e) => {
                tracing::warn!(key = %key, value = %value, error = %e, "Ignoring unparseable refspec");
                None
            }
        })
        .collect())
}

/// Refspecs used when pushing `branch` to `remote`.
///
/// Configured `remote.<name>.push` values win; otherwise the branch is
/// pushed to the same name, without signatures.
pub async fn push_refspecs_for(
    substrate: &dyn Substrate,
    remote: &str,
    branch: &str,
) -> Result<Vec<Refspec>, SubstrateError> {
    let configured = configured_refspecs(substrate, &format!("remote.{}.push", remote)).await?;
    if !configured.is_empty() {
        return Ok(configured);
    }
    let name = format!("refs/heads/{}", branch);
    Ok(vec![Refspec::new(name.clone(), name, false)])
}

/// Refspecs used when fetching from `remote`.
pub async fn fetch_refspecs_for(
    substrate: &dyn Substrate,
    remote: &str,
) -> Result<Vec<Refspec>, SubstrateError> {
    let configured = configured_refspecs(substrate, &format!("remote.{}.fetch", remote)).await?;
    if !configured.is_empty() {
        return Ok(configured);
    }
    Ok(vec![Refspec::new(
        "refs/heads/*",
        format!("refs/remotes/{}/*", remote),
        true,
    )])
}
