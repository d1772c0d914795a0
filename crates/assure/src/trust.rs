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

//! Trust binding store: which key a checkout trusts for a remote branch.
//!
//! Bindings live in the checkout's local configuration as
//! `assure.<remote>/<branch>.verifykey = vk0-…`.

use crate::keys::{KeyError, VerifyKey};
use crate::substrate::{Substrate, SubstrateError};
use std::fmt;
use thiserror::Error;

const SECTION: &str = "assure.";
const VARIABLE: &str = ".verifykey";

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("No trust binding for branch '{branch}' of remote '{remote}'")]
    UnknownBinding { remote: String, branch: String },

    #[error("Trust binding {key} holds an invalid verify key: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: KeyError,
    },

    #[error("Invalid {what} name {name:?}")]
    InvalidName { what: &'static str, name: String },

    #[error("Trust store error: {0}")]
    Storage(#[from] SubstrateError),
}

/// A (remote, branch) pair and the key trusted to sign its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustBinding {
    pub remote: String,
    pub branch: String,
    pub verify_key: VerifyKey,
}

impl TrustBinding {
    pub fn new(
        remote: impl Into<String>,
        branch: impl Into<String>,
        verify_key: VerifyKey,
    ) -> Result<Self, TrustError> {
        let remote = remote.into();
        let branch = branch.into();
        validate_name("remote", &remote, false)?;
        validate_name("branch", &branch, true)?;
        Ok(Self {
            remote,
            branch,
            verify_key,
        })
    }

    /// Config key this binding is stored under.
    pub fn config_key(&self) -> String {
        config_key(&self.remote, &self.branch)
    }
}

impl fmt::Display for TrustBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.remote, self.branch, self.verify_key)
    }
}

pub(crate) fn validate_name(what: &'static str, name: &str, allow_slash: bool) -> Result<(), TrustError> {
    let bad = name.is_empty()
        || name.starts_with('-')
        || name.chars().any(|c| c.is_whitespace() || c.is_control())
        || (!allow_slash && name.contains('/'));
    if bad {
        return Err(TrustError::InvalidName {
            what,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn config_key(remote: &str, branch: &str) -> String {
    format!("{}{}/{}{}", SECTION, remote, branch, VARIABLE)
}

/// Split `assure.<remote>/<branch>.verifykey` back into its parts.
fn parse_config_key(key: &str) -> Option<(&str, &str)> {
    let subsection = key.strip_prefix(SECTION)?.strip_suffix(VARIABLE)?;
    let (remote, branch) = subsection.split_once('/')?;
    (!remote.is_empty() && !branch.is_empty()).then_some((remote, branch))
}

/// Reads and writes trust bindings of one checkout.
pub struct TrustStore<'a> {
    substrate: &'a dyn Substrate,
}

impl<'a> TrustStore<'a> {
    pub fn new(substrate: &'a dyn Substrate) -> Self {
        Self { substrate }
    }

    pub async fn get(&self, remote: &str, branch: &str) -> Result<Option<TrustBinding>, TrustError> {
        let key = config_key(remote, branch);
        let Some(value) = self.substrate.config_get(&key).await? else {
            return Ok(None);
        };
        let verify_key =
            VerifyKey::parse(&value).map_err(|source| TrustError::InvalidKey { key, source })?;
        Ok(Some(TrustBinding {
            remote: remote.to_string(),
            branch: branch.to_string(),
            verify_key,
        }))
    }

    /// Like [`get`](Self::get), but a missing binding is an error.
    pub async fn require(&self, remote: &str, branch: &str) -> Result<TrustBinding, TrustError> {
        self.get(remote, branch)
            .await?
            .ok_or_else(|| TrustError::UnknownBinding {
                remote: remote.to_string(),
                branch: branch.to_string(),
            })
    }

    /// Record `binding`, returning the key it replaced, if any.
    pub async fn record(&self, binding: &TrustBinding) -> Result<Option<VerifyKey>, TrustError> {
        let previous = match self.get(&binding.remote, &binding.branch).await {
            Ok(previous) => previous.map(|b| b.verify_key),
            // An unreadable old value is simply overwritten.
            Err(TrustError::InvalidKey { .. }) => None,
            Err(e) => return Err(e),
        };
        self.substrate
            .config_set(&binding.config_key(), &binding.verify_key.to_string())
            .await?;
        Ok(previous)
    }

    pub async fn remove(&self, remote: &str, branch: &str) -> Result<(), TrustError> {
        self.substrate.config_unset(&config_key(remote, branch)).await?;
        Ok(())
    }

    /// Raw `(config key, remote, branch, parsed key)` entries.
    async fn entries(
        &self,
    ) -> Result<Vec<(String, String, String, Result<VerifyKey, KeyError>)>, TrustError> {
        let mut entries = Vec::new();
        for (key, value) in self.substrate.config_list(SECTION).await? {
            let Some((remote, branch)) = parse_config_key(&key) else {
                continue;
            };
            let (remote, branch) = (remote.to_string(), branch.to_string());
            entries.push((key, remote, branch, VerifyKey::parse(&value)));
        }
        Ok(entries)
    }

    /// Every binding in the checkout, skipping unreadable entries.
    ///
    /// For display only; anything that enforces bindings must use
    /// [`for_remote`](Self::for_remote).
    pub async fn list(&self) -> Result<Vec<TrustBinding>, TrustError> {
        let mut bindings = Vec::new();
        for (key, remote, branch, parsed) in self.entries().await? {
            match parsed {
                Ok(verify_key) => bindings.push(TrustBinding {
                    remote,
                    branch,
                    verify_key,
                }),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring unreadable trust binding");
                }
            }
        }
        Ok(bindings)
    }

    /// Bindings that apply to branches of `remote`.
    ///
    /// An unreadable binding for `remote` is an error: the branch it names
    /// must not be treated as unbound.
    pub async fn for_remote(&self, remote: &str) -> Result<Vec<TrustBinding>, TrustError> {
        let mut bindings = Vec::new();
        for (key, entry_remote, branch, parsed) in self.entries().await? {
            if entry_remote != remote {
                continue;
            }
            let verify_key = parsed.map_err(|source| TrustError::InvalidKey { key, source })?;
            bindings.push(TrustBinding {
                remote: entry_remote,
                branch,
                verify_key,
            });
        }
        Ok(bindings)
    }
}
