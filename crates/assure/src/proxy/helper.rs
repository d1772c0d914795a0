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

//! Git remote-helper protocol front end for the verification proxy.
//!
//! Git runs `git-remote-assure <remote> <url>` for remotes whose url starts
//! with `assure::` and talks to it over stdin/stdout. Fetch batches are
//! verified before git is told they succeeded; a rejected batch ends the
//! session with an error so git updates no refs.

use super::{upstream_url, ProxyOptions, Rejection, SyncError, SyncMode, SyncOutcome, VerificationProxy};
use crate::refspec::Refspec;
use crate::substrate::{ObjectId, Substrate, SubstrateError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("Remote helper I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected remote helper command: {0:?}")]
    Protocol(String),

    #[error("{0}")]
    Rejected(Rejection),

    #[error(
        "Remote branch {name} moved to {actual} while fetching (expected {expected}); retry the fetch"
    )]
    Stale {
        name: String,
        expected: ObjectId,
        actual: String,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Capabilities,
    Option { name: String, value: String },
    List { for_push: bool },
    Fetch { id: ObjectId, name: String },
    Push(Refspec),
    End,
}

fn parse_command(line: &str) -> Result<Command, HelperError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let protocol = || HelperError::Protocol(line.to_string());
    if line.is_empty() {
        return Ok(Command::End);
    }
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "capabilities" => Ok(Command::Capabilities),
        "list" => match rest {
            "" => Ok(Command::List { for_push: false }),
            "for-push" => Ok(Command::List { for_push: true }),
            _ => Err(protocol()),
        },
        "option" => {
            let (name, value) = rest.split_once(' ').ok_or_else(protocol)?;
            Ok(Command::Option {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        "fetch" => {
            let (id, name) = rest.split_once(' ').ok_or_else(protocol)?;
            Ok(Command::Fetch {
                id: ObjectId::parse(id)?,
                name: name.to_string(),
            })
        }
        "push" => rest.parse::<Refspec>().map(Command::Push).map_err(|_| protocol()),
        _ => Err(protocol()),
    }
}

/// One remote-helper session for `remote`.
pub struct RemoteHelper<'a> {
    substrate: &'a dyn Substrate,
    proxy: VerificationProxy<'a>,
    remote: String,
    url: String,
}

impl<'a> RemoteHelper<'a> {
    /// `url` may carry the `assure::` prefix; it is stripped.
    pub fn new(
        substrate: &'a dyn Substrate,
        options: ProxyOptions,
        remote: impl Into<String>,
        url: &str,
    ) -> Self {
        Self {
            substrate,
            proxy: VerificationProxy::new(substrate, options),
            remote: remote.into(),
            url: upstream_url(url).to_string(),
        }
    }

    /// Serve commands from `input` until git closes the session.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<(), HelperError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            tracing::trace!(command = %line, "remote helper command");
            match parse_command(&line)? {
                Command::End => break,
                Command::Capabilities => {
                    output.write_all(b"fetch\noption\npush\n\n").await?;
                }
                Command::Option { name, value } => {
                    let reply = match name.as_str() {
                        "verbosity" | "progress" => "ok\n",
                        _ => "unsupported\n",
                    };
                    tracing::debug!(option = %name, value = %value, "remote helper option");
                    output.write_all(reply.as_bytes()).await?;
                }
                Command::List { for_push } => {
                    let listing = self.list(for_push).await?;
                    output.write_all(listing.as_bytes()).await?;
                }
                Command::Fetch { id, name } => {
                    let mut wanted = vec![(id, name)];
                    while let Some(line) = lines.next_line().await? {
                        match parse_command(&line)? {
                            Command::Fetch { id, name } => wanted.push((id, name)),
                            Command::End => break,
                            _ => return Err(HelperError::Protocol(line)),
                        }
                    }
                    self.fetch(&wanted).await?;
                    output.write_all(b"\n").await?;
                }
                Command::Push(refspec) => {
                    let mut refspecs = vec![refspec];
                    while let Some(line) = lines.next_line().await? {
                        match parse_command(&line)? {
                            Command::Push(refspec) => refspecs.push(refspec),
                            Command::End => break,
                            _ => return Err(HelperError::Protocol(line)),
                        }
                    }
                    let report = self.push(&refspecs).await;
                    output.write_all(report.as_bytes()).await?;
                }
            }
            output.flush().await?;
        }
        output.flush().await?;
        Ok(())
    }

    async fn list(&self, for_push: bool) -> Result<String, HelperError> {
        let notes_ref = &self.proxy.options().notes_ref;
        let refs = self
            .substrate
            .list_remote_refs(&self.url)
            .await
            .map_err(|source| SyncError::Transport {
                remote: self.remote.clone(),
                source,
            })?;
        let mut listing = String::new();
        for (name, id) in refs {
            let listed = name.starts_with("refs/heads/")
                || &name == notes_ref
                || (!for_push && name == "HEAD");
            if listed {
                listing.push_str(&format!("{} {}\n", id, name));
            }
        }
        listing.push('\n');
        Ok(listing)
    }

    /// Verify the remote and check git asked for exactly what was verified.
    async fn fetch(&self, wanted: &[(ObjectId, String)]) -> Result<(), HelperError> {
        let outcome = self
            .proxy
            .synchronize_url(&self.remote, &self.url, SyncMode::VerifyOnly)
            .await?;
        let acceptance = match outcome {
            SyncOutcome::Accepted(acceptance) => acceptance,
            SyncOutcome::Rejected(rejection) => return Err(HelperError::Rejected(rejection)),
        };

        for (id, name) in wanted {
            let Some(branch) = name.strip_prefix("refs/heads/") else {
                continue;
            };
            let Some(update) = acceptance.branches.iter().find(|u| u.branch == branch) else {
                continue;
            };
            if update.verified && &update.new != id {
                return Err(HelperError::Stale {
                    name: name.clone(),
                    expected: id.clone(),
                    actual: update.new.to_string(),
                });
            }
        }
        tracing::info!(
            remote = %self.remote,
            verified = acceptance.verified_commits,
            "Fetch verified"
        );
        Ok(())
    }

    /// Forward each refspec and report per-ref status lines.
    async fn push(&self, refspecs: &[Refspec]) -> String {
        let mut report = String::new();
        for refspec in refspecs {
            match self.substrate.push(&self.url, std::slice::from_ref(refspec)).await {
                Ok(()) => report.push_str(&format!("ok {}\n", refspec.dst)),
                Err(SubstrateError::NonFastForward { .. }) => {
                    report.push_str(&format!("error {} non-fast-forward\n", refspec.dst))
                }
                Err(e) => {
                    let message = e.to_string().replace('\n', " ");
                    report.push_str(&format!("error {} {}\n", refspec.dst, message))
                }
            }
        }
        report.push('\n');
        report
    }
}
