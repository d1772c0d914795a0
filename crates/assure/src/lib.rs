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

//! # Assure
//!
//! Cryptographic authenticity for git history. A publisher signs every
//! commit on a branch with an Ed25519 key; signatures travel as git notes
//! under `refs/notes/assure`; downstream checkouts bind the branch to the
//! publisher's verify key and refuse, as a whole, any synchronization that
//! would bring in a commit without a valid signature.
//!
//! ## Key Features
//!
//! - Key issuance with human-transcribable `vk0-…` verify keys
//! - A flat, versioned signature record stored in notes
//! - Per-checkout trust bindings from (remote, branch) to a verify key
//! - Transactional publisher and downstream setup with rollback
//! - A verification proxy that quarantines incoming history and applies it
//!   atomically only when every commit verifies
//! - A git remote helper front end for `assure::` remotes
//!
//! Every version-control operation goes through the [`Substrate`] trait.
//! [`GitSubstrate`] drives the git CLI; the `assure-testing` crate provides
//! an in-memory implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use assure::{GitOptions, GitSubstrate, ProxyOptions, SyncOutcome, VerificationProxy};
//!
//! let checkout = GitSubstrate::open(GitOptions::in_dir("/src/project")).await?;
//! let proxy = VerificationProxy::new(&checkout, ProxyOptions::from(&config));
//! match proxy.synchronize("origin").await? {
//!     SyncOutcome::Accepted(accepted) => println!("{} commits verified", accepted.verified_commits),
//!     SyncOutcome::Rejected(rejection) => eprintln!("{}", rejection),
//! }
//! ```

pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod proxy;
pub mod refspec;
pub mod setup;
pub mod signature;
pub mod signer;
pub mod substrate;
pub mod trust;

pub use config::{AssureConfig, ConfigError, ConfigLoader};
pub use error::{AssureError, ErrorKind};
pub use keys::{KeyError, KeyPair, KeyStore, VerifyKey};
pub use proxy::{
    proxied_url, upstream_url, Acceptance, BranchUpdate, CommitFailure, FailureReason,
    HelperError, ProxyOptions, PullOutcome, Rejection, RemoteHelper, SyncError, SyncMode,
    SyncOutcome, VerificationProxy, PROXY_URL_PREFIX,
};
pub use refspec::{Refspec, DEFAULT_NOTES_REF};
pub use setup::{
    setup_downstream, setup_publisher, DownstreamArtifact, DownstreamOptions, DownstreamReport,
    PublisherOptions, PublisherReport, SetupError, HELPER_NAME, TOOL_NAME,
};
pub use signature::{CodecError, CommitSignature, VerificationResult};
pub use signer::{CommitSigner, SignOutcome, SignerError};
pub use substrate::{
    CheckoutLock, CommitHook, CommitId, GitOptions, GitSubstrate, NoHook, ObjectId, RefUpdate,
    Substrate, SubstrateError,
};
pub use trust::{TrustBinding, TrustError, TrustStore};
