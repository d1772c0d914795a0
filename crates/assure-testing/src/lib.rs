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

//! # Assure Testing
//!
//! An in-memory version-control substrate for exercising the signing and
//! verification engine without git. A [`MemoryNetwork`] holds any number of
//! [`MemoryRepo`] checkouts addressed by url; they fetch from and push to each
//! other with refspecs, keep notes as a chain of snapshots and serialize
//! synchronizations with an async checkout lock.
//!
//! ```rust,ignore
//! use assure_testing::MemoryNetwork;
//!
//! let network = MemoryNetwork::new();
//! let upstream = network.init_bare("mem://upstream");
//! let publisher = network.clone_repo("mem://upstream", "mem://publisher")?;
//! publisher.commit("initial").await?;
//! ```
//!
//! Urls containing `::` are refused like git refuses a remote helper it
//! cannot find, so tests route proxied remotes through the verification
//! proxy exactly as real checkouts do.

mod network;
mod repo;

pub use network::MemoryNetwork;
pub use repo::{MemoryRepo, Operation};
