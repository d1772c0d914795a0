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

//! Per-attempt quarantine namespace for incoming refs.
//!
//! Incoming branches and notes are fetched under refs that belong to one
//! synchronization attempt. Nothing outside the quarantine moves until the
//! attempt is accepted, and the quarantine is emptied whatever the outcome.

use crate::refspec::Refspec;
use crate::substrate::{ObjectId, RefUpdate, Substrate, SubstrateError};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) const INCOMING_PREFIX: &str = "refs/assure/incoming/";
pub(crate) const INCOMING_NOTES_PREFIX: &str = "refs/notes/assure-incoming/";

pub(crate) struct Quarantine {
    id: Uuid,
}

impl Quarantine {
    pub(crate) fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub(crate) fn heads_prefix(&self) -> String {
        format!("{}{}/heads/", INCOMING_PREFIX, self.id)
    }

    pub(crate) fn notes_ref(&self) -> String {
        format!("{}{}", INCOMING_NOTES_PREFIX, self.id)
    }

    /// Refspecs that land the remote's branches (and notes, when the remote
    /// has them) in this quarantine.
    pub(crate) fn fetch_refspecs(&self, notes_ref: Option<&str>) -> Vec<Refspec> {
        let mut refspecs = vec![Refspec::new(
            "refs/heads/*",
            format!("{}*", self.heads_prefix()),
            true,
        )];
        if let Some(notes_ref) = notes_ref {
            refspecs.push(Refspec::new(notes_ref, self.notes_ref(), true));
        }
        refspecs
    }

    /// Branch name to tip of everything fetched into the quarantine.
    pub(crate) async fn incoming_heads(
        &self,
        substrate: &dyn Substrate,
    ) -> Result<BTreeMap<String, ObjectId>, SubstrateError> {
        let prefix = self.heads_prefix();
        Ok(substrate
            .list_refs(&prefix)
            .await?
            .into_iter()
            .filter_map(|(name, id)| {
                name.strip_prefix(&prefix)
                    .map(|branch| (branch.to_string(), id))
            })
            .collect())
    }

    /// Delete this attempt's refs.
    pub(crate) async fn clear(&self, substrate: &dyn Substrate) -> Result<(), SubstrateError> {
        let mut refs = substrate.list_refs(&self.heads_prefix()).await?;
        if let Some(notes) = substrate.resolve_ref(&self.notes_ref()).await? {
            refs.push((self.notes_ref(), notes));
        }
        delete_refs(substrate, refs).await
    }
}

/// Delete quarantine refs left behind by an attempt that never finished.
pub(crate) async fn clear_stale(substrate: &dyn Substrate) -> Result<usize, SubstrateError> {
    let mut refs = substrate.list_refs(INCOMING_PREFIX).await?;
    refs.extend(substrate.list_refs(INCOMING_NOTES_PREFIX).await?);
    let count = refs.len();
    if count > 0 {
        tracing::info!(refs = count, "Clearing quarantine refs from an aborted synchronization");
    }
    delete_refs(substrate, refs).await?;
    Ok(count)
}

async fn delete_refs(
    substrate: &dyn Substrate,
    refs: Vec<(String, ObjectId)>,
) -> Result<(), SubstrateError> {
    let updates: Vec<RefUpdate> = refs
        .into_iter()
        .map(|(name, id)| RefUpdate::delete(name, id))
        .collect();
    substrate.update_refs(&updates).await
}
