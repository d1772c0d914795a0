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

//! Parallel per-commit verification.

use crate::keys::VerifyKey;
use crate::signature::{check_note, VerificationResult};
use crate::substrate::{CommitId, Substrate, SubstrateError};
use futures::future::join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One commit to check against one trusted key.
#[derive(Debug, Clone)]
pub(crate) struct VerifyJob {
    pub commit: CommitId,
    pub verify_key: VerifyKey,
}

/// Where to look for a commit's signature, in order.
pub(crate) struct NoteSources<'a> {
    pub incoming: Option<&'a str>,
    pub local: &'a str,
}

impl NoteSources<'_> {
    async fn read(
        &self,
        substrate: &dyn Substrate,
        commit: &CommitId,
    ) -> Result<Option<Vec<u8>>, SubstrateError> {
        if let Some(incoming) = self.incoming {
            if let Some(note) = substrate.read_note(incoming, commit).await? {
                return Ok(Some(note));
            }
        }
        substrate.read_note(self.local, commit).await
    }
}

/// Verify every job, at most `workers` at a time.
///
/// Notes are read through the substrate; the signature checks run on
/// blocking workers. Results come back in job order.
pub(crate) async fn verify_all(
    substrate: &dyn Substrate,
    sources: &NoteSources<'_>,
    jobs: Vec<VerifyJob>,
    workers: usize,
) -> Result<Vec<(VerifyJob, VerificationResult)>, SubstrateError> {
    let workers = workers.max(1);

    let with_notes: Vec<(VerifyJob, Option<Vec<u8>>)> = stream::iter(jobs)
        .map(|job| async move {
            let note = sources.read(substrate, &job.commit).await?;
            Ok::<_, SubstrateError>((job, note))
        })
        .buffered(workers)
        .try_collect()
        .await?;

    let permits = Arc::new(Semaphore::new(workers));
    let checks = with_notes.into_iter().map(|(job, note)| {
        let permits = permits.clone();
        async move {
            let _permit = permits.acquire_owned().await;
            let key = job.verify_key.clone();
            let commit = job.commit.clone();
            // A verifier that panics counts as a failed check.
            let result =
                tokio::task::spawn_blocking(move || check_note(&key, &commit, note.as_deref()))
                    .await
                    .unwrap_or_else(|e| {
                        VerificationResult::Invalid(format!("verifier failed: {}", e))
                    });
            (job, result)
        }
    });
    let results = join_all(checks).await;

    Ok(results)
}
