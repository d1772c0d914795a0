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

//! Undo log for multi-step setup.
//!
//! Each mutating setup step records how to restore what it touched. On
//! failure the log is replayed in reverse so the checkout ends up exactly
//! as it was before setup started.

use crate::audit;
use crate::refspec::{remove_refspecs, Refspec};
use crate::substrate::{Substrate, SubstrateError};

enum Undo {
    Config { key: String, values: Vec<String> },
    Refspecs { key: String, added: Vec<Refspec> },
    Hook { name: String, body: Option<String> },
    Private { name: String, data: Option<Vec<u8>> },
    File { path: String },
}

pub(crate) struct SetupTransaction<'a> {
    substrate: &'a dyn Substrate,
    undo: Vec<Undo>,
    step: &'static str,
}

impl<'a> SetupTransaction<'a> {
    pub(crate) fn new(substrate: &'a dyn Substrate) -> Self {
        Self {
            substrate,
            undo: Vec::new(),
            step: "start",
        }
    }

    /// Name the step about to run, for the rollback report.
    pub(crate) fn step(&mut self, step: &'static str) {
        tracing::debug!(step = step, "Setup step");
        self.step = step;
    }

    /// Remember every current value of `key` before it is changed.
    pub(crate) async fn snapshot_config(&mut self, key: &str) -> Result<(), SubstrateError> {
        let values = self.substrate.config_get_all(key).await?;
        self.undo.push(Undo::Config {
            key: key.to_string(),
            values,
        });
        Ok(())
    }

    pub(crate) fn added_refspecs(&mut self, key: &str, added: Vec<Refspec>) {
        if !added.is_empty() {
            self.undo.push(Undo::Refspecs {
                key: key.to_string(),
                added,
            });
        }
    }

    pub(crate) async fn snapshot_hook(&mut self, name: &str) -> Result<Option<String>, SubstrateError> {
        let body = self.substrate.read_hook(name).await?;
        self.undo.push(Undo::Hook {
            name: name.to_string(),
            body: body.clone(),
        });
        Ok(body)
    }

    pub(crate) async fn snapshot_private(&mut self, name: &str) -> Result<(), SubstrateError> {
        let data = self.substrate.read_private(name).await?;
        self.undo.push(Undo::Private {
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    pub(crate) fn created_file(&mut self, path: &str) {
        self.undo.push(Undo::File {
            path: path.to_string(),
        });
    }

    /// Keep every change.
    pub(crate) fn commit(mut self) {
        self.undo.clear();
    }

    /// Undo every recorded change, newest first.
    ///
    /// Undo failures are logged and do not stop the remaining steps.
    pub(crate) async fn rollback(mut self, error: &str) {
        audit::log_setup_rolled_back(&self.substrate.describe(), self.step, error);
        while let Some(action) = self.undo.pop() {
            if let Err(e) = self.apply(&action).await {
                tracing::error!(error = %e, "Failed to undo setup step");
            }
        }
    }

    async fn apply(&self, action: &Undo) -> Result<(), SubstrateError> {
        let substrate = self.substrate;
        match action {
            Undo::Config { key, values } => {
                substrate.config_unset(key).await?;
                for value in values {
                    substrate.config_add(key, value).await?;
                }
            }
            Undo::Refspecs { key, added } => remove_refspecs(substrate, key, added).await?,
            Undo::Hook { name, body } => match body {
                Some(body) => substrate.install_hook(name, body).await?,
                None => substrate.remove_hook(name).await?,
            },
            Undo::Private { name, data } => match data {
                Some(data) => substrate.write_private(name, data).await?,
                None => substrate.remove_private(name).await?,
            },
            Undo::File { path } => substrate.remove_file(path).await?,
        }
        Ok(())
    }
}

impl Drop for SetupTransaction<'_> {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::error!(
                step = self.step,
                pending = self.undo.len(),
                "Setup abandoned without commit or rollback"
            );
        }
    }
}
