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

//! Tool configuration.
//!
//! Configuration is optional: every field has a default, and a missing file
//! simply yields [`AssureConfig::default`]. Files are TOML.

use crate::refspec::DEFAULT_NOTES_REF;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "GIT_ASSURE_CONFIG";

/// Default name of the generated downstream artifact.
pub const DEFAULT_ARTIFACT_NAME: &str = "setup-assure";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid notes ref: {notes_ref} (must be under refs/notes/)")]
    InvalidNotesRef { notes_ref: String },

    #[error("Invalid verify_workers: {workers} (must be at least 1)")]
    InvalidWorkers { workers: usize },

    #[error("Invalid {name}: {timeout} (must be positive)")]
    InvalidTimeout { name: &'static str, timeout: u64 },

    #[error("Invalid artifact name: {name:?}")]
    InvalidArtifactName { name: String },

    #[error("Multiple validation errors: {errors:?}")]
    Multiple { errors: Vec<ValidationError> },
}

/// Settings shared by the CLI, the remote helper and the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssureConfig {
    /// Notes ref carrying commit signatures.
    pub notes_ref: String,
    /// Upper bound on signatures verified in parallel.
    pub verify_workers: usize,
    /// Deadline for one synchronization attempt.
    pub sync_timeout_secs: u64,
    /// How long a synchronization waits for the checkout lock.
    pub lock_wait_secs: u64,
    pub git_binary: PathBuf,
    pub artifact_name: String,
}

impl Default for AssureConfig {
    fn default() -> Self {
        Self {
            notes_ref: DEFAULT_NOTES_REF.to_string(),
            verify_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            sync_timeout_secs: 300,
            lock_wait_secs: 30,
            git_binary: PathBuf::from("git"),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }
}

impl AssureConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        let notes_suffix = self.notes_ref.strip_prefix("refs/notes/").unwrap_or("");
        if notes_suffix.is_empty() || self.notes_ref.contains(char::is_whitespace) {
            errors.push(ValidationError::InvalidNotesRef {
                notes_ref: self.notes_ref.clone(),
            });
        }
        if self.verify_workers == 0 {
            errors.push(ValidationError::InvalidWorkers {
                workers: self.verify_workers,
            });
        }
        if self.sync_timeout_secs == 0 {
            errors.push(ValidationError::InvalidTimeout {
                name: "sync_timeout_secs",
                timeout: self.sync_timeout_secs,
            });
        }
        if self.lock_wait_secs == 0 {
            errors.push(ValidationError::InvalidTimeout {
                name: "lock_wait_secs",
                timeout: self.lock_wait_secs,
            });
        }
        if self.artifact_name.is_empty()
            || self.artifact_name.contains('/')
            || self.artifact_name.starts_with('.')
        {
            errors.push(ValidationError::InvalidArtifactName {
                name: self.artifact_name.clone(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}

/// Resolves which configuration file applies.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Search the checkout's private directory, then the user config directory.
    pub fn new(git_dir: Option<&Path>) -> Self {
        let mut search_paths = Vec::new();

        if let Some(git_dir) = git_dir {
            search_paths.push(git_dir.join("assure").join("config.toml"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("git-assure").join("config.toml"));
        }

        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Load the explicit file if given, else `GIT_ASSURE_CONFIG`, else the
    /// first existing search path, else defaults.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<AssureConfig, ConfigError> {
        let config_path = if let Some(path) = config_file {
            Some(path.to_path_buf())
        } else if let Some(env_config) = env::var_os(CONFIG_ENV) {
            Some(PathBuf::from(env_config))
        } else {
            self.find_config_file()
        };

        let config = match config_path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                self.load_config_from_file(&path)?
            }
            None => AssureConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<AssureConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str::<AssureConfig>(&content)?)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    pub fn get_search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}
