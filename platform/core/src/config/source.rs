// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Settings sources
//!
//! Raw key/value input for the settings composer. Sources are merged in
//! order with later sources overriding earlier ones; keys are normalised to
//! upper case so `app_log_level` and `APP_LOG_LEVEL` are the same setting.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;

use super::error::ConfigurationError;

pub type RawValues = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub enum SettingsSource {
    /// A dotenv-style file. A missing optional file contributes nothing.
    EnvFile { path: PathBuf, required: bool },
    /// The current process environment.
    ProcessEnv,
    /// Explicit values, used by tests and embedding programs.
    Values(RawValues),
}

impl SettingsSource {
    pub fn env_file(path: impl Into<PathBuf>) -> Self {
        SettingsSource::EnvFile {
            path: path.into(),
            required: false,
        }
    }

    pub fn values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        SettingsSource::Values(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn describe(&self) -> String {
        match self {
            SettingsSource::EnvFile { path, .. } => format!("env file {}", path.display()),
            SettingsSource::ProcessEnv => "process environment".to_string(),
            SettingsSource::Values(_) => "explicit values".to_string(),
        }
    }

    pub fn read(&self) -> Result<RawValues, ConfigurationError> {
        match self {
            SettingsSource::EnvFile { path, required } => {
                let iter = match dotenvy::from_path_iter(path) {
                    Ok(iter) => iter,
                    Err(dotenvy::Error::Io(e)) if e.kind() == ErrorKind::NotFound && !required => {
                        debug!(path = %path.display(), "Optional env file not present");
                        return Ok(RawValues::new());
                    }
                    Err(e) => return Err(self.unreadable(e)),
                };
                let mut values = RawValues::new();
                for item in iter {
                    let (key, value) = item.map_err(|e| self.unreadable(e))?;
                    values.insert(key.to_ascii_uppercase(), value);
                }
                Ok(values)
            }
            SettingsSource::ProcessEnv => Ok(std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?.to_ascii_uppercase(), v.into_string().ok()?)))
                .collect()),
            SettingsSource::Values(values) => Ok(values
                .iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v.clone()))
                .collect()),
        }
    }

    fn unreadable(&self, err: impl std::fmt::Display) -> ConfigurationError {
        ConfigurationError::Unreadable {
            origin: self.describe(),
            reason: err.to_string(),
        }
    }
}

/// Read every source and merge them; later sources win.
pub fn merge(sources: &[SettingsSource]) -> Result<RawValues, ConfigurationError> {
    let mut merged = RawValues::new();
    for source in sources {
        let values = source.read()?;
        debug!(source = %source.describe(), keys = values.len(), "Read settings source");
        merged.extend(values);
    }
    Ok(merged)
}
