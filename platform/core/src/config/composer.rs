// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Settings Composer
//!
//! Lifecycle of process settings:
//!
//! ```text
//! Unloaded --load--> Loading --ok--> Validated --activate--> Active
//!                        \--error--> Invalid
//! any state --reset--> Unloaded
//! ```
//!
//! `load` performs structural validation only. Reaching `Active` is the
//! dependency factory's call, made once every backend has answered its
//! connectivity check. The composer itself never touches a backend.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::ConfigurationError;
use super::settings::Settings;
use super::source::{merge, SettingsSource};

#[derive(Debug, Clone)]
pub enum ComposerState {
    Unloaded,
    Loading,
    Validated(Arc<Settings>),
    Active(Arc<Settings>),
    Invalid(ConfigurationError),
}

impl ComposerState {
    pub fn name(&self) -> &'static str {
        match self {
            ComposerState::Unloaded => "unloaded",
            ComposerState::Loading => "loading",
            ComposerState::Validated(_) => "validated",
            ComposerState::Active(_) => "active",
            ComposerState::Invalid(_) => "invalid",
        }
    }
}

pub struct SettingsComposer {
    sources: Vec<SettingsSource>,
    state: ComposerState,
}

impl SettingsComposer {
    pub fn new(sources: Vec<SettingsSource>) -> Self {
        Self {
            sources,
            state: ComposerState::Unloaded,
        }
    }

    /// `.env` in the working directory (if present) overlaid by the process
    /// environment.
    pub fn from_environment() -> Self {
        Self::new(vec![SettingsSource::env_file(".env"), SettingsSource::ProcessEnv])
    }

    pub fn state(&self) -> &ComposerState {
        &self.state
    }

    /// Settings once validated, whether or not they are active yet.
    pub fn settings(&self) -> Option<Arc<Settings>> {
        match &self.state {
            ComposerState::Validated(settings) | ComposerState::Active(settings) => Some(settings.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ComposerState::Active(_))
    }

    /// Read, merge and validate every source.
    ///
    /// Idempotent once validated; an `Invalid` composer keeps returning its
    /// error until [`SettingsComposer::reset`].
    pub fn load(&mut self) -> Result<Arc<Settings>, ConfigurationError> {
        match &self.state {
            ComposerState::Validated(settings) | ComposerState::Active(settings) => return Ok(settings.clone()),
            ComposerState::Invalid(err) => return Err(err.clone()),
            ComposerState::Loading => {
                return Err(ConfigurationError::InvalidState {
                    expected: "unloaded",
                    actual: "loading",
                })
            }
            ComposerState::Unloaded => {}
        }

        self.state = ComposerState::Loading;
        debug!(sources = self.sources.len(), "Loading settings");

        match merge(&self.sources).and_then(|values| Settings::from_values(&values)) {
            Ok(settings) => {
                let settings = Arc::new(settings);
                info!(
                    environment = %settings.shared.environment,
                    agents_storage = %settings.agents_storage(),
                    conversations_storage = %settings.conversations_storage(),
                    "Settings validated"
                );
                self.state = ComposerState::Validated(settings.clone());
                Ok(settings)
            }
            Err(err) => {
                warn!(error = %err, "Settings rejected");
                self.state = ComposerState::Invalid(err.clone());
                Err(err)
            }
        }
    }

    /// Promote validated settings to active. Called by the dependency factory
    /// after its connectivity checks pass.
    pub fn activate(&mut self) -> Result<Arc<Settings>, ConfigurationError> {
        let settings = match &self.state {
            ComposerState::Validated(settings) => settings.clone(),
            ComposerState::Active(settings) => return Ok(settings.clone()),
            other => {
                return Err(ConfigurationError::InvalidState {
                    expected: "validated",
                    actual: other.name(),
                })
            }
        };
        self.state = ComposerState::Active(settings.clone());
        info!("Settings active");
        Ok(settings)
    }

    /// Discard cached settings; the next `load` re-reads every source.
    pub fn reset(&mut self) {
        debug!(from = self.state.name(), "Resetting settings composer");
        self.state = ComposerState::Unloaded;
    }
}
