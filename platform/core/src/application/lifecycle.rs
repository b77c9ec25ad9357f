// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process lifecycle
//!
//! The two calls a process entrypoint makes: [`initialize`] drives the
//! settings composer from `Unloaded` to `Active` and hands back the
//! repository bundle, [`shutdown`] releases every pool the bundle owns.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Startup and shutdown orchestration

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use super::repository_factory::{InitializationError, RepositoryBundle, RepositoryFactory};
use crate::config::{ConfigurationError, Settings, SettingsComposer};

/// Why the process could not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    /// Settings were missing, malformed or in the wrong state. Raised
    /// before any backend is contacted.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// One or more backends could not be mapped, reached or prepared.
    #[error(transparent)]
    Initialization(#[from] InitializationError),
}

/// Load and validate settings, then wire every repository.
///
/// On a configuration error the composer is left `Invalid`. On an
/// initialization error it stays `Validated` and nothing is left open.
pub async fn initialize(composer: &mut SettingsComposer) -> Result<(Arc<Settings>, RepositoryBundle), StartupError> {
    let settings = composer.load()?;
    match serde_json::to_string(&settings.startup_info()) {
        Ok(summary) => info!(%summary, "Starting agent platform core"),
        Err(e) => error!(error = %e, "Failed to render startup summary"),
    }

    match RepositoryFactory::activate(composer).await {
        Ok(ready) => {
            info!(backends = ready.1.backends().len(), "Agent platform core ready");
            Ok(ready)
        }
        Err(err) => {
            error!(error = %err, "Startup failed");
            Err(err)
        }
    }
}

pub async fn shutdown(repositories: RepositoryBundle) {
    info!("Shutting down storage backends");
    repositories.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsSource;

    #[tokio::test]
    async fn test_configuration_error_leaves_composer_invalid() {
        let mut composer = SettingsComposer::new(vec![SettingsSource::values([("APP_LOG_FORMAT", "xml")])]);

        let err = initialize(&mut composer).await.err().unwrap();
        match err {
            StartupError::Configuration(config) => {
                assert!(config.mentions("APP_DATABASE_URL"));
                assert!(config.mentions("APP_LOG_FORMAT"));
            }
            other => panic!("expected a configuration error, got {other}"),
        }
        assert_eq!(composer.state().name(), "invalid");
    }

    #[tokio::test]
    async fn test_initialize_activates_composer() {
        let mut composer = SettingsComposer::new(vec![SettingsSource::values([("APP_DATABASE_URL", "memory://")])]);

        let (settings, repositories) = initialize(&mut composer).await.unwrap();
        assert!(composer.is_active());
        assert_eq!(settings.conversations.history_window, 50);
        shutdown(repositories).await;
    }
}
