// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Logging bootstrap.

use anyhow::{Context, Result};

use crate::config::{LogFormat, SharedSettings};

/// Build the log filter: `RUST_LOG` when set, otherwise `APP_LOG_LEVEL`.
pub fn log_filter(settings: &SharedSettings) -> Result<tracing_subscriber::EnvFilter> {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(settings.log_level.as_str()))
        .context("Failed to create log filter")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &SharedSettings) -> Result<()> {
    let filter = log_filter(settings)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match settings.log_format {
        LogFormat::Compact => builder.with_target(false).compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!(e)).context("Failed to install log subscriber")
}
