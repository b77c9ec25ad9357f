// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Platform Core
//!
//! Persistence and configuration composition for the agent template.
//!
//! - [`domain`]: entities, the entity reflection contract and the repository port
//! - [`config`]: settings sources, typed settings and the settings composer
//! - [`infrastructure`]: schema mapper, storage adapters, pools and logging
//! - [`application`]: the dependency factory, startup lifecycle and agent service
//!
//! Startup is a single call:
//!
//! ```no_run
//! use agent_platform_core::application::lifecycle;
//! use agent_platform_core::config::SettingsComposer;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut composer = SettingsComposer::from_environment();
//! let (settings, repositories) = lifecycle::initialize(&mut composer).await?;
//! tracing::info!(environment = %settings.shared.environment, "ready");
//! lifecycle::shutdown(repositories).await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
