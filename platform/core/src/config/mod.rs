// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Configuration
//!
//! Settings sources, typed per-context settings and the composer that
//! drives them from raw input to an active configuration.
//!
//! # Architecture
//!
//! - **Layer:** Configuration
//! - **Purpose:** Validated, immutable settings shared by every layer

pub mod composer;
pub mod error;
pub mod settings;
pub mod source;

pub use composer::{ComposerState, SettingsComposer};
pub use error::{ConfigIssue, ConfigurationError};
pub use settings::{
    AgentsSettings, ConversationsSettings, DatabaseSettings, Environment, LogFormat, LogLevel, Settings,
    SharedSettings, StartupInfo, StorageScheme, StorageUrl,
};
pub use source::SettingsSource;
