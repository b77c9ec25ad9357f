// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_service;
pub mod lifecycle;
pub mod repository_factory;

pub use agent_service::{AgentService, AgentStatus, CreateAgentRequest, ServiceError, StandardAgentService};
pub use lifecycle::{initialize, shutdown, StartupError};
pub use repository_factory::{BackendFailure, InitializationError, RepositoryBundle, RepositoryFactory, StorageBackend};
