// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Turns validated settings into ready repository ports. This is the only
//! place in the crate that looks at which storage technology backs an
//! entity; everything downstream sees `Arc<dyn Repository<E>>`.
//!
//! Startup runs in three phases, each collecting every failure before
//! giving up:
//!
//! 1. map every entity onto its backend's dialect (no I/O)
//! 2. open each distinct backend with one bounded connectivity check
//! 3. bind the adapters and ensure their tables exist and match
//!
//! Only when all three succeed is the settings composer promoted to
//! `Active`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Backend selection and repository wiring

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use super::lifecycle::StartupError;
use crate::config::settings::sqlite_file;
use crate::config::{ConfigurationError, DatabaseSettings, Settings, SettingsComposer, StorageScheme, StorageUrl};
use crate::domain::agent::Agent;
use crate::domain::conversation::Conversation;
use crate::domain::entity::Entity;
use crate::domain::repository::Repository;
use crate::infrastructure::db::{ConnectivityError, PostgresDatabase, PrepareError, SqliteDatabase};
use crate::infrastructure::repositories::{InMemoryRepository, PostgresRepository, RetryPolicy, SqliteRepository};
use crate::infrastructure::schema::{Dialect, SchemaMapper};

/// Storage technology resolved from a connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub connection_string: String,
}

impl StorageBackend {
    pub fn resolve(url: &StorageUrl) -> Self {
        match url.scheme() {
            StorageScheme::Memory => StorageBackend::InMemory,
            StorageScheme::Sqlite => StorageBackend::Sqlite(SqliteConfig {
                path: PathBuf::from(sqlite_file(url.location())),
            }),
            StorageScheme::Postgres => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.as_str().to_string(),
            }),
        }
    }

    fn dialect(&self) -> Option<Dialect> {
        match self {
            StorageBackend::InMemory => None,
            StorageBackend::Sqlite(_) => Some(Dialect::Sqlite),
            StorageBackend::PostgreSQL(_) => Some(Dialect::Postgres),
        }
    }

    async fn open(&self, label: &str, settings: &DatabaseSettings) -> Result<Connection, ConnectivityError> {
        match self {
            StorageBackend::InMemory => Ok(Connection::InMemory),
            StorageBackend::Sqlite(config) => SqliteDatabase::open(&config.path, settings)
                .await
                .map(Connection::Sqlite),
            StorageBackend::PostgreSQL(config) => PostgresDatabase::connect(&config.connection_string, label, settings)
                .await
                .map(Connection::Postgres),
        }
    }
}

enum Connection {
    InMemory,
    Sqlite(SqliteDatabase),
    Postgres(PostgresDatabase),
}

impl Connection {
    async fn repository<E: Entity>(&self, settings: &DatabaseSettings) -> Result<Arc<dyn Repository<E>>, PrepareError> {
        match self {
            Connection::InMemory => Ok(Arc::new(InMemoryRepository::<E>::new())),
            Connection::Sqlite(database) => {
                let repository = SqliteRepository::<E>::new(database, settings.operation_timeout)?;
                repository.prepare(settings.auto_migrate).await?;
                Ok(Arc::new(repository))
            }
            Connection::Postgres(database) => {
                let repository = PostgresRepository::<E>::new(
                    database,
                    RetryPolicy::from_settings(settings),
                    settings.operation_timeout,
                )?;
                repository.prepare(settings.auto_migrate).await?;
                Ok(Arc::new(repository))
            }
        }
    }

    async fn close(&self) {
        match self {
            Connection::InMemory => {}
            Connection::Sqlite(database) => database.close().await,
            Connection::Postgres(database) => database.close().await,
        }
    }
}

/// One backend (and optionally one entity on it) that could not be made ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Redacted storage descriptor.
    pub backend: String,
    pub entity: Option<&'static str>,
    pub cause: PrepareError,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(entity) => write!(f, "{} [{}]: {}", self.backend, entity, self.cause),
            None => write!(f, "{}: {}", self.backend, self.cause),
        }
    }
}

/// Every backend failure found during startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage initialization failed: {}", render(.failures))]
pub struct InitializationError {
    pub failures: Vec<BackendFailure>,
}

impl InitializationError {
    pub fn connectivity(&self) -> impl Iterator<Item = &ConnectivityError> {
        self.failures.iter().filter_map(|f| match &f.cause {
            PrepareError::Connectivity(e) => Some(e),
            _ => None,
        })
    }

    pub fn schema(&self) -> impl Iterator<Item = &crate::infrastructure::schema::SchemaMappingError> {
        self.failures.iter().filter_map(|f| match &f.cause {
            PrepareError::Schema(e) => Some(e),
            _ => None,
        })
    }
}

fn render(failures: &[BackendFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Ready repository ports plus the pools behind them.
pub struct RepositoryBundle {
    agents: Arc<dyn Repository<Agent>>,
    conversations: Arc<dyn Repository<Conversation>>,
    connections: Vec<(String, Connection)>,
}

impl RepositoryBundle {
    pub fn agents(&self) -> Arc<dyn Repository<Agent>> {
        self.agents.clone()
    }

    pub fn conversations(&self) -> Arc<dyn Repository<Conversation>> {
        self.conversations.clone()
    }

    /// Redacted descriptors of every open backend.
    pub fn backends(&self) -> Vec<&str> {
        self.connections.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Close every pool. Ports handed out earlier fail with
    /// `StorageUnavailable` afterwards.
    pub async fn shutdown(self) {
        for (label, connection) in &self.connections {
            connection.close().await;
            info!(backend = %label, "Storage backend closed");
        }
    }
}

pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Build the repositories for validated settings and, on success,
    /// promote the composer to `Active`.
    pub async fn activate(composer: &mut SettingsComposer) -> Result<(Arc<Settings>, RepositoryBundle), StartupError> {
        let settings = match composer.settings() {
            Some(settings) => settings,
            None => {
                return Err(ConfigurationError::InvalidState {
                    expected: "validated",
                    actual: composer.state().name(),
                }
                .into())
            }
        };

        let bundle = Self::build(&settings).await?;
        match composer.activate() {
            Ok(settings) => Ok((settings, bundle)),
            Err(e) => {
                bundle.shutdown().await;
                Err(e.into())
            }
        }
    }

    /// Map, connect and prepare every repository, collecting all failures.
    pub async fn build(settings: &Settings) -> Result<RepositoryBundle, InitializationError> {
        let database = &settings.shared.database;
        let agents_url = settings.agents_storage();
        let conversations_url = settings.conversations_storage();

        let mut failures = Vec::new();
        check_mapping::<Agent>(agents_url, &mut failures);
        check_mapping::<Conversation>(conversations_url, &mut failures);
        if !failures.is_empty() {
            return Err(InitializationError { failures });
        }

        let mut distinct: Vec<&StorageUrl> = Vec::new();
        for url in [agents_url, conversations_url] {
            if !distinct.contains(&url) {
                distinct.push(url);
            }
        }

        let attempts = join_all(distinct.iter().map(|url| async move {
            let label = url.redacted();
            let opened = StorageBackend::resolve(url).open(&label, database).await;
            (*url, label, opened)
        }))
        .await;

        let mut connections = Vec::new();
        for (url, label, opened) in attempts {
            match opened {
                Ok(connection) => connections.push((url, label, connection)),
                Err(e) => {
                    warn!(backend = %label, error = %e.reason, "Storage backend unreachable");
                    failures.push(BackendFailure {
                        backend: label,
                        entity: None,
                        cause: e.into(),
                    });
                }
            }
        }

        let agents = match find(&connections, agents_url) {
            Some((label, connection)) => keep_prepared(connection.repository::<Agent>(database).await, label, &mut failures),
            None => None,
        };
        let conversations = match find(&connections, conversations_url) {
            Some((label, connection)) => {
                keep_prepared(connection.repository::<Conversation>(database).await, label, &mut failures)
            }
            None => None,
        };

        let connections: Vec<(String, Connection)> = connections
            .into_iter()
            .map(|(_, label, connection)| (label, connection))
            .collect();

        match (agents, conversations) {
            (Some(agents), Some(conversations)) if failures.is_empty() => {
                info!(backends = connections.len(), "Repositories ready");
                Ok(RepositoryBundle {
                    agents,
                    conversations,
                    connections,
                })
            }
            _ => {
                for (_, connection) in &connections {
                    connection.close().await;
                }
                Err(InitializationError { failures })
            }
        }
    }
}

fn check_mapping<E: Entity>(url: &StorageUrl, failures: &mut Vec<BackendFailure>) {
    let mapped = match StorageBackend::resolve(url).dialect() {
        Some(dialect) => SchemaMapper::map::<E>(dialect).map(|_| ()),
        None => SchemaMapper::check::<E>(),
    };
    if let Err(e) = mapped {
        failures.push(BackendFailure {
            backend: url.redacted(),
            entity: Some(E::KIND),
            cause: e.into(),
        });
    }
}

fn find<'a>(connections: &'a [(&StorageUrl, String, Connection)], url: &StorageUrl) -> Option<(&'a str, &'a Connection)> {
    connections
        .iter()
        .find(|(candidate, _, _)| *candidate == url)
        .map(|(_, label, connection)| (label.as_str(), connection))
}

fn keep_prepared<E: Entity>(
    prepared: Result<Arc<dyn Repository<E>>, PrepareError>,
    label: &str,
    failures: &mut Vec<BackendFailure>,
) -> Option<Arc<dyn Repository<E>>> {
    match prepared {
        Ok(repository) => Some(repository),
        Err(cause) => {
            warn!(backend = %label, entity = E::KIND, error = %cause, "Repository could not be prepared");
            failures.push(BackendFailure {
                backend: label.to_string(),
                entity: Some(E::KIND),
                cause,
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsSource;
    use crate::domain::agent::{AgentId, ModelSettings};
    use crate::domain::entity::{FieldDescriptor, FieldKind, Record, ValidationError};
    use crate::domain::repository::FilterSpec;
    use crate::infrastructure::schema::SchemaMappingError;

    #[derive(Debug, Clone, PartialEq)]
    struct Attachment;

    const ATTACHMENT_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::required("id", FieldKind::Identifier),
        FieldDescriptor::required("payload", FieldKind::Opaque("Vec<u8>")),
    ];

    impl Entity for Attachment {
        type Id = AgentId;
        const KIND: &'static str = "attachment";

        fn fields() -> &'static [FieldDescriptor] {
            ATTACHMENT_FIELDS
        }

        fn id(&self) -> Option<AgentId> {
            None
        }

        fn assign_id(&mut self, _id: AgentId) {}

        fn to_record(&self) -> Result<Record, ValidationError> {
            Ok(Record::new())
        }

        fn from_record(_record: Record) -> Result<Self, ValidationError> {
            Ok(Attachment)
        }
    }

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let values = SettingsSource::values(pairs.iter().copied()).read().unwrap();
        Settings::from_values(&values).unwrap()
    }

    #[test]
    fn test_resolve_backend() {
        let memory = StorageUrl::parse("memory://").unwrap();
        assert_eq!(StorageBackend::resolve(&memory), StorageBackend::InMemory);

        let sqlite = StorageUrl::parse("sqlite:///./data/agents.db").unwrap();
        assert_eq!(
            StorageBackend::resolve(&sqlite),
            StorageBackend::Sqlite(SqliteConfig {
                path: PathBuf::from("./data/agents.db")
            })
        );

        let postgres = StorageUrl::parse("postgresql://app:pw@db:5432/agents").unwrap();
        assert!(matches!(
            StorageBackend::resolve(&postgres),
            StorageBackend::PostgreSQL(PostgresConfig { connection_string }) if connection_string.starts_with("postgresql://")
        ));
    }

    #[tokio::test]
    async fn test_build_in_memory_bundle() {
        let bundle = RepositoryFactory::build(&settings(&[("APP_DATABASE_URL", "memory://")]))
            .await
            .unwrap();
        assert_eq!(bundle.backends(), vec!["memory://"]);

        let agents = bundle.agents();
        agents
            .create(Agent::assistant("Helper", ModelSettings::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(agents.list(&FilterSpec::all()).await.unwrap().len(), 1);
        bundle.shutdown().await;
    }

    #[tokio::test]
    async fn test_contexts_may_use_different_backends() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:///{}", dir.path().join("conversations.db").display());
        let bundle = RepositoryFactory::build(&settings(&[
            ("APP_DATABASE_URL", "memory://"),
            ("CONVERSATIONS_DATABASE_URL", url.as_str()),
        ]))
        .await
        .unwrap();

        assert_eq!(bundle.backends().len(), 2);
        assert!(dir.path().join("conversations.db").exists());
        bundle.shutdown().await;
    }

    #[tokio::test]
    async fn test_activate_requires_validated_composer() {
        let mut composer = SettingsComposer::new(vec![SettingsSource::values([("APP_DATABASE_URL", "memory://")])]);
        let err = RepositoryFactory::activate(&mut composer).await.err().unwrap();
        assert!(matches!(
            err,
            StartupError::Configuration(ConfigurationError::InvalidState { actual: "unloaded", .. })
        ));

        composer.load().unwrap();
        let (_, bundle) = RepositoryFactory::activate(&mut composer).await.unwrap();
        assert!(composer.is_active());
        bundle.shutdown().await;
    }

    #[test]
    fn test_unmapped_field_fails_on_every_backend() {
        for url in ["memory://", "sqlite:///attachments.db", "postgres://app:pw@db/attachments"] {
            let url = StorageUrl::parse(url).unwrap();
            let mut failures = Vec::new();
            check_mapping::<Attachment>(&url, &mut failures);

            assert_eq!(failures.len(), 1, "{}", url.redacted());
            assert_eq!(failures[0].entity, Some("attachment"));
            assert!(matches!(
                failures[0].cause,
                PrepareError::Schema(SchemaMappingError::UnmappedType { field: "payload", .. })
            ));
        }

        let mut failures = Vec::new();
        check_mapping::<Agent>(&StorageUrl::parse("memory://").unwrap(), &mut failures);
        assert!(failures.is_empty());
    }
}
