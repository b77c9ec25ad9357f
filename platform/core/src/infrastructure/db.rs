// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Connection Pools
//!
//! Thin handles over `sqlx` pools for the two SQL backends. Each handle is
//! opened once per distinct storage descriptor by the dependency factory and
//! shared by every repository that targets it.
//!
//! Opening performs exactly one connectivity check bounded by
//! `APP_DATABASE_CONNECT_TIMEOUT`; a backend that does not answer in time
//! yields a [`ConnectivityError`] instead of hanging startup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::schema::SchemaMappingError;
use crate::config::DatabaseSettings;

/// A backend could not be reached or opened within its time bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{backend} is unreachable: {reason}")]
pub struct ConnectivityError {
    /// Redacted descriptor of the backend.
    pub backend: String,
    pub reason: String,
}

impl ConnectivityError {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Why a repository could not be made ready against its backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrepareError {
    #[error(transparent)]
    Schema(#[from] SchemaMappingError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("preparing table {table} failed: {reason}")]
    Statement { table: String, reason: String },
}

impl PrepareError {
    pub fn statement(table: &str, err: sqlx::Error) -> Self {
        PrepareError::Statement {
            table: table.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Run a connectivity check under `bound`.
async fn reach<F>(label: &str, bound: Duration, check: F) -> Result<(), ConnectivityError>
where
    F: Future<Output = Result<(), sqlx::Error>>,
{
    match tokio::time::timeout(bound, check).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectivityError::new(label, e.to_string())),
        Err(_) => Err(ConnectivityError::new(
            label,
            format!("no answer within {}s", bound.as_secs()),
        )),
    }
}

/// Embedded single-file database.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    path: PathBuf,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteDatabase {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path, settings: &DatabaseSettings) -> Result<Self, ConnectivityError> {
        let label = format!("sqlite:{}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConnectivityError::new(&label, format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(settings.operation_timeout);
        if !settings.echo {
            options = options.disable_statement_logging();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.pool_size)
            .acquire_timeout(settings.pool_timeout)
            .test_before_acquire(settings.pool_pre_ping)
            .connect_lazy_with(options);

        let check = async { sqlx::query("SELECT 1").execute(&pool).await.map(|_| ()) };
        if let Err(e) = reach(&label, settings.connect_timeout, check).await {
            pool.close().await;
            return Err(e);
        }

        info!(path = %path.display(), "Opened SQLite database");
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialises writers from this process; SQLite admits one at a time.
    pub fn write_gate(&self) -> Arc<Mutex<()>> {
        self.write_gate.clone()
    }

    pub async fn close(&self) {
        debug!(path = %self.path.display(), "Closing SQLite pool");
        self.pool.close().await;
    }
}

/// Networked PostgreSQL server.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    label: String,
}

impl PostgresDatabase {
    /// Build a pool from `url` and verify the server answers.
    ///
    /// `label` is the redacted descriptor used in logs and errors.
    pub async fn connect(url: &str, label: &str, settings: &DatabaseSettings) -> Result<Self, ConnectivityError> {
        let mut options = PgConnectOptions::from_str(url)
            .map_err(|e| ConnectivityError::new(label, format!("invalid connection descriptor: {}", e)))?;
        if !settings.echo {
            options = options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_size + settings.max_overflow)
            .min_connections(settings.pool_size)
            .acquire_timeout(settings.pool_timeout)
            .max_lifetime(settings.pool_recycle)
            .test_before_acquire(settings.pool_pre_ping)
            .connect_lazy_with(options);

        let check = async { sqlx::query("SELECT 1").execute(&pool).await.map(|_| ()) };
        if let Err(e) = reach(label, settings.connect_timeout, check).await {
            pool.close().await;
            return Err(e);
        }

        info!(
            backend = %label,
            max_connections = settings.pool_size + settings.max_overflow,
            "Connected to PostgreSQL"
        );
        Ok(Self {
            pool,
            label: label.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        debug!(backend = %self.label, "Closing PostgreSQL pool");
        self.pool.close().await;
    }
}
