// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository implementations
//!
//! Adapters behind `crate::domain::repository::Repository`:
//!
//! - [`in_memory::InMemoryRepository`] - process-local map
//! - [`sqlite::SqliteRepository`] - embedded file, write-verified
//! - [`postgres::PostgresRepository`] - networked server, retried
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Storage adapters for every entity type

pub mod in_memory;
pub mod postgres;
pub mod retry;
pub mod sqlite;

pub use in_memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use retry::RetryPolicy;
pub use sqlite::SqliteRepository;

use std::fmt::Display;

use crate::domain::entity::{Entity, FieldValue, ValidationError};
use crate::domain::repository::RepositoryError;
use crate::infrastructure::schema::TableSchema;

/// Statements prepared once per adapter instance.
pub(crate) struct Statements {
    pub insert: String,
    pub update: String,
    pub select_by_id: String,
    pub delete: String,
}

impl Statements {
    pub fn for_schema(schema: &TableSchema) -> Self {
        Self {
            insert: schema.insert_sql(),
            update: schema.update_sql(),
            select_by_id: schema.select_by_id_sql(),
            delete: schema.delete_sql(),
        }
    }
}

/// Entity values in column order, checked against kind and nullability.
pub(crate) fn record_values<E: Entity>(schema: &TableSchema, entity: &E) -> Result<Vec<FieldValue>, RepositoryError> {
    let mut record = entity.to_record()?;
    schema
        .columns
        .iter()
        .map(|column| -> Result<FieldValue, RepositoryError> {
            let value = record.take(column.name);
            if value.is_null() && !column.nullable {
                return Err(ValidationError::new(column.name, "value is required").into());
            }
            if !value.fits(column.kind) {
                return Err(ValidationError::new(column.name, format!("expected a {} value", column.kind.name())).into());
            }
            Ok(value)
        })
        .collect()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // SQLite primary-key and unique constraint codes.
            db.is_unique_violation() || matches!(db.code().as_deref(), Some("1555") | Some("2067"))
        }
        _ => false,
    }
}

pub(crate) fn unavailable<E: Entity>(operation: &str, err: sqlx::Error) -> RepositoryError {
    RepositoryError::StorageUnavailable(format!("{} {}: {}", E::KIND, operation, err))
}

pub(crate) fn corrupt_row<E: Entity>(field: &str, reason: impl Display) -> RepositoryError {
    RepositoryError::StorageUnavailable(format!("stored {} has unreadable {}: {}", E::KIND, field, reason))
}
