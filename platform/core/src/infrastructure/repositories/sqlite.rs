// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Repository
//!
//! Embedded, single-file implementation of the repository port. Every write
//! runs in its own transaction and is then read back through a fresh pool
//! connection; a write whose effect cannot be observed is reported as
//! `StorageUnavailable` rather than success.
//!
//! Value encoding (see `crate::infrastructure::schema`): identifiers are
//! stored as hyphenated lowercase text, timestamps as RFC 3339 UTC text with
//! microseconds, structured values as JSON text.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use super::{corrupt_row, is_unique_violation, record_values, unavailable, Statements};
use crate::domain::entity::{Entity, FieldKind, FieldValue, Identifier, Record};
use crate::domain::repository::{ensure_identity, require_identity, FilterSpec, Repository, RepositoryError};
use crate::infrastructure::db::{PrepareError, SqliteDatabase};
use crate::infrastructure::schema::{Dialect, SchemaMapper, TableSchema};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteRepository<E: Entity> {
    pool: SqlitePool,
    schema: Arc<TableSchema>,
    statements: Statements,
    write_gate: Arc<Mutex<()>>,
    operation_timeout: Duration,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteRepository<E> {
    /// Map `E` onto the SQLite dialect and bind it to an open database.
    pub fn new(database: &SqliteDatabase, operation_timeout: Duration) -> Result<Self, PrepareError> {
        let schema = SchemaMapper::map::<E>(Dialect::Sqlite)?;
        Ok(Self {
            pool: database.pool().clone(),
            statements: Statements::for_schema(&schema),
            schema: Arc::new(schema),
            write_gate: database.write_gate(),
            operation_timeout,
            _entity: PhantomData,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Create the table when `auto_migrate` is set, then compare the stored
    /// columns with the derived ones.
    pub async fn prepare(&self, auto_migrate: bool) -> Result<(), PrepareError> {
        if auto_migrate {
            sqlx::query(&self.schema.create_table_sql())
                .execute(&self.pool)
                .await
                .map_err(|e| PrepareError::statement(&self.schema.table, e))?;
        }

        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(self.schema.table.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PrepareError::statement(&self.schema.table, e))?;
        self.schema.check_drift(&columns)?;

        debug!(table = %self.schema.table, columns = columns.len(), "SQLite table ready");
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &str, work: F) -> Result<T, RepositoryError>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        match tokio::time::timeout(self.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::StorageUnavailable(format!(
                "{} {} timed out after {:?}",
                E::KIND,
                operation,
                self.operation_timeout
            ))),
        }
    }

    async fn fetch(&self, id: E::Id) -> Result<Option<E>, RepositoryError> {
        let row = sqlx::query(&self.statements.select_by_id)
            .bind(id.as_uuid().to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable::<E>("read", e))?;
        row.map(|row| decode::<E>(&self.schema, &row)).transpose()
    }

    /// Read back `id` and require it to equal `expected` (`None`: absent).
    async fn verify(&self, id: E::Id, expected: Option<&E>) -> Result<(), RepositoryError> {
        let stored = self.fetch(id).await?;
        if stored.as_ref() == expected {
            return Ok(());
        }
        error!(
            entity = E::KIND,
            %id,
            expected_present = expected.is_some(),
            found_present = stored.is_some(),
            "SQLite write was not observable after commit"
        );
        Err(RepositoryError::StorageUnavailable(format!(
            "{} {} write could not be verified",
            E::KIND,
            id
        )))
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for SqliteRepository<E> {
    async fn create(&self, mut entity: E) -> Result<E::Id, RepositoryError> {
        let id = ensure_identity(&mut entity);
        let values = record_values(&self.schema, &entity)?;

        self.bounded("create", async {
            // Held through the read-back so no other writer lands in between.
            let _gate = self.write_gate.lock().await;
            let mut tx = self.pool.begin().await.map_err(|e| unavailable::<E>("create", e))?;

            let mut query = sqlx::query(&self.statements.insert);
            for value in values {
                query = bind(query, value);
            }
            if let Err(e) = query.execute(&mut *tx).await {
                if is_unique_violation(&e) {
                    debug!(entity = E::KIND, %id, "Rejected duplicate create");
                    return Err(RepositoryError::duplicate::<E>(id));
                }
                return Err(unavailable::<E>("create", e));
            }
            tx.commit().await.map_err(|e| unavailable::<E>("create", e))?;

            self.verify(id, Some(&entity)).await?;
            Ok(id)
        })
        .await
    }

    async fn read(&self, id: E::Id) -> Result<Option<E>, RepositoryError> {
        self.bounded("read", self.fetch(id)).await
    }

    async fn update(&self, entity: E) -> Result<(), RepositoryError> {
        let id = require_identity(&entity)?;
        let mut values = record_values(&self.schema, &entity)?;
        // The statement binds value columns first and the key last.
        let key = values.remove(0);
        values.push(key);

        self.bounded("update", async {
            let _gate = self.write_gate.lock().await;
            let mut tx = self.pool.begin().await.map_err(|e| unavailable::<E>("update", e))?;

            let mut query = sqlx::query(&self.statements.update);
            for value in values {
                query = bind(query, value);
            }
            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| unavailable::<E>("update", e))?;
            if result.rows_affected() == 0 {
                return Err(RepositoryError::not_found::<E>(id));
            }
            tx.commit().await.map_err(|e| unavailable::<E>("update", e))?;

            self.verify(id, Some(&entity)).await
        })
        .await
    }

    async fn delete(&self, id: E::Id) -> Result<(), RepositoryError> {
        self.bounded("delete", async {
            let _gate = self.write_gate.lock().await;
            let mut tx = self.pool.begin().await.map_err(|e| unavailable::<E>("delete", e))?;
            sqlx::query(&self.statements.delete)
                .bind(id.as_uuid().to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| unavailable::<E>("delete", e))?;
            tx.commit().await.map_err(|e| unavailable::<E>("delete", e))?;

            self.verify(id, None).await
        })
        .await
    }

    async fn list(&self, filter: &FilterSpec) -> Result<Vec<E>, RepositoryError> {
        filter.validate_for::<E>()?;
        let (sql, binds) = self.schema.select_sql(filter);

        self.bounded("list", async {
            let mut query = sqlx::query(&sql);
            for (_, value) in binds {
                query = bind(query, value.clone());
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| unavailable::<E>("list", e))?;
            rows.iter().map(|row| decode::<E>(&self.schema, row)).collect()
        })
        .await
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn bind(query: SqliteQuery<'_>, value: FieldValue) -> SqliteQuery<'_> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Identifier(uuid) => query.bind(uuid.to_string()),
        FieldValue::Text(text) => query.bind(text),
        FieldValue::Integer(n) => query.bind(n),
        FieldValue::Float(x) => query.bind(x),
        FieldValue::Boolean(b) => query.bind(b),
        FieldValue::Timestamp(ts) => query.bind(format_timestamp(&ts)),
        FieldValue::Structured(json) => query.bind(json.to_string()),
    }
}

fn decode<E: Entity>(schema: &TableSchema, row: &SqliteRow) -> Result<E, RepositoryError> {
    let mut record = Record::new();
    for column in &schema.columns {
        let name = column.name;
        let broken = |reason: String| corrupt_row::<E>(name, reason);
        let get_text = || row.try_get::<Option<String>, _>(name).map_err(|e| broken(e.to_string()));

        let value = match column.kind {
            FieldKind::Identifier => match get_text()? {
                Some(text) => FieldValue::Identifier(Uuid::parse_str(&text).map_err(|e| broken(e.to_string()))?),
                None => FieldValue::Null,
            },
            FieldKind::Text => get_text()?.map(FieldValue::Text).unwrap_or(FieldValue::Null),
            FieldKind::Integer => row
                .try_get::<Option<i64>, _>(name)
                .map_err(|e| broken(e.to_string()))?
                .map(FieldValue::Integer)
                .unwrap_or(FieldValue::Null),
            FieldKind::Float => row
                .try_get::<Option<f64>, _>(name)
                .map_err(|e| broken(e.to_string()))?
                .map(FieldValue::Float)
                .unwrap_or(FieldValue::Null),
            FieldKind::Boolean => row
                .try_get::<Option<bool>, _>(name)
                .map_err(|e| broken(e.to_string()))?
                .map(FieldValue::Boolean)
                .unwrap_or(FieldValue::Null),
            FieldKind::Timestamp => match get_text()? {
                Some(text) => FieldValue::Timestamp(
                    DateTime::parse_from_rfc3339(&text)
                        .map_err(|e| broken(e.to_string()))?
                        .with_timezone(&Utc),
                ),
                None => FieldValue::Null,
            },
            FieldKind::Structured => match get_text()? {
                Some(text) => FieldValue::Structured(serde_json::from_str(&text).map_err(|e| broken(e.to_string()))?),
                None => FieldValue::Null,
            },
            FieldKind::Opaque(type_name) => return Err(broken(format!("no decoding for {}", type_name))),
        };
        record.insert(name, value);
    }
    E::from_record(record).map_err(|e| corrupt_row::<E>(&e.field, e.reason))
}
