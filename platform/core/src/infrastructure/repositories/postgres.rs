// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Repository
//!
//! Networked implementation of the repository port, backed by one table per
//! entity in the current schema. Identifiers use the native `UUID` type,
//! timestamps `TIMESTAMPTZ` and structured values `JSONB`.
//!
//! Each operation is a single autocommitted statement bounded by the
//! operation timeout and retried with exponential backoff on transient
//! faults (see [`super::retry`]). A `create` that hits a duplicate key after
//! a retried attempt re-reads the row: if it equals the submitted entity the
//! earlier attempt committed and the create is reported as successful.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::retry::{AttemptError, RetryPolicy};
use super::{corrupt_row, is_unique_violation, record_values, Statements};
use crate::domain::entity::{Entity, FieldKind, FieldValue, Identifier, Record};
use crate::domain::repository::{ensure_identity, require_identity, FilterSpec, Repository, RepositoryError};
use crate::infrastructure::db::{PostgresDatabase, PrepareError};
use crate::infrastructure::schema::{Dialect, SchemaMapper, TableSchema};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

pub struct PostgresRepository<E: Entity> {
    pool: PgPool,
    schema: Arc<TableSchema>,
    statements: Statements,
    retry: RetryPolicy,
    operation_timeout: Duration,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> PostgresRepository<E> {
    pub fn new(database: &PostgresDatabase, retry: RetryPolicy, operation_timeout: Duration) -> Result<Self, PrepareError> {
        let schema = SchemaMapper::map::<E>(Dialect::Postgres)?;
        Ok(Self {
            pool: database.pool().clone(),
            statements: Statements::for_schema(&schema),
            schema: Arc::new(schema),
            retry,
            operation_timeout,
            _entity: PhantomData,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub async fn prepare(&self, auto_migrate: bool) -> Result<(), PrepareError> {
        if auto_migrate {
            sqlx::query(&self.schema.create_table_sql())
                .execute(&self.pool)
                .await
                .map_err(|e| PrepareError::statement(&self.schema.table, e))?;
        }

        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(self.schema.table.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PrepareError::statement(&self.schema.table, e))?;
        self.schema.check_drift(&columns)?;

        debug!(table = %self.schema.table, columns = columns.len(), "PostgreSQL table ready");
        Ok(())
    }

    /// One attempt under the operation timeout; a timeout is worth retrying.
    async fn attempt<T, F>(&self, work: F) -> Result<T, AttemptError>
    where
        F: std::future::Future<Output = Result<T, AttemptError>>,
    {
        tokio::time::timeout(self.operation_timeout, work)
            .await
            .unwrap_or_else(|_| {
                Err(AttemptError::Transient(format!(
                    "no answer within {}s",
                    self.operation_timeout.as_secs()
                )))
            })
    }

    /// Column kinds paired with entity values, in column order.
    fn bindings(&self, entity: &E) -> Result<Vec<(FieldKind, FieldValue)>, RepositoryError> {
        let values = record_values(&self.schema, entity)?;
        Ok(self.schema.columns.iter().map(|c| c.kind).zip(values).collect())
    }

    async fn fetch(&self, id: E::Id) -> Result<Option<E>, AttemptError> {
        let row = sqlx::query(&self.statements.select_by_id)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(AttemptError::classify)?;
        Ok(row.map(|row| decode::<E>(&self.schema, &row)).transpose()?)
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for PostgresRepository<E> {
    async fn create(&self, mut entity: E) -> Result<E::Id, RepositoryError> {
        let id = ensure_identity(&mut entity);
        let bindings = self.bindings(&entity)?;
        let retried = AtomicBool::new(false);

        let outcome = self
            .retry
            .run("create", |attempt| {
                if attempt > 0 {
                    retried.store(true, Ordering::Relaxed);
                }
                let bindings = bindings.clone();
                async move {
                    self.attempt(async {
                        let mut query = sqlx::query(&self.statements.insert);
                        for (kind, value) in bindings {
                            query = bind(query, kind, value);
                        }
                        query.execute(&self.pool).await.map(|_| ()).map_err(|e| {
                            if is_unique_violation(&e) {
                                AttemptError::Fatal(RepositoryError::duplicate::<E>(id))
                            } else {
                                AttemptError::classify(e)
                            }
                        })
                    })
                    .await
                }
            })
            .await;

        match outcome {
            Ok(()) => Ok(id),
            Err(err) if err.is_duplicate() && retried.load(Ordering::Relaxed) => {
                // An earlier attempt may have committed before its answer was lost.
                match self.read(id).await? {
                    Some(stored) if stored == entity => {
                        info!(entity = E::KIND, %id, "Create committed by an earlier attempt");
                        Ok(id)
                    }
                    _ => Err(err),
                }
            }
            Err(err) => {
                if err.is_duplicate() {
                    debug!(entity = E::KIND, %id, "Rejected duplicate create");
                }
                Err(err)
            }
        }
    }

    async fn read(&self, id: E::Id) -> Result<Option<E>, RepositoryError> {
        self.retry
            .run("read", |_| async move { self.attempt(self.fetch(id)).await })
            .await
    }

    async fn update(&self, entity: E) -> Result<(), RepositoryError> {
        let id = require_identity(&entity)?;
        let mut bindings = self.bindings(&entity)?;
        // The statement binds value columns first and the key last.
        let key = bindings.remove(0);
        bindings.push(key);

        self.retry
            .run("update", |_| {
                let bindings = bindings.clone();
                async move {
                    self.attempt(async {
                        let mut query = sqlx::query(&self.statements.update);
                        for (kind, value) in bindings {
                            query = bind(query, kind, value);
                        }
                        let result = query.execute(&self.pool).await.map_err(AttemptError::classify)?;
                        if result.rows_affected() == 0 {
                            return Err(AttemptError::Fatal(RepositoryError::not_found::<E>(id)));
                        }
                        Ok(())
                    })
                    .await
                }
            })
            .await
    }

    async fn delete(&self, id: E::Id) -> Result<(), RepositoryError> {
        self.retry
            .run("delete", |_| async move {
                self.attempt(async {
                    sqlx::query(&self.statements.delete)
                        .bind(id.as_uuid())
                        .execute(&self.pool)
                        .await
                        .map(|_| ())
                        .map_err(AttemptError::classify)
                })
                .await
            })
            .await
    }

    async fn list(&self, filter: &FilterSpec) -> Result<Vec<E>, RepositoryError> {
        filter.validate_for::<E>()?;
        let (sql, binds) = self.schema.select_sql(filter);
        let sql = sql.as_str();
        let binds = &binds;

        self.retry
            .run("list", |_| async move {
                self.attempt(async {
                    let mut query = sqlx::query(sql);
                    for (column, value) in binds {
                        query = bind(query, column.kind, (*value).clone());
                    }
                    let rows = query.fetch_all(&self.pool).await.map_err(AttemptError::classify)?;
                    rows.iter()
                        .map(|row| decode::<E>(&self.schema, row))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(AttemptError::Fatal)
                })
                .await
            })
            .await
    }
}

/// Bind `value`; nulls carry the column's type so the server can plan them.
fn bind(query: PgQuery<'_>, kind: FieldKind, value: FieldValue) -> PgQuery<'_> {
    match value {
        FieldValue::Null => match kind {
            FieldKind::Identifier => query.bind(None::<Uuid>),
            FieldKind::Integer => query.bind(None::<i64>),
            FieldKind::Float => query.bind(None::<f64>),
            FieldKind::Boolean => query.bind(None::<bool>),
            FieldKind::Timestamp => query.bind(None::<DateTime<Utc>>),
            FieldKind::Structured => query.bind(None::<serde_json::Value>),
            FieldKind::Text | FieldKind::Opaque(_) => query.bind(None::<String>),
        },
        FieldValue::Identifier(uuid) => query.bind(uuid),
        FieldValue::Text(text) => query.bind(text),
        FieldValue::Integer(n) => query.bind(n),
        FieldValue::Float(x) => query.bind(x),
        FieldValue::Boolean(b) => query.bind(b),
        FieldValue::Timestamp(ts) => query.bind(ts),
        FieldValue::Structured(json) => query.bind(json),
    }
}

fn decode<E: Entity>(schema: &TableSchema, row: &PgRow) -> Result<E, RepositoryError> {
    let mut record = Record::new();
    for column in &schema.columns {
        let name = column.name;
        let broken = |e: sqlx::Error| corrupt_row::<E>(name, e);
        let value: FieldValue = match column.kind {
            FieldKind::Identifier => row.try_get::<Option<Uuid>, _>(name).map_err(broken)?.into(),
            FieldKind::Text => row.try_get::<Option<String>, _>(name).map_err(broken)?.into(),
            FieldKind::Integer => row.try_get::<Option<i64>, _>(name).map_err(broken)?.into(),
            FieldKind::Float => row.try_get::<Option<f64>, _>(name).map_err(broken)?.into(),
            FieldKind::Boolean => row.try_get::<Option<bool>, _>(name).map_err(broken)?.into(),
            FieldKind::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(name).map_err(broken)?.into(),
            FieldKind::Structured => row
                .try_get::<Option<serde_json::Value>, _>(name)
                .map_err(broken)?
                .map(FieldValue::Structured)
                .unwrap_or(FieldValue::Null),
            FieldKind::Opaque(type_name) => return Err(corrupt_row::<E>(name, format!("no decoding for {}", type_name))),
        };
        record.insert(name, value);
    }
    E::from_record(record).map_err(|e| corrupt_row::<E>(&e.field, e.reason))
}
