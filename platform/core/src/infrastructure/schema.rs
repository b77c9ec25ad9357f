// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Schema Mapper
//!
//! Derives a relational table definition from an entity's field descriptors.
//! The mapping is a pure function of `(entity, dialect)`: the same inputs
//! always produce the same columns, in declaration order, and the same SQL.
//!
//! | Field kind | SQLite | PostgreSQL |
//! |------------|--------|------------|
//! | identifier | `TEXT` | `UUID` |
//! | text | `TEXT` | `TEXT` |
//! | integer | `INTEGER` | `BIGINT` |
//! | float | `REAL` | `DOUBLE PRECISION` |
//! | boolean | `BOOLEAN` | `BOOLEAN` |
//! | timestamp | `TEXT` (RFC 3339, UTC, microseconds) | `TIMESTAMPTZ` |
//! | structured | `TEXT` (JSON document) | `JSONB` |
//!
//! Opaque field kinds have no mapping and fail with
//! [`SchemaMappingError::UnmappedType`] at startup.

use std::collections::HashSet;
use std::fmt;

use crate::domain::entity::{Entity, FieldDescriptor, FieldKind, FieldValue};
use crate::domain::repository::FilterSpec;

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaMappingError {
    #[error("{entity}.{field}: no {dialect} column type for field type `{type_name}`")]
    UnmappedType {
        entity: &'static str,
        field: &'static str,
        type_name: &'static str,
        dialect: Dialect,
    },

    #[error("{entity}: field `{field}` is declared more than once")]
    DuplicateField { entity: &'static str, field: &'static str },

    #[error("{entity}: `{name}` is not a valid column or table name")]
    InvalidName { entity: &'static str, name: String },

    #[error("{entity}: the first field must be a non-nullable identifier named `id`")]
    MissingPrimaryKey { entity: &'static str },

    #[error("table {table} does not exist and automatic migration is disabled")]
    MissingTable { table: String },

    #[error("table {table} has drifted from its entity: missing columns {missing:?}, unexpected columns {unexpected:?}")]
    Drift {
        table: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::Sqlite, Dialect::Postgres];

    /// Bind parameter for the 1-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => format!("${}", index),
        }
    }

    fn column_type(&self, kind: FieldKind) -> Option<ColumnType> {
        let column_type = match (self, kind) {
            (_, FieldKind::Opaque(_)) => return None,
            (Dialect::Postgres, FieldKind::Identifier) => ColumnType::Uuid,
            (Dialect::Postgres, FieldKind::Timestamp) => ColumnType::TimestampTz,
            (Dialect::Postgres, FieldKind::Structured) => ColumnType::Jsonb,
            (Dialect::Postgres, FieldKind::Integer) => ColumnType::BigInt,
            (Dialect::Postgres, FieldKind::Float) => ColumnType::DoublePrecision,
            (Dialect::Sqlite, FieldKind::Integer) => ColumnType::Integer,
            (Dialect::Sqlite, FieldKind::Float) => ColumnType::Real,
            (_, FieldKind::Boolean) => ColumnType::Boolean,
            (Dialect::Sqlite, FieldKind::Identifier | FieldKind::Timestamp | FieldKind::Structured)
            | (_, FieldKind::Text) => ColumnType::Text,
        };
        Some(column_type)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Boolean,
    Uuid,
    TimestampTz,
    Jsonb,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Real => "REAL",
            ColumnType::DoublePrecision => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Uuid => "UUID",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
            ColumnType::Jsonb => "JSONB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Table definition derived for one `(entity, dialect)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub entity: &'static str,
    pub table: String,
    pub dialect: Dialect,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &ColumnSchema {
        // The mapper guarantees the first column is the primary key.
        &self.columns[0]
    }

    /// Columns other than the primary key, in declaration order.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| !c.primary_key)
    }

    fn column_list(&self) -> String {
        self.columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut definition = format!("{} {}", c.name, c.column_type.sql());
                if c.primary_key {
                    definition.push_str(" PRIMARY KEY");
                } else if !c.nullable {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", self.table, columns)
    }

    /// Binds every column in declaration order.
    pub fn insert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| self.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) VALUES ({})", self.table, self.column_list(), placeholders)
    }

    /// Binds the value columns in declaration order, then the primary key.
    pub fn update_sql(&self) -> String {
        let assignments = self
            .value_columns()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c.name, self.dialect.placeholder(i + 1)))
            .collect::<Vec<_>>()
            .join(", ");
        let key_index = self.columns.len();
        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table,
            assignments,
            self.primary_key().name,
            self.dialect.placeholder(key_index)
        )
    }

    pub fn select_by_id_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            self.column_list(),
            self.table,
            self.primary_key().name,
            self.dialect.placeholder(1)
        )
    }

    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table,
            self.primary_key().name,
            self.dialect.placeholder(1)
        )
    }

    /// Filtered select ordered by primary key, plus the values to bind in
    /// placeholder order. Null conditions render as `IS NULL` and bind nothing.
    ///
    /// Callers validate the filter against the entity first.
    pub fn select_sql<'f>(&self, filter: &'f FilterSpec) -> (String, Vec<(&ColumnSchema, &'f FieldValue)>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        for condition in filter.conditions() {
            let Some(column) = self.column(&condition.field) else {
                continue;
            };
            if condition.value.is_null() {
                clauses.push(format!("{} IS NULL", column.name));
            } else {
                binds.push((column, &condition.value));
                clauses.push(format!("{} = {}", column.name, self.dialect.placeholder(binds.len())));
            }
        }
        let mut sql = format!("SELECT {} FROM {}", self.column_list(), self.table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} ASC", self.primary_key().name));
        (sql, binds)
    }

    /// Compare introspected column names against the derived columns.
    pub fn check_drift(&self, stored: &[String]) -> Result<(), SchemaMappingError> {
        if stored.is_empty() {
            return Err(SchemaMappingError::MissingTable {
                table: self.table.clone(),
            });
        }
        let stored_set: HashSet<&str> = stored.iter().map(String::as_str).collect();
        let derived: HashSet<&str> = self.columns.iter().map(|c| c.name).collect();

        let missing: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !stored_set.contains(c.name))
            .map(|c| c.name.to_string())
            .collect();
        let unexpected: Vec<String> = stored
            .iter()
            .filter(|name| !derived.contains(name.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(SchemaMappingError::Drift {
                table: self.table.clone(),
                missing,
                unexpected,
            })
        }
    }
}

pub struct SchemaMapper;

impl SchemaMapper {
    pub fn map<E: Entity>(dialect: Dialect) -> Result<TableSchema, SchemaMappingError> {
        Self::map_fields(E::KIND, E::fields(), dialect)
    }

    /// Checks that `E` maps in every dialect, for backends that need no
    /// table. An entity accepted here can move to any SQL backend unchanged.
    pub fn check<E: Entity>() -> Result<(), SchemaMappingError> {
        Self::check_portable(E::KIND, E::fields())
    }

    pub fn check_portable(entity: &'static str, fields: &'static [FieldDescriptor]) -> Result<(), SchemaMappingError> {
        for dialect in Dialect::ALL {
            Self::map_fields(entity, fields, dialect)?;
        }
        Ok(())
    }

    pub fn map_fields(
        entity: &'static str,
        fields: &'static [FieldDescriptor],
        dialect: Dialect,
    ) -> Result<TableSchema, SchemaMappingError> {
        Self::check_fields(entity, fields)?;

        let table = format!("{}s", entity);
        if !is_valid_name(&table) {
            return Err(SchemaMappingError::InvalidName { entity, name: table });
        }

        let columns = fields
            .iter()
            .enumerate()
            .map(|(position, field)| {
                let column_type = dialect
                    .column_type(field.kind)
                    .ok_or(SchemaMappingError::UnmappedType {
                        entity,
                        field: field.name,
                        type_name: field.kind.name(),
                        dialect,
                    })?;
                Ok(ColumnSchema {
                    name: field.name,
                    kind: field.kind,
                    column_type,
                    nullable: field.nullable,
                    primary_key: position == 0,
                })
            })
            .collect::<Result<Vec<_>, SchemaMappingError>>()?;

        Ok(TableSchema {
            entity,
            table,
            dialect,
            columns,
        })
    }

    fn check_fields(entity: &'static str, fields: &'static [FieldDescriptor]) -> Result<(), SchemaMappingError> {
        match fields.first() {
            Some(first) if first.name == "id" && first.kind == FieldKind::Identifier && !first.nullable => {}
            _ => return Err(SchemaMappingError::MissingPrimaryKey { entity }),
        }
        let mut seen = HashSet::new();
        for field in fields {
            if !is_valid_name(field.name) {
                return Err(SchemaMappingError::InvalidName {
                    entity,
                    name: field.name.to_string(),
                });
            }
            if !seen.insert(field.name) {
                return Err(SchemaMappingError::DuplicateField {
                    entity,
                    field: field.name,
                });
            }
        }
        Ok(())
    }
}

/// `[a-z_][a-z0-9_]*`, at most 63 bytes.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
