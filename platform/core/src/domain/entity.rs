// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Entity Reflection Contract
//!
//! Every persistable aggregate describes itself through [`Entity`]: an ordered
//! list of [`FieldDescriptor`]s plus a lossless conversion to and from a
//! [`Record`] of primitive [`FieldValue`]s. Nothing here knows about tables,
//! columns or SQL; storage schema is derived from these descriptors by the
//! infrastructure schema mapper, never the other way round.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Storage-agnostic self-description of aggregates

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A structurally invalid value was supplied to a constructor, behaviour
/// method or record conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Current time truncated to microseconds.
///
/// Every supported backend stores microsecond precision, so entities never
/// carry sub-microsecond noise that would make a read-back compare unequal.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Strongly typed aggregate identifier backed by a UUID.
pub trait Identifier:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn from_uuid(uuid: Uuid) -> Self;

    fn as_uuid(&self) -> Uuid;

    fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Parse an identifier from its textual form. Empty input is rejected.
    fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new("id", "identifier cannot be empty"));
        }
        Uuid::parse_str(trimmed)
            .map(Self::from_uuid)
            .map_err(|e| ValidationError::new("id", format!("'{}' is not a valid identifier: {}", trimmed, e)))
    }
}

/// Semantic type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Identifier,
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Composite or collection value, carried as a structured document.
    Structured,
    /// A domain type with no portable primitive representation. The name is
    /// the Rust type the field holds; no backend has a mapping for it.
    Opaque(&'static str),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Identifier => "identifier",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Structured => "structured",
            FieldKind::Opaque(type_name) => type_name,
        }
    }

    /// Whether values of this kind can be compared for equality in a filter.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldKind::Structured | FieldKind::Opaque(_))
    }
}

/// Declaration of one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// A primitive value of an entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Identifier(Uuid),
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Structured(serde_json::Value),
}

impl FieldValue {
    /// Serialize a composite value into its structured form.
    pub fn structured<T: Serialize>(field: &str, value: &T) -> Result<Self, ValidationError> {
        serde_json::to_value(value)
            .map(FieldValue::Structured)
            .map_err(|e| ValidationError::new(field, format!("cannot serialize: {}", e)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Whether this value may be stored in a field of `kind`. `Null` fits any kind;
    /// nullability is checked separately.
    pub fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (FieldValue::Null, _)
                | (FieldValue::Identifier(_), FieldKind::Identifier)
                | (FieldValue::Text(_), FieldKind::Text)
                | (FieldValue::Integer(_), FieldKind::Integer)
                | (FieldValue::Float(_), FieldKind::Float)
                | (FieldValue::Boolean(_), FieldKind::Boolean)
                | (FieldValue::Timestamp(_), FieldKind::Timestamp)
                | (FieldValue::Structured(_), FieldKind::Structured)
        )
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Identifier(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Flat field-name to value map produced by [`Entity::to_record`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Remove a value; a missing field reads as `Null`.
    pub fn take(&mut self, name: &str) -> FieldValue {
        self.values.remove(name).unwrap_or(FieldValue::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn take_identifier<I: Identifier>(&mut self, name: &str) -> Result<I, ValidationError> {
        match self.take(name) {
            FieldValue::Identifier(uuid) => Ok(I::from_uuid(uuid)),
            other => Err(mismatch(name, "identifier", &other)),
        }
    }

    pub fn take_text(&mut self, name: &str) -> Result<String, ValidationError> {
        match self.take(name) {
            FieldValue::Text(text) => Ok(text),
            other => Err(mismatch(name, "text", &other)),
        }
    }

    pub fn take_optional_text(&mut self, name: &str) -> Result<Option<String>, ValidationError> {
        match self.take(name) {
            FieldValue::Null => Ok(None),
            FieldValue::Text(text) => Ok(Some(text)),
            other => Err(mismatch(name, "text", &other)),
        }
    }

    pub fn take_integer(&mut self, name: &str) -> Result<i64, ValidationError> {
        match self.take(name) {
            FieldValue::Integer(value) => Ok(value),
            other => Err(mismatch(name, "integer", &other)),
        }
    }

    pub fn take_float(&mut self, name: &str) -> Result<f64, ValidationError> {
        match self.take(name) {
            FieldValue::Float(value) => Ok(value),
            // Integral floats may come back from JSON-ish stores as integers.
            FieldValue::Integer(value) => Ok(value as f64),
            other => Err(mismatch(name, "float", &other)),
        }
    }

    pub fn take_bool(&mut self, name: &str) -> Result<bool, ValidationError> {
        match self.take(name) {
            FieldValue::Boolean(value) => Ok(value),
            other => Err(mismatch(name, "boolean", &other)),
        }
    }

    pub fn take_timestamp(&mut self, name: &str) -> Result<DateTime<Utc>, ValidationError> {
        match self.take(name) {
            FieldValue::Timestamp(value) => Ok(value),
            other => Err(mismatch(name, "timestamp", &other)),
        }
    }

    pub fn take_structured<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ValidationError> {
        match self.take(name) {
            FieldValue::Structured(value) => serde_json::from_value(value)
                .map_err(|e| ValidationError::new(name, format!("malformed structured value: {}", e))),
            other => Err(mismatch(name, "structured", &other)),
        }
    }
}

fn mismatch(field: &str, expected: &str, found: &FieldValue) -> ValidationError {
    let found = match found {
        FieldValue::Null => "null",
        FieldValue::Identifier(_) => "identifier",
        FieldValue::Text(_) => "text",
        FieldValue::Integer(_) => "integer",
        FieldValue::Float(_) => "float",
        FieldValue::Boolean(_) => "boolean",
        FieldValue::Timestamp(_) => "timestamp",
        FieldValue::Structured(_) => "structured",
    };
    ValidationError::new(field, format!("expected {}, found {}", expected, found))
}

/// A persistable aggregate root.
///
/// The first descriptor returned by [`Entity::fields`] must be the
/// non-nullable identifier field `id`.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    type Id: Identifier;

    /// Singular, lowercase name of the aggregate (`"agent"`).
    const KIND: &'static str;

    fn fields() -> &'static [FieldDescriptor];

    /// `None` until an identifier is assigned by the constructor or by the
    /// repository on first persistence.
    fn id(&self) -> Option<Self::Id>;

    fn assign_id(&mut self, id: Self::Id);

    fn to_record(&self) -> Result<Record, ValidationError>;

    fn from_record(record: Record) -> Result<Self, ValidationError>;

    fn field(name: &str) -> Option<&'static FieldDescriptor> {
        Self::fields().iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    struct SampleId(Uuid);

    impl fmt::Display for SampleId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Identifier for SampleId {
        fn from_uuid(uuid: Uuid) -> Self {
            Self(uuid)
        }

        fn as_uuid(&self) -> Uuid {
            self.0
        }
    }

    #[test]
    fn test_identifier_parse_rejects_empty() {
        assert!(SampleId::parse("").is_err());
        assert!(SampleId::parse("   ").is_err());
        assert!(SampleId::parse("not-a-uuid").is_err());

        let id = SampleId::generate();
        assert_eq!(SampleId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_record_typed_access() {
        let mut record = Record::new()
            .with("name", "helper")
            .with("count", 3_i64)
            .with("title", None::<String>);

        assert_eq!(record.take_text("name").unwrap(), "helper");
        assert_eq!(record.take_float("count").unwrap(), 3.0);
        assert_eq!(record.take_optional_text("title").unwrap(), None);

        let err = record.take_bool("missing").unwrap_err();
        assert_eq!(err.field, "missing");
        assert!(err.reason.contains("found null"));
    }

    #[test]
    fn test_value_fits_kind() {
        assert!(FieldValue::Text("x".into()).fits(FieldKind::Text));
        assert!(FieldValue::Null.fits(FieldKind::Timestamp));
        assert!(!FieldValue::Integer(1).fits(FieldKind::Text));
        assert!(!FieldValue::Structured(serde_json::json!({})).fits(FieldKind::Opaque("Vec<u8>")));
    }
}
