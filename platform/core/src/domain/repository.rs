// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interface
//!
//! Persistence contract shared by every aggregate root. The port is generic
//! over [`Entity`]: one trait, one error taxonomy, three implementations in
//! `crate::infrastructure::repositories`.
//!
//! | Implementation | Durability |
//! |----------------|------------|
//! | `InMemoryRepository` | process lifetime only |
//! | `SqliteRepository` | local file, write-verified |
//! | `PostgresRepository` | networked, retried on transient faults |
//!
//! Every implementation satisfies the same behavioural contract:
//!
//! - `create` on an existing id fails with [`RepositoryError::DuplicateId`]
//!   and leaves the stored entity untouched
//! - `update` on a missing id fails with [`RepositoryError::NotFound`]
//! - `delete` is idempotent
//! - `read` returns `None` for a missing id, never an error
//! - `list` returns entities in ascending id order
//! - returned entities are independent copies of stored state
//!
//! Which implementation backs a port is decided once, at startup, by
//! `crate::application::repository_factory`.

use async_trait::async_trait;

use super::agent::Agent;
use super::conversation::Conversation;
use super::entity::{Entity, FieldValue, Identifier, Record, ValidationError};

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    DuplicateId { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RepositoryError {
    pub fn not_found<E: Entity>(id: E::Id) -> Self {
        RepositoryError::NotFound {
            entity: E::KIND,
            id: id.to_string(),
        }
    }

    pub fn duplicate<E: Entity>(id: E::Id) -> Self {
        RepositoryError::DuplicateId {
            entity: E::KIND,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RepositoryError::DuplicateId { .. })
    }
}

/// One equality condition of a [`FilterSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub value: FieldValue,
}

/// Conjunction of equality conditions over scalar entity fields.
///
/// `FilterSpec::all()` matches everything. Comparing against
/// [`FieldValue::Null`] matches absent values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    conditions: Vec<Condition>,
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Reject conditions naming unknown fields, non-scalar fields, or values
    /// of the wrong kind.
    pub fn validate_for<E: Entity>(&self) -> Result<(), ValidationError> {
        for condition in &self.conditions {
            let descriptor = E::field(&condition.field).ok_or_else(|| {
                ValidationError::new(
                    condition.field.as_str(),
                    format!("{} has no field named '{}'", E::KIND, condition.field),
                )
            })?;
            if !descriptor.kind.is_scalar() {
                return Err(ValidationError::new(
                    condition.field.as_str(),
                    format!("cannot filter on {} field", descriptor.kind.name()),
                ));
            }
            if !condition.value.fits(descriptor.kind) {
                return Err(ValidationError::new(
                    condition.field.as_str(),
                    format!("filter value does not match {} field", descriptor.kind.name()),
                ));
            }
        }
        Ok(())
    }

    /// Evaluate against an entity record. Assumes [`FilterSpec::validate_for`] passed.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|condition| {
            let stored = record.get(&condition.field).unwrap_or(&FieldValue::Null);
            stored == &condition.value
        })
    }
}

/// Persistence port for aggregate `E`.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Persist a new entity, assigning an identifier if it has none.
    async fn create(&self, entity: E) -> Result<E::Id, RepositoryError>;

    async fn read(&self, id: E::Id) -> Result<Option<E>, RepositoryError>;

    /// Replace the stored state of an existing entity.
    async fn update(&self, entity: E) -> Result<(), RepositoryError>;

    /// Remove an entity. Deleting an absent id succeeds.
    async fn delete(&self, id: E::Id) -> Result<(), RepositoryError>;

    async fn list(&self, filter: &FilterSpec) -> Result<Vec<E>, RepositoryError>;
}

pub type AgentRepository = dyn Repository<Agent>;
pub type ConversationRepository = dyn Repository<Conversation>;

/// Assign a fresh identifier to an entity that has none and return its id.
pub fn ensure_identity<E: Entity>(entity: &mut E) -> E::Id {
    match entity.id() {
        Some(id) => id,
        None => {
            let id = E::Id::generate();
            entity.assign_id(id);
            id
        }
    }
}

/// The identifier of an entity that must already have been persisted.
pub fn require_identity<E: Entity>(entity: &E) -> Result<E::Id, RepositoryError> {
    entity.id().ok_or_else(|| {
        RepositoryError::Validation(ValidationError::new(
            "id",
            format!("{} has no identifier; create it first", E::KIND),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, ModelSettings};

    #[test]
    fn test_filter_validation() {
        assert!(FilterSpec::all().validate_for::<Agent>().is_ok());
        assert!(FilterSpec::all().eq("name", "Helper").validate_for::<Agent>().is_ok());

        let unknown = FilterSpec::all().eq("nickname", "x").validate_for::<Agent>().unwrap_err();
        assert_eq!(unknown.field, "nickname");

        let structured = FilterSpec::all()
            .eq("metadata", FieldValue::Structured(serde_json::json!({})))
            .validate_for::<Agent>();
        assert!(structured.is_err());

        let wrong_kind = FilterSpec::all().eq("temperature", "hot").validate_for::<Agent>();
        assert!(wrong_kind.is_err());
    }

    #[test]
    fn test_filter_matches_record() {
        let agent = Agent::assistant("Helper", ModelSettings::default())
            .unwrap()
            .with_id(AgentId::new());
        let record = agent.to_record().unwrap();

        assert!(FilterSpec::all().matches(&record));
        assert!(FilterSpec::all().eq("name", "Helper").eq("role", "assistant").matches(&record));
        assert!(!FilterSpec::all().eq("name", "Other").matches(&record));
    }

    #[test]
    fn test_identity_helpers() {
        let mut agent = Agent::assistant("Helper", ModelSettings::default()).unwrap();
        assert!(require_identity(&agent).is_err());

        let id = ensure_identity(&mut agent);
        assert_eq!(agent.id(), Some(id));
        assert_eq!(ensure_identity(&mut agent), id);
        assert_eq!(require_identity(&agent).unwrap(), id);
    }
}
