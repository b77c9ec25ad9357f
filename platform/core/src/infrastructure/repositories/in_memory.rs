// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-local repository for development and tests. State lives for the
//! lifetime of the instance and is never persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::entity::Entity;
use crate::domain::repository::{ensure_identity, require_identity, FilterSpec, Repository, RepositoryError};

/// In-memory implementation of [`Repository`].
///
/// Entries are keyed by id in a `BTreeMap`, which gives `list` its ascending
/// id order for free. Reads hand out clones, so callers never alias stored
/// state.
#[derive(Clone)]
pub struct InMemoryRepository<E: Entity> {
    entries: Arc<RwLock<BTreeMap<E::Id, E>>>,
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn create(&self, mut entity: E) -> Result<E::Id, RepositoryError> {
        let id = ensure_identity(&mut entity);
        // Reject entities that could not be stored by a durable backend either.
        entity.to_record()?;

        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            debug!(entity = E::KIND, %id, "Rejected duplicate create");
            return Err(RepositoryError::duplicate::<E>(id));
        }
        entries.insert(id, entity);
        Ok(id)
    }

    async fn read(&self, id: E::Id) -> Result<Option<E>, RepositoryError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn update(&self, entity: E) -> Result<(), RepositoryError> {
        let id = require_identity(&entity)?;
        entity.to_record()?;

        let mut entries = self.entries.write();
        match entries.get_mut(&id) {
            Some(stored) => {
                *stored = entity;
                Ok(())
            }
            None => Err(RepositoryError::not_found::<E>(id)),
        }
    }

    async fn delete(&self, id: E::Id) -> Result<(), RepositoryError> {
        self.entries.write().remove(&id);
        Ok(())
    }

    async fn list(&self, filter: &FilterSpec) -> Result<Vec<E>, RepositoryError> {
        filter.validate_for::<E>()?;

        let entries = self.entries.read();
        let mut matched = Vec::new();
        for entity in entries.values() {
            if filter.is_empty() || filter.matches(&entity.to_record()?) {
                matched.push(entity.clone());
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{Agent, ModelSettings};
    use crate::domain::conversation::Conversation;

    fn helper() -> Agent {
        Agent::assistant("Helper", ModelSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_identifier() {
        let repo = InMemoryRepository::<Agent>::new();
        let id = repo.create(helper()).await.unwrap();

        let stored = repo.read(id).await.unwrap().unwrap();
        assert_eq!(stored.id(), Some(id));
        assert_eq!(stored.name(), "Helper");
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_independent_copies() {
        let repo = InMemoryRepository::<Agent>::new();
        let id = repo.create(helper()).await.unwrap();

        let mut copy = repo.read(id).await.unwrap().unwrap();
        copy.rename("Changed locally").unwrap();

        assert_eq!(repo.read(id).await.unwrap().unwrap().name(), "Helper");
    }

    #[tokio::test]
    async fn test_list_filters_by_agent() {
        let agents = InMemoryRepository::<Agent>::new();
        let conversations = InMemoryRepository::<Conversation>::new();
        let first = agents.create(helper()).await.unwrap();
        let second = agents.create(helper()).await.unwrap();

        for agent_id in [first, first, second] {
            conversations
                .create(Conversation::new(agent_id, None).unwrap())
                .await
                .unwrap();
        }

        let filtered = conversations.list(&FilterSpec::all().eq("agent_id", first)).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|c| c.agent_id() == first));

        let all = conversations.list(&FilterSpec::all()).await.unwrap();
        let ids: Vec<_> = all.iter().filter_map(|c| c.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_instances_do_not_share_state() {
        let first = InMemoryRepository::<Agent>::new();
        let id = first.create(helper()).await.unwrap();

        let second = InMemoryRepository::<Agent>::new();
        assert!(second.read(id).await.unwrap().is_none());
        assert!(second.is_empty());
    }
}
