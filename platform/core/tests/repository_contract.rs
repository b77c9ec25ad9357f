// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One behavioural suite, run against every storage backend the factory can
//! build. Postgres runs only when `TEST_DATABASE_URL` points at a server.

use std::sync::Arc;

use agent_platform_core::application::{RepositoryBundle, RepositoryFactory};
use agent_platform_core::config::{Settings, SettingsSource};
use agent_platform_core::domain::agent::{Agent, AgentId, ModelSettings};
use agent_platform_core::domain::conversation::Conversation;
use agent_platform_core::domain::entity::Entity;
use agent_platform_core::domain::repository::{FilterSpec, Repository, RepositoryError};
use futures::future::join_all;
use uuid::Uuid;

async fn bundle(url: &str) -> RepositoryBundle {
    let values = SettingsSource::values([("APP_DATABASE_URL", url), ("APP_DATABASE_CONNECT_TIMEOUT", "5")])
        .read()
        .unwrap();
    let settings = Settings::from_values(&values).unwrap();
    RepositoryFactory::build(&settings).await.unwrap()
}

/// Names unique per run so shared databases do not leak between runs.
fn unique(name: &str) -> String {
    format!("{} {}", name, Uuid::new_v4().simple())
}

fn agent(name: &str) -> Agent {
    Agent::assistant(name, ModelSettings::default()).unwrap()
}

async fn run_contract(repositories: &RepositoryBundle) {
    let agents = repositories.agents();
    let conversations = repositories.conversations();

    create_then_read_returns_equal_entity(&agents).await;
    duplicate_create_is_rejected(&agents).await;
    update_requires_existing_entity(&agents).await;
    delete_is_idempotent(&agents).await;
    list_filters_and_orders(&agents).await;
    invalid_filters_are_rejected(&agents, &conversations).await;
    conversations_round_trip(&agents, &conversations).await;
    concurrent_creates_admit_one(&agents).await;
    racing_writes_on_one_id_succeed(&agents).await;
}

async fn create_then_read_returns_equal_entity(agents: &Arc<dyn Repository<Agent>>) {
    let mut original = Agent::researcher(unique("Scout"), "astronomy", ModelSettings::default()).unwrap();
    original.set_metadata("team", "night-sky").unwrap();

    let id = agents.create(original.clone()).await.unwrap();
    let stored = agents.read(id).await.unwrap().unwrap();

    assert_eq!(stored, original.with_id(id));
    assert!(agents.read(AgentId::new()).await.unwrap().is_none());
}

async fn duplicate_create_is_rejected(agents: &Arc<dyn Repository<Agent>>) {
    let id = AgentId::new();
    let first = agent(&unique("Original")).with_id(id);
    agents.create(first.clone()).await.unwrap();

    let mut second = first.clone();
    second.rename("Impostor").unwrap();
    let err = agents.create(second).await.unwrap_err();

    assert!(err.is_duplicate(), "expected a duplicate, got {err}");
    assert_eq!(agents.read(id).await.unwrap().unwrap(), first);
}

async fn update_requires_existing_entity(agents: &Arc<dyn Repository<Agent>>) {
    let err = agents.update(agent("Ghost").with_id(AgentId::new())).await.unwrap_err();
    assert!(err.is_not_found(), "expected not found, got {err}");

    let err = agents.update(agent("Unsaved")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(ref e) if e.field == "id"));

    let id = agents.create(agent(&unique("Before"))).await.unwrap();
    let mut changed = agents.read(id).await.unwrap().unwrap();
    changed.rename("After").unwrap();
    changed.set_tools_enabled(true);
    agents.update(changed.clone()).await.unwrap();

    assert_eq!(agents.read(id).await.unwrap().unwrap(), changed);
}

async fn delete_is_idempotent(agents: &Arc<dyn Repository<Agent>>) {
    let id = agents.create(agent(&unique("Doomed"))).await.unwrap();

    agents.delete(id).await.unwrap();
    agents.delete(id).await.unwrap();
    agents.delete(AgentId::new()).await.unwrap();

    assert!(agents.read(id).await.unwrap().is_none());
}

async fn list_filters_and_orders(agents: &Arc<dyn Repository<Agent>>) {
    let name = unique("Twin");
    for _ in 0..3 {
        agents.create(agent(&name)).await.unwrap();
    }
    agents.create(agent(&unique("Other"))).await.unwrap();

    let twins = agents.list(&FilterSpec::all().eq("name", name.as_str())).await.unwrap();
    assert_eq!(twins.len(), 3);
    assert!(twins.iter().all(|a| a.name() == name));

    let ids: Vec<AgentId> = twins.iter().filter_map(Entity::id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let narrowed = agents
        .list(&FilterSpec::all().eq("name", name.as_str()).eq("tools_enabled", true))
        .await
        .unwrap();
    assert!(narrowed.is_empty());

    let everything = agents.list(&FilterSpec::all()).await.unwrap();
    assert!(everything.len() >= 4);
}

async fn invalid_filters_are_rejected(
    agents: &Arc<dyn Repository<Agent>>,
    conversations: &Arc<dyn Repository<Conversation>>,
) {
    let err = agents.list(&FilterSpec::all().eq("nickname", "x")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(ref e) if e.field == "nickname"));

    let err = agents.list(&FilterSpec::all().eq("max_tokens", "lots")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(_)));

    let err = conversations
        .list(&FilterSpec::all().eq("messages", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(ref e) if e.field == "messages"));
}

async fn conversations_round_trip(
    agents: &Arc<dyn Repository<Agent>>,
    conversations: &Arc<dyn Repository<Conversation>>,
) {
    let agent_id = agents.create(agent(&unique("Talker"))).await.unwrap();

    let mut titled = Conversation::new(agent_id, Some("Trip planning".to_string())).unwrap();
    titled.add_user_message("Where should I go in May?").unwrap();
    titled.add_assistant_message("Lisbon is lovely in May.").unwrap();
    let titled_id = conversations.create(titled.clone()).await.unwrap();
    let untitled_id = conversations.create(Conversation::new(agent_id, None).unwrap()).await.unwrap();

    let stored = conversations.read(titled_id).await.unwrap().unwrap();
    assert_eq!(stored, titled.with_id(titled_id));
    assert_eq!(stored.message_count(), 2);

    let untitled = conversations.read(untitled_id).await.unwrap().unwrap();
    assert_eq!(untitled.title(), None);

    let owned = conversations
        .list(&FilterSpec::all().eq("agent_id", agent_id))
        .await
        .unwrap();
    assert_eq!(owned.len(), 2);

    let untitled_only = conversations
        .list(&FilterSpec::all().eq("agent_id", agent_id).eq("title", None::<String>))
        .await
        .unwrap();
    assert_eq!(untitled_only.len(), 1);
    assert_eq!(untitled_only[0].id(), Some(untitled_id));
}

async fn concurrent_creates_admit_one(agents: &Arc<dyn Repository<Agent>>) {
    let id = AgentId::new();
    let left = agent(&unique("Left")).with_id(id);
    let right = agent(&unique("Right")).with_id(id);

    let (a, b) = tokio::join!(agents.create(left), agents.create(right));
    let outcomes = [a, b];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_duplicate()))
            .count(),
        1
    );
}

async fn racing_writes_on_one_id_succeed(agents: &Arc<dyn Repository<Agent>>) {
    for _ in 0..20 {
        let id = AgentId::new();
        let (created, deleted) = tokio::join!(
            agents.create(agent(&unique("Racer")).with_id(id)),
            agents.delete(id)
        );
        assert_eq!(created.unwrap(), id);
        deleted.unwrap();
    }

    let id = agents.create(agent(&unique("Shared"))).await.unwrap();
    let stored = agents.read(id).await.unwrap().unwrap();
    let renames: Vec<Agent> = (0..10)
        .map(|i| {
            let mut changed = stored.clone();
            changed.rename(&format!("Shared {}", i)).unwrap();
            changed
        })
        .collect();
    let outcomes = join_all(renames.iter().cloned().map(|changed| agents.update(changed))).await;

    assert!(outcomes.iter().all(Result::is_ok), "{:?}", outcomes);
    let last = agents.read(id).await.unwrap().unwrap();
    assert!(renames.contains(&last));
}

#[tokio::test]
async fn test_in_memory_contract() {
    let repositories = bundle("memory://").await;
    run_contract(&repositories).await;
    repositories.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_contract() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:///{}", dir.path().join("contract.db").display());

    let repositories = bundle(&url).await;
    run_contract(&repositories).await;
    repositories.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_contract_with_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let agents = format!("sqlite:///{}", dir.path().join("agents.db").display());
    let conversations = format!("sqlite:///{}", dir.path().join("nested/conversations.db").display());

    let values = SettingsSource::values([
        ("APP_DATABASE_URL", "memory://"),
        ("AGENTS_DATABASE_URL", agents.as_str()),
        ("CONVERSATIONS_DATABASE_URL", conversations.as_str()),
    ])
    .read()
    .unwrap();
    let repositories = RepositoryFactory::build(&Settings::from_values(&values).unwrap())
        .await
        .unwrap();

    run_contract(&repositories).await;
    assert!(dir.path().join("nested/conversations.db").exists());
    repositories.shutdown().await;
}

#[tokio::test]
async fn test_postgres_contract() {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping PostgreSQL contract");
        return;
    };

    let repositories = bundle(&url).await;
    run_contract(&repositories).await;
    repositories.shutdown().await;
}
