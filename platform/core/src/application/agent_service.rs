// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Service - Application Layer
//!
//! Use cases over agents and their conversations. The service only sees
//! repository ports; which backend sits behind them is decided by the
//! repository factory.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Agent and conversation use cases

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Settings;
use crate::domain::agent::{Agent, AgentId, AgentRole, ModelSettings};
use crate::domain::conversation::{Conversation, ConversationId, Message, MessageRole};
use crate::domain::entity::ValidationError;
use crate::domain::repository::{FilterSpec, Repository, RepositoryError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Repository(e) if e.is_not_found())
    }
}

/// Input for [`AgentService::create_agent`]. Unset model parameters fall
/// back to the `AGENTS_DEFAULT_*` settings.
#[derive(Debug, Clone, Default)]
pub struct CreateAgentRequest {
    pub name: String,
    pub role: Option<AgentRole>,
    pub system_prompt: Option<String>,
    /// Creates a researcher focused on this domain.
    pub research_domain: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl CreateAgentRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub display_name: String,
    pub model: String,
    pub configured: bool,
    pub tools_enabled: bool,
    pub memory_enabled: bool,
    pub conversations: usize,
    pub messages: usize,
}

#[async_trait]
pub trait AgentService: Send + Sync {
    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentId, ServiceError>;
    async fn get_agent(&self, id: AgentId) -> Result<Agent, ServiceError>;
    async fn start_conversation(&self, agent_id: AgentId, title: Option<String>)
        -> Result<ConversationId, ServiceError>;
    async fn record_message(
        &self,
        conversation_id: ConversationId,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, ServiceError>;
    async fn conversation_history(&self, conversation_id: ConversationId) -> Result<Conversation, ServiceError>;
    async fn agent_conversations(&self, agent_id: AgentId) -> Result<Vec<Conversation>, ServiceError>;
    /// Trailing messages handed to a completion provider.
    async fn prompt_window(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ServiceError>;
    async fn agent_status(&self, agent_id: AgentId) -> Result<AgentStatus, ServiceError>;
}

/// Standard implementation over repository ports.
///
/// Appends to one conversation are serialised per conversation id within
/// this instance, so concurrent `record_message` calls never overwrite each
/// other's messages.
pub struct StandardAgentService {
    agents: Arc<dyn Repository<Agent>>,
    conversations: Arc<dyn Repository<Conversation>>,
    defaults: ModelSettings,
    history_window: usize,
    conversation_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl StandardAgentService {
    pub fn new(
        agents: Arc<dyn Repository<Agent>>,
        conversations: Arc<dyn Repository<Conversation>>,
        settings: &Settings,
    ) -> Self {
        Self {
            agents,
            conversations,
            defaults: ModelSettings {
                model: settings.agents.default_model.clone(),
                temperature: settings.agents.default_temperature,
                max_tokens: settings.agents.default_max_tokens,
            },
            history_window: settings.conversations.history_window,
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    fn conversation_lock(&self, id: ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        self.conversation_locks.lock().entry(id).or_default().clone()
    }

    /// Drop the lock entry once no caller holds or waits on it.
    fn release_conversation_lock(&self, id: ConversationId) {
        let mut locks = self.conversation_locks.lock();
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    async fn conversation(&self, id: ConversationId) -> Result<Conversation, ServiceError> {
        self.conversations
            .read(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found::<Conversation>(id).into())
    }
}

#[async_trait]
impl AgentService for StandardAgentService {
    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentId, ServiceError> {
        let model = ModelSettings {
            model: request.model.unwrap_or_else(|| self.defaults.model.clone()),
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
        };

        let agent = match (request.research_domain, request.system_prompt) {
            (Some(domain), _) => Agent::researcher(request.name, &domain, model)?,
            (None, Some(prompt)) => Agent::new(
                request.name,
                request.role.unwrap_or(AgentRole::Assistant),
                prompt,
                model,
            )?,
            (None, None) => Agent::assistant(request.name, model)?,
        };

        let name = agent.display_name();
        let id = self.agents.create(agent).await?;
        info!(agent_id = %id, agent = %name, "Agent created");
        Ok(id)
    }

    async fn get_agent(&self, id: AgentId) -> Result<Agent, ServiceError> {
        self.agents
            .read(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found::<Agent>(id).into())
    }

    async fn start_conversation(
        &self,
        agent_id: AgentId,
        title: Option<String>,
    ) -> Result<ConversationId, ServiceError> {
        let agent = self.get_agent(agent_id).await?;

        let mut conversation = Conversation::new(agent_id, title)?;
        conversation.add_system_message(agent.system_prompt())?;
        let id = self.conversations.create(conversation).await?;

        debug!(conversation_id = %id, %agent_id, "Conversation started");
        Ok(id)
    }

    async fn record_message(
        &self,
        conversation_id: ConversationId,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, ServiceError> {
        let message = Message::new(role, content)?;

        let lock = self.conversation_lock(conversation_id);
        let appended = {
            let _held = lock.lock().await;
            match self.conversation(conversation_id).await {
                Ok(mut conversation) => {
                    conversation.add_message(message.clone());
                    self.conversations.update(conversation).await.map_err(ServiceError::from)
                }
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.release_conversation_lock(conversation_id);

        appended.map(|_| message)
    }

    async fn conversation_history(&self, conversation_id: ConversationId) -> Result<Conversation, ServiceError> {
        self.conversation(conversation_id).await
    }

    async fn agent_conversations(&self, agent_id: AgentId) -> Result<Vec<Conversation>, ServiceError> {
        Ok(self
            .conversations
            .list(&FilterSpec::all().eq("agent_id", agent_id))
            .await?)
    }

    async fn prompt_window(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ServiceError> {
        let conversation = self.conversation(conversation_id).await?;
        Ok(conversation.transcript(self.history_window).to_vec())
    }

    async fn agent_status(&self, agent_id: AgentId) -> Result<AgentStatus, ServiceError> {
        let agent = self.get_agent(agent_id).await?;
        let conversations = self.agent_conversations(agent_id).await?;

        Ok(AgentStatus {
            agent_id,
            display_name: agent.display_name(),
            model: agent.model_config().model.clone(),
            configured: agent.is_configured(),
            tools_enabled: agent.tools_enabled(),
            memory_enabled: agent.memory_enabled(),
            conversations: conversations.len(),
            messages: conversations.iter().map(Conversation::message_count).sum(),
        })
    }
}
