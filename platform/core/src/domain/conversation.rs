// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;
use super::entity::{now, Entity, FieldDescriptor, FieldKind, FieldValue, Identifier, Record, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, ValidationError> {
        <Self as Identifier>::parse(s)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Identifier for ConversationId {
    fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<ConversationId> for FieldValue {
    fn from(id: ConversationId) -> Self {
        FieldValue::Identifier(id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message; a value object owned by its conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into().trim().to_string();
        if content.is_empty() {
            return Err(ValidationError::new("content", "message content cannot be empty"));
        }
        Ok(Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: now(),
            metadata: BTreeMap::new(),
        })
    }
}

/// An ordered exchange of messages between a user and one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: Option<ConversationId>,
    agent_id: AgentId,
    title: Option<String>,
    messages: Vec<Message>,
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(agent_id: AgentId, title: Option<String>) -> Result<Self, ValidationError> {
        let title = normalize_title(title)?;
        let timestamp = now();
        Ok(Self {
            id: None,
            agent_id,
            title,
            messages: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    pub fn with_id(mut self, id: ConversationId) -> Self {
        self.id = Some(id);
        self
    }

    fn touch(&mut self) {
        self.updated_at = now().max(self.updated_at);
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn add_user_message(&mut self, content: &str) -> Result<&Message, ValidationError> {
        self.push(MessageRole::User, content)
    }

    pub fn add_assistant_message(&mut self, content: &str) -> Result<&Message, ValidationError> {
        self.push(MessageRole::Assistant, content)
    }

    pub fn add_system_message(&mut self, content: &str) -> Result<&Message, ValidationError> {
        self.push(MessageRole::System, content)
    }

    fn push(&mut self, role: MessageRole, content: &str) -> Result<&Message, ValidationError> {
        self.add_message(Message::new(role, content)?);
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn retitle(&mut self, title: Option<String>) -> Result<(), ValidationError> {
        self.title = normalize_title(title)?;
        self.touch();
        Ok(())
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), ValidationError> {
        if key.trim().is_empty() {
            return Err(ValidationError::new("metadata", "metadata key cannot be empty"));
        }
        self.metadata.insert(key.to_string(), value.to_string());
        self.touch();
        Ok(())
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == MessageRole::User)
    }

    pub fn assistant_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == MessageRole::Assistant)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The trailing `window` messages in chronological order.
    pub fn transcript(&self, window: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// One-line description such as `"Trip planning - 2 user messages, 2 responses"`.
    pub fn summary(&self) -> String {
        if self.messages.is_empty() {
            return "Empty conversation".to_string();
        }
        format!(
            "{} - {} user messages, {} responses",
            self.title.as_deref().unwrap_or("Untitled conversation"),
            self.user_messages().count(),
            self.assistant_messages().count()
        )
    }
}

fn normalize_title(title: Option<String>) -> Result<Option<String>, ValidationError> {
    match title {
        Some(title) if title.trim().is_empty() => {
            Err(ValidationError::new("title", "title cannot be blank; omit it instead"))
        }
        Some(title) => Ok(Some(title.trim().to_string())),
        None => Ok(None),
    }
}

const CONVERSATION_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::required("id", FieldKind::Identifier),
    FieldDescriptor::required("agent_id", FieldKind::Identifier),
    FieldDescriptor::optional("title", FieldKind::Text),
    FieldDescriptor::required("messages", FieldKind::Structured),
    FieldDescriptor::required("metadata", FieldKind::Structured),
    FieldDescriptor::required("created_at", FieldKind::Timestamp),
    FieldDescriptor::required("updated_at", FieldKind::Timestamp),
];

impl Entity for Conversation {
    type Id = ConversationId;

    const KIND: &'static str = "conversation";

    fn fields() -> &'static [FieldDescriptor] {
        CONVERSATION_FIELDS
    }

    fn id(&self) -> Option<ConversationId> {
        self.id
    }

    fn assign_id(&mut self, id: ConversationId) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Result<Record, ValidationError> {
        Ok(Record::new()
            .with("id", self.id)
            .with("agent_id", self.agent_id)
            .with("title", self.title.clone())
            .with("messages", FieldValue::structured("messages", &self.messages)?)
            .with("metadata", FieldValue::structured("metadata", &self.metadata)?)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at))
    }

    fn from_record(mut record: Record) -> Result<Self, ValidationError> {
        let messages: Vec<Message> = record.take_structured("messages")?;
        if messages.iter().any(|m| m.content.trim().is_empty()) {
            return Err(ValidationError::new("messages", "stored message has empty content"));
        }
        Ok(Self {
            id: Some(record.take_identifier("id")?),
            agent_id: record.take_identifier("agent_id")?,
            title: normalize_title(record.take_optional_text("title")?)?,
            messages,
            metadata: record.take_structured("metadata")?,
            created_at: record.take_timestamp("created_at")?,
            updated_at: record.take_timestamp("updated_at")?,
        })
    }
}
