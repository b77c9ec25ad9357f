// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{now, Entity, FieldDescriptor, FieldKind, FieldValue, Identifier, Record, ValidationError};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, ValidationError> {
        <Self as Identifier>::parse(s)
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Identifier for AgentId {
    fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<AgentId> for FieldValue {
    fn from(id: AgentId) -> Self {
        FieldValue::Identifier(id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Assistant,
    Researcher,
    Analyst,
    Creative,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Assistant => "assistant",
            AgentRole::Researcher => "researcher",
            AgentRole::Analyst => "analyst",
            AgentRole::Creative => "creative",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" => Ok(AgentRole::Assistant),
            "researcher" => Ok(AgentRole::Researcher),
            "analyst" => Ok(AgentRole::Analyst),
            "creative" => Ok(AgentRole::Creative),
            other => Err(ValidationError::new("role", format!("unknown agent role '{}'", other))),
        }
    }
}

/// Language model parameters an agent runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::new("model", "model name cannot be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::new(
                "temperature",
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::new("max_tokens", "must be at least 1"));
        }
        Ok(())
    }
}

/// A configured conversational agent.
///
/// Fields are private; the aggregate only changes through its behaviour
/// methods, each of which re-validates and refreshes `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: Option<AgentId>,
    name: String,
    role: AgentRole,
    system_prompt: String,
    model: ModelSettings,
    tools_enabled: bool,
    memory_enabled: bool,
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        role: AgentRole,
        system_prompt: impl Into<String>,
        model: ModelSettings,
    ) -> Result<Self, ValidationError> {
        let timestamp = now();
        let agent = Self {
            id: None,
            name: name.into().trim().to_string(),
            role,
            system_prompt: system_prompt.into(),
            model,
            tools_enabled: false,
            memory_enabled: true,
            metadata: BTreeMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
        };
        agent.validate()?;
        Ok(agent)
    }

    /// A general-purpose helpful assistant.
    pub fn assistant(name: impl Into<String>, model: ModelSettings) -> Result<Self, ValidationError> {
        let name = name.into();
        let prompt = format!(
            "You are {}, a helpful AI assistant. Answer clearly and accurately, \
             and say so when you are unsure.",
            name.trim()
        );
        Self::new(name, AgentRole::Assistant, prompt, model)
    }

    /// A research agent focused on `domain`. Runs cooler than the default
    /// model settings and has tools enabled.
    pub fn researcher(
        name: impl Into<String>,
        domain: &str,
        model: ModelSettings,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let prompt = format!(
            "You are {}, a research assistant specialising in {}. Cite sources, \
             separate facts from speculation and summarise findings concisely.",
            name.trim(),
            domain
        );
        let model = ModelSettings {
            temperature: 0.3,
            ..model
        };
        let mut agent = Self::new(name, AgentRole::Researcher, prompt, model)?;
        agent.tools_enabled = true;
        agent.metadata.insert("research_domain".to_string(), domain.to_string());
        Ok(agent)
    }

    pub fn with_id(mut self, id: AgentId) -> Self {
        self.id = Some(id);
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "agent name cannot be empty"));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(ValidationError::new("system_prompt", "system prompt cannot be empty"));
        }
        self.model.validate()
    }

    fn touch(&mut self) {
        self.updated_at = now().max(self.updated_at);
    }

    pub fn rename(&mut self, name: &str) -> Result<(), ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "agent name cannot be empty"));
        }
        self.name = name.to_string();
        self.touch();
        Ok(())
    }

    pub fn update_system_prompt(&mut self, prompt: &str) -> Result<(), ValidationError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::new("system_prompt", "system prompt cannot be empty"));
        }
        self.system_prompt = prompt.to_string();
        self.touch();
        Ok(())
    }

    pub fn configure_model(&mut self, model: ModelSettings) -> Result<(), ValidationError> {
        model.validate()?;
        self.model = model;
        self.touch();
        Ok(())
    }

    pub fn set_tools_enabled(&mut self, enabled: bool) {
        self.tools_enabled = enabled;
        self.touch();
    }

    pub fn set_memory_enabled(&mut self, enabled: bool) {
        self.memory_enabled = enabled;
        self.touch();
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), ValidationError> {
        if key.trim().is_empty() {
            return Err(ValidationError::new("metadata", "metadata key cannot be empty"));
        }
        self.metadata.insert(key.to_string(), value.to_string());
        self.touch();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_config(&self) -> &ModelSettings {
        &self.model
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled
    }

    pub fn memory_enabled(&self) -> bool {
        self.memory_enabled
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

    /// "Name (role)"
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.role)
    }

    pub fn is_configured(&self) -> bool {
        self.validate().is_ok()
    }
}

const AGENT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::required("id", FieldKind::Identifier),
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::required("role", FieldKind::Text),
    FieldDescriptor::required("system_prompt", FieldKind::Text),
    FieldDescriptor::required("model", FieldKind::Text),
    FieldDescriptor::required("temperature", FieldKind::Float),
    FieldDescriptor::required("max_tokens", FieldKind::Integer),
    FieldDescriptor::required("tools_enabled", FieldKind::Boolean),
    FieldDescriptor::required("memory_enabled", FieldKind::Boolean),
    FieldDescriptor::required("metadata", FieldKind::Structured),
    FieldDescriptor::required("created_at", FieldKind::Timestamp),
    FieldDescriptor::required("updated_at", FieldKind::Timestamp),
];

impl Entity for Agent {
    type Id = AgentId;

    const KIND: &'static str = "agent";

    fn fields() -> &'static [FieldDescriptor] {
        AGENT_FIELDS
    }

    fn id(&self) -> Option<AgentId> {
        self.id
    }

    fn assign_id(&mut self, id: AgentId) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Result<Record, ValidationError> {
        Ok(Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("role", self.role.as_str())
            .with("system_prompt", self.system_prompt.as_str())
            .with("model", self.model.model.as_str())
            .with("temperature", self.model.temperature)
            .with("max_tokens", i64::from(self.model.max_tokens))
            .with("tools_enabled", self.tools_enabled)
            .with("memory_enabled", self.memory_enabled)
            .with("metadata", FieldValue::structured("metadata", &self.metadata)?)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at))
    }

    fn from_record(mut record: Record) -> Result<Self, ValidationError> {
        let max_tokens = record.take_integer("max_tokens")?;
        let agent = Self {
            id: Some(record.take_identifier("id")?),
            name: record.take_text("name")?,
            role: record.take_text("role")?.parse()?,
            system_prompt: record.take_text("system_prompt")?,
            model: ModelSettings {
                model: record.take_text("model")?,
                temperature: record.take_float("temperature")?,
                max_tokens: u32::try_from(max_tokens)
                    .map_err(|_| ValidationError::new("max_tokens", format!("{} is out of range", max_tokens)))?,
            },
            tools_enabled: record.take_bool("tools_enabled")?,
            memory_enabled: record.take_bool("memory_enabled")?,
            metadata: record.take_structured("metadata")?,
            created_at: record.take_timestamp("created_at")?,
            updated_at: record.take_timestamp("updated_at")?,
        };
        agent.validate()?;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_defaults() {
        let agent = Agent::new("Helper", AgentRole::Assistant, "Be helpful.", ModelSettings::default()).unwrap();
        assert_eq!(agent.id(), None);
        assert_eq!(agent.name(), "Helper");
        assert_eq!(agent.model_config().model, DEFAULT_MODEL);
        assert!(agent.memory_enabled());
        assert!(!agent.tools_enabled());
        assert_eq!(agent.created_at(), agent.updated_at());
        assert_eq!(agent.display_name(), "Helper (assistant)");
        assert!(agent.is_configured());
    }

    #[test]
    fn test_rejects_invalid_construction() {
        assert!(Agent::new("  ", AgentRole::Assistant, "p", ModelSettings::default()).is_err());
        assert!(Agent::new("a", AgentRole::Assistant, "", ModelSettings::default()).is_err());

        let hot = ModelSettings {
            temperature: 2.5,
            ..ModelSettings::default()
        };
        let err = Agent::new("a", AgentRole::Assistant, "p", hot).unwrap_err();
        assert_eq!(err.field, "temperature");

        let silent = ModelSettings {
            max_tokens: 0,
            ..ModelSettings::default()
        };
        assert!(Agent::new("a", AgentRole::Assistant, "p", silent).is_err());
    }

    #[test]
    fn test_researcher_factory() {
        let agent = Agent::researcher("Scout", "astronomy", ModelSettings::default()).unwrap();
        assert_eq!(agent.role(), AgentRole::Researcher);
        assert_eq!(agent.model_config().temperature, 0.3);
        assert!(agent.tools_enabled());
        assert_eq!(agent.metadata().get("research_domain").map(String::as_str), Some("astronomy"));
        assert!(agent.system_prompt().contains("astronomy"));
    }

    #[test]
    fn test_behaviour_refreshes_updated_at() {
        let mut agent = Agent::assistant("Helper", ModelSettings::default()).unwrap();
        let before = agent.updated_at();

        agent.rename("Helper Two").unwrap();
        assert_eq!(agent.name(), "Helper Two");
        assert!(agent.updated_at() >= before);

        assert!(agent.rename("").is_err());
        assert_eq!(agent.name(), "Helper Two");

        let err = agent
            .configure_model(ModelSettings {
                temperature: -1.0,
                ..ModelSettings::default()
            })
            .unwrap_err();
        assert_eq!(err.field, "temperature");
        assert_eq!(agent.model_config().temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_record_conversion_preserves_agent() {
        let mut agent = Agent::researcher("Scout", "biology", ModelSettings::default())
            .unwrap()
            .with_id(AgentId::new());
        agent.set_metadata("team", "lab").unwrap();

        let record = agent.to_record().unwrap();
        assert_eq!(record.len(), Agent::fields().len());
        assert_eq!(Agent::from_record(record).unwrap(), agent);
    }

    #[test]
    fn test_from_record_requires_identifier() {
        let agent = Agent::assistant("Helper", ModelSettings::default()).unwrap();
        let err = Agent::from_record(agent.to_record().unwrap()).unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Analyst".parse::<AgentRole>().unwrap(), AgentRole::Analyst);
        assert!("pilot".parse::<AgentRole>().is_err());
        assert!(AgentId::from_string("").is_err());
    }
}
