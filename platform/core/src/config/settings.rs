// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Typed Settings
//!
//! One shared (root) section and one section per bounded context, each read
//! from a distinct key prefix:
//!
//! | Prefix | Section | Contents |
//! |--------|---------|----------|
//! | `APP_` | [`SharedSettings`] | environment, logging, storage and pooling |
//! | `AGENTS_` | [`AgentsSettings`] | model defaults, provider credentials, storage override |
//! | `CONVERSATIONS_` | [`ConversationsSettings`] | history window, storage override |
//!
//! [`Settings::from_values`] validates everything in one pass and reports
//! every problem at once. Keys under a known prefix that are not recognised
//! are rejected; keys under any other prefix are ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use super::error::{ConfigIssue, ConfigurationError};
use super::source::RawValues;

pub const SHARED_PREFIX: &str = "APP_";
pub const AGENTS_PREFIX: &str = "AGENTS_";
pub const CONVERSATIONS_PREFIX: &str = "CONVERSATIONS_";

const KNOWN_PREFIXES: [&str; 3] = [SHARED_PREFIX, AGENTS_PREFIX, CONVERSATIONS_PREFIX];

const API_KEY_PLACEHOLDER: &str = "your-api-key-here";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Testing => "testing",
        }
    }

    /// Deployed environments must talk to a real completion provider.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, Environment::Production | Environment::Staging)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "testing" | "test" => Ok(Environment::Testing),
            _ => Err("expected development, staging, production or testing".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" => Ok(LogLevel::Error),
            _ => Err("expected trace, debug, info, warn or error".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err("expected compact or json".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScheme {
    Memory,
    Sqlite,
    Postgres,
}

/// A structurally valid storage connection descriptor.
///
/// Only the dependency factory interprets the location; everything else
/// treats the descriptor as opaque and logs it through [`StorageUrl::redacted`].
#[derive(Clone, PartialEq, Eq)]
pub struct StorageUrl {
    raw: String,
    scheme: StorageScheme,
}

impl StorageUrl {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (scheme, location) = raw
            .split_once("://")
            .ok_or_else(|| "expected <scheme>://<location>".to_string())?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "memory" => StorageScheme::Memory,
            "sqlite" => {
                match sqlite_file(location) {
                    "" => return Err("sqlite descriptor needs a database file path".to_string()),
                    ":memory:" => {
                        return Err("in-process sqlite databases are not durable; use memory:// instead".to_string())
                    }
                    _ => {}
                }
                StorageScheme::Sqlite
            }
            "postgres" | "postgresql" => {
                if location.trim_start_matches('/').is_empty() {
                    return Err("postgres descriptor needs a host".to_string());
                }
                StorageScheme::Postgres
            }
            other => {
                return Err(format!(
                    "unsupported storage scheme '{}'; expected memory, sqlite, postgres or postgresql",
                    other
                ))
            }
        };
        Ok(Self {
            raw: raw.to_string(),
            scheme,
        })
    }

    pub fn scheme(&self) -> StorageScheme {
        self.scheme
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Everything after `scheme://`.
    pub fn location(&self) -> &str {
        self.raw.split_once("://").map(|(_, l)| l).unwrap_or_default()
    }

    /// The descriptor with any credentials replaced by `***`.
    pub fn redacted(&self) -> String {
        redact(&self.raw)
    }
}

impl fmt::Debug for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StorageUrl").field(&self.redacted()).finish()
    }
}

impl fmt::Display for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// `sqlite:///relative.db` names `relative.db`; `sqlite:////abs/path.db`
/// names `/abs/path.db`.
pub(crate) fn sqlite_file(location: &str) -> &str {
    location.strip_prefix('/').unwrap_or(location)
}

fn redact(raw: &str) -> String {
    match raw.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{}://***@{}", scheme, host),
            None => raw.to_string(),
        },
        None => raw.to_string(),
    }
}

/// Provider credential; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Connection and pooling parameters for the shared storage descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub url: StorageUrl,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout: Duration,
    pub pool_recycle: Duration,
    pub pool_pre_ping: bool,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub auto_migrate: bool,
    pub echo: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedSettings {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentsSettings {
    pub default_model: String,
    pub default_temperature: f64,
    pub default_max_tokens: u32,
    pub openai_api_key: Option<ApiKey>,
    pub llm_base_url: Option<String>,
    pub database_url: Option<StorageUrl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationsSettings {
    pub history_window: usize,
    pub database_url: Option<StorageUrl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub shared: SharedSettings,
    pub agents: AgentsSettings,
    pub conversations: ConversationsSettings,
}

/// Serialisable startup summary with credentials removed.
#[derive(Debug, Clone, Serialize)]
pub struct StartupInfo {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub storage: BTreeMap<&'static str, String>,
    pub auto_migrate: bool,
    pub default_model: String,
    pub openai_configured: bool,
}

impl Settings {
    /// Validate merged raw values into typed settings.
    pub fn from_values(values: &RawValues) -> Result<Self, ConfigurationError> {
        let mut reader = Reader::new(values);

        let environment = reader.parsed("APP_ENVIRONMENT", Environment::Development);
        let log_level = reader.parsed("APP_LOG_LEVEL", LogLevel::Info);
        let log_format = reader.parsed("APP_LOG_FORMAT", LogFormat::Compact);
        let url = reader.storage_url("APP_DATABASE_URL", true);
        let pool_size = reader.bounded("APP_DATABASE_POOL_SIZE", 5_u32, 1..=100);
        let max_overflow = reader.bounded("APP_DATABASE_MAX_OVERFLOW", 10_u32, 0..=100);
        let pool_timeout = reader.seconds("APP_DATABASE_POOL_TIMEOUT", 30, 1..=300);
        let pool_recycle = reader.seconds("APP_DATABASE_POOL_RECYCLE", 3600, 1..=u64::MAX);
        let pool_pre_ping = reader.flag("APP_DATABASE_POOL_PRE_PING", true);
        let connect_timeout = reader.seconds("APP_DATABASE_CONNECT_TIMEOUT", 10, 1..=60);
        let operation_timeout = reader.seconds("APP_DATABASE_OPERATION_TIMEOUT", 15, 1..=300);
        let max_retries = reader.bounded("APP_DATABASE_MAX_RETRIES", 3_u32, 1..=10);
        let retry_delay_ms = reader.bounded("APP_DATABASE_RETRY_DELAY_MS", 100_u64, 1..=10_000);
        let auto_migrate = reader.flag("APP_DATABASE_AUTO_MIGRATE", true);
        let echo = reader.flag("APP_DATABASE_ECHO", false);

        let default_model = reader.text("AGENTS_DEFAULT_MODEL", crate::domain::agent::DEFAULT_MODEL);
        let default_temperature = reader.bounded(
            "AGENTS_DEFAULT_TEMPERATURE",
            crate::domain::agent::DEFAULT_TEMPERATURE,
            0.0..=2.0,
        );
        let default_max_tokens = reader.bounded(
            "AGENTS_DEFAULT_MAX_TOKENS",
            crate::domain::agent::DEFAULT_MAX_TOKENS,
            1..=u32::MAX,
        );
        let openai_api_key = reader
            .optional_text("AGENTS_OPENAI_API_KEY")
            .filter(|key| key != API_KEY_PLACEHOLDER)
            .map(ApiKey);
        let llm_base_url = reader.optional_text("AGENTS_LLM_BASE_URL");
        let agents_url = reader.storage_url("AGENTS_DATABASE_URL", false);

        let history_window = reader.bounded("CONVERSATIONS_HISTORY_WINDOW", 50_usize, 1..=1000);
        let conversations_url = reader.storage_url("CONVERSATIONS_DATABASE_URL", false);

        if environment.requires_credentials() && openai_api_key.is_none() {
            reader.issues.push(ConfigIssue::RequiredWhen {
                key: "AGENTS_OPENAI_API_KEY".to_string(),
                condition: format!("APP_ENVIRONMENT is {}", environment),
            });
        }

        reader.finish()?;

        // finish() fails whenever the required descriptor is absent.
        let url = url.ok_or_else(|| ConfigurationError::Rejected {
            issues: vec![ConfigIssue::Missing {
                key: "APP_DATABASE_URL".to_string(),
            }],
        })?;

        Ok(Settings {
            shared: SharedSettings {
                environment,
                log_level,
                log_format,
                database: DatabaseSettings {
                    url,
                    pool_size,
                    max_overflow,
                    pool_timeout,
                    pool_recycle,
                    pool_pre_ping,
                    connect_timeout,
                    operation_timeout,
                    max_retries,
                    retry_delay: Duration::from_millis(retry_delay_ms),
                    auto_migrate,
                    echo,
                },
            },
            agents: AgentsSettings {
                default_model,
                default_temperature,
                default_max_tokens,
                openai_api_key,
                llm_base_url,
                database_url: agents_url,
            },
            conversations: ConversationsSettings {
                history_window,
                database_url: conversations_url,
            },
        })
    }

    /// Storage descriptor for the `agents` context.
    pub fn agents_storage(&self) -> &StorageUrl {
        self.agents.database_url.as_ref().unwrap_or(&self.shared.database.url)
    }

    /// Storage descriptor for the `conversations` context.
    pub fn conversations_storage(&self) -> &StorageUrl {
        self.conversations
            .database_url
            .as_ref()
            .unwrap_or(&self.shared.database.url)
    }

    pub fn startup_info(&self) -> StartupInfo {
        let mut storage = BTreeMap::new();
        storage.insert("agents", self.agents_storage().redacted());
        storage.insert("conversations", self.conversations_storage().redacted());
        StartupInfo {
            environment: self.shared.environment,
            log_level: self.shared.log_level,
            storage,
            auto_migrate: self.shared.database.auto_migrate,
            default_model: self.agents.default_model.clone(),
            openai_configured: self.agents.openai_api_key.is_some(),
        }
    }
}

/// Pulls typed values out of raw input while collecting issues.
struct Reader<'a> {
    values: &'a RawValues,
    recognised: BTreeSet<&'static str>,
    issues: Vec<ConfigIssue>,
}

impl<'a> Reader<'a> {
    fn new(values: &'a RawValues) -> Self {
        Self {
            values,
            recognised: BTreeSet::new(),
            issues: Vec::new(),
        }
    }

    /// Trimmed value; blank counts as unset.
    fn raw(&mut self, key: &'static str) -> Option<&'a str> {
        self.recognised.insert(key);
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn invalid(&mut self, key: &str, value: &str, reason: impl Into<String>) {
        self.issues.push(ConfigIssue::Invalid {
            key: key.to_string(),
            value: redact(value),
            reason: reason.into(),
        });
    }

    fn text(&mut self, key: &'static str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    fn optional_text(&mut self, key: &'static str) -> Option<String> {
        self.raw(key).map(str::to_string)
    }

    fn parsed<T>(&mut self, key: &'static str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                self.invalid(key, raw, e.to_string());
                default
            }
        }
    }

    fn bounded<T>(&mut self, key: &'static str, default: T, range: RangeInclusive<T>) -> T
    where
        T: FromStr + PartialOrd + fmt::Display + Copy,
    {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.parse::<T>() {
            Ok(value) if range.contains(&value) => value,
            Ok(_) => {
                self.invalid(key, raw, format!("must be between {} and {}", range.start(), range.end()));
                default
            }
            Err(_) => {
                self.invalid(key, raw, "not a number");
                default
            }
        }
    }

    fn seconds(&mut self, key: &'static str, default: u64, range: RangeInclusive<u64>) -> Duration {
        Duration::from_secs(self.bounded(key, default, range))
    }

    fn flag(&mut self, key: &'static str, default: bool) -> bool {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                self.invalid(key, raw, "expected true or false");
                default
            }
        }
    }

    fn storage_url(&mut self, key: &'static str, required: bool) -> Option<StorageUrl> {
        let Some(raw) = self.raw(key) else {
            if required {
                self.issues.push(ConfigIssue::Missing { key: key.to_string() });
            }
            return None;
        };
        match StorageUrl::parse(raw) {
            Ok(url) => Some(url),
            Err(reason) => {
                self.invalid(key, raw, reason);
                None
            }
        }
    }

    fn finish(mut self) -> Result<(), ConfigurationError> {
        for key in self.values.keys() {
            let governed = KNOWN_PREFIXES.iter().any(|prefix| key.starts_with(prefix));
            if governed && !self.recognised.contains(key.as_str()) {
                self.issues.push(ConfigIssue::UnknownKey { key: key.clone() });
            }
        }
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Rejected { issues: self.issues })
        }
    }
}
