// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

/// A single problem found while validating settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    Missing { key: String },
    Invalid { key: String, value: String, reason: String },
    UnknownKey { key: String },
    /// Optional in general but required under another setting.
    RequiredWhen { key: String, condition: String },
}

impl ConfigIssue {
    pub fn key(&self) -> &str {
        match self {
            ConfigIssue::Missing { key }
            | ConfigIssue::Invalid { key, .. }
            | ConfigIssue::UnknownKey { key }
            | ConfigIssue::RequiredWhen { key, .. } => key,
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::Missing { key } => write!(f, "{}: required value is missing", key),
            ConfigIssue::Invalid { key, value, reason } => {
                write!(f, "{}: invalid value '{}': {}", key, value, reason)
            }
            ConfigIssue::UnknownKey { key } => write!(f, "{}: unknown setting", key),
            ConfigIssue::RequiredWhen { key, condition } => {
                write!(f, "{}: required when {}", key, condition)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("configuration rejected: {}", render(.issues))]
    Rejected { issues: Vec<ConfigIssue> },

    #[error("cannot read settings from {origin}: {reason}")]
    Unreadable { origin: String, reason: String },

    #[error("settings composer is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl ConfigurationError {
    /// Problems carried by a rejection; empty for other variants.
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            ConfigurationError::Rejected { issues } => issues,
            _ => &[],
        }
    }

    pub fn mentions(&self, key: &str) -> bool {
        self.issues().iter().any(|issue| issue.key() == key)
    }
}

fn render(issues: &[ConfigIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
