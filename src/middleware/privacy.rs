// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Detail payload redaction

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PrivacyConfig;
use crate::core::{Details, StateEvent};

/// Keys carrying raw content, never exported at the internal level
const CONTENT_KEYS: &[&str] = &["command", "content", "output", "input"];

/// Keys exported at the public level
const PUBLIC_KEYS: &[&str] = &["status", "tokens"];

/// How much of the detail payload leaves the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    /// Status and token counts only
    Public,
    /// Metadata such as tool and file names, no content
    Internal,
    /// Everything
    Full,
}

impl std::str::FromStr for PrivacyLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(PrivacyLevel::Public),
            "internal" => Ok(PrivacyLevel::Internal),
            "full" => Ok(PrivacyLevel::Full),
            other => anyhow::bail!("unknown privacy level '{}'", other),
        }
    }
}

/// Privacy filter
#[derive(Debug, Clone)]
pub struct PrivacyFilter {
    config: PrivacyConfig,
}

impl PrivacyFilter {
    pub fn new(config: PrivacyConfig) -> Self {
        Self { config }
    }

    pub fn level(&self) -> PrivacyLevel {
        self.config.level
    }

    /// Returns a new event; status, confidence, source, timestamp and priority
    /// are carried over unchanged.
    pub fn filter(&self, event: &StateEvent) -> StateEvent {
        if !self.config.enabled || self.config.dev_mode {
            return event.clone();
        }

        match self.config.level {
            PrivacyLevel::Full => event.clone(),
            PrivacyLevel::Public => event.clone().with_details(self.public(event.details())),
            PrivacyLevel::Internal => event.clone().with_details(self.internal(event.details())),
        }
    }

    fn public(&self, details: &Details) -> Details {
        details
            .iter()
            .filter(|(key, _)| PUBLIC_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn internal(&self, details: &Details) -> Details {
        let mut filtered = Details::new();

        for (key, value) in details {
            if !self.whitelisted(key) {
                continue;
            }
            if CONTENT_KEYS.contains(&key.as_str()) {
                continue;
            }
            if key == "file_path" {
                let file = match value {
                    Value::String(path) => Value::String(base_name(path).to_string()),
                    other => other.clone(),
                };
                filtered.insert("file".to_string(), file);
                continue;
            }
            filtered.insert(key.clone(), value.clone());
        }

        filtered
    }

    fn whitelisted(&self, key: &str) -> bool {
        match &self.config.whitelist {
            Some(list) if !list.is_empty() => list.iter().any(|allowed| {
                allowed == key || (key == "file" && allowed == "file_path")
            }),
            _ => true,
        }
    }
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::new(PrivacyConfig::default())
    }
}

/// Final path component, splitting on `/` and `\`.
fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}
