// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Event model - statuses, state events and plugin descriptors

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Producer-defined detail payload. Keys keep insertion order.
pub type Details = serde_json::Map<String, Value>;

/// Activity classification reported by a signal source.
///
/// Variants are declared in priority order; [`Status::priority`] is the
/// table used to break ties in the fusion vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotRunning,
    Idle,
    Running,
    Reading,
    Writing,
    Thinking,
    Executing,
    Working,
    Error,
    Done,
}

impl Status {
    /// Every status, lowest priority first.
    pub const ALL: [Status; 10] = [
        Status::NotRunning,
        Status::Idle,
        Status::Running,
        Status::Reading,
        Status::Writing,
        Status::Thinking,
        Status::Executing,
        Status::Working,
        Status::Error,
        Status::Done,
    ];

    /// Tie-break priority, higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Status::NotRunning => 0,
            Status::Idle => 1,
            Status::Running => 2,
            Status::Reading => 3,
            Status::Writing => 4,
            Status::Thinking => 5,
            Status::Executing => 6,
            Status::Working => 7,
            Status::Error => 8,
            Status::Done => 9,
        }
    }

    /// Statuses that boost fused confidence when any source reports them.
    pub fn is_high_significance(self) -> bool {
        matches!(self, Status::Error | Status::Done | Status::Working)
    }

    /// Wire name (`snake_case`).
    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotRunning => "not_running",
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Reading => "reading",
            Status::Writing => "writing",
            Status::Thinking => "thinking",
            Status::Executing => "executing",
            Status::Working => "working",
            Status::Error => "error",
            Status::Done => "done",
        }
    }

    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            Status::NotRunning => "Not Running",
            Status::Idle => "Idle",
            Status::Running => "Running",
            Status::Reading => "Reading",
            Status::Writing => "Writing",
            Status::Thinking => "Thinking",
            Status::Executing => "Executing",
            Status::Working => "Working",
            Status::Error => "Error",
            Status::Done => "Done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown status '{}'", s))
    }
}

/// Clamp a confidence value into `[0, 1]`. NaN collapses to 0.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(clamp_confidence(raw))
}

/// Normalized unit of observation emitted by a plugin.
///
/// The value is immutable: builder methods consume `self` and return a new
/// event. Confidence is clamped on every construction path, including
/// deserialization from the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    status: Status,
    #[serde(deserialize_with = "deserialize_confidence")]
    confidence: f64,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    details: Details,
    #[serde(default)]
    priority: i32,
}

impl StateEvent {
    pub fn new(status: Status, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            status,
            confidence: clamp_confidence(confidence),
            source: source.into(),
            timestamp: Utc::now(),
            details: Details::new(),
            priority: 0,
        }
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    /// Add or replace a single detail key.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// String-valued detail lookup
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    System,
    Window,
    File,
    Network,
    Process,
    Custom,
}

/// Static plugin descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    name: String,
    version: String,
    author: String,
    category: PluginCategory,
    supported_targets: Vec<String>,
    dependencies: Vec<String>,
    description: String,
}

impl PluginMetadata {
    pub fn new(
        name: &str,
        version: &str,
        author: &str,
        category: PluginCategory,
        supported_targets: &[&str],
        dependencies: &[&str],
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            author: author.to_string(),
            category,
            supported_targets: supported_targets.iter().map(|s| s.to_string()).collect(),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            description: description.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn category(&self) -> PluginCategory {
        self.category
    }

    pub fn supported_targets(&self) -> &[String] {
        &self.supported_targets
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}
