// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Error types

use std::path::PathBuf;

use thiserror::Error;

/// Typed failures surfaced through `anyhow::Result`
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("cannot access config file {path:?}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("{adapter} adapter failed to bind {addr}: {source}")]
    Bind {
        adapter: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{adapter} adapter send timed out after {timeout_ms}ms")]
    SendTimeout { adapter: String, timeout_ms: u64 },

    #[error("{adapter} adapter is not started")]
    NotStarted { adapter: &'static str },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("engine already running")]
    AlreadyRunning,
}

impl PulseError {
    pub fn bind(adapter: &'static str, addr: &str, source: std::io::Error) -> Self {
        PulseError::Bind {
            adapter,
            addr: addr.to_string(),
            source,
        }
    }
}
