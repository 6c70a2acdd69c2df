// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! PulseCat - coding-assistant activity monitor
//!
//! Watches a coding assistant through independent detection plugins,
//! fuses their votes into one status and pushes it to status displays.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        PulseCat Engine                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌────────────┐   │
//! │  │ Plugins  │ → │ Privacy │ → │  Tokens  │ → │   Fusion   │   │
//! │  │ log/proc │   │ Filter  │   │ Sessions │   │   Engine   │   │
//! │  └──────────┘   └─────────┘   └──────────┘   └────────────┘   │
//! │                                                    ↓          │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │                        Event Bus                        │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │        ↓              ↓              ↓              ↓         │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐   │
//! │  │  Stdout  │   │ WebSocket │   │   HTTP   │   │   MQTT   │   │
//! │  └──────────┘   └───────────┘   └──────────┘   └──────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod fusion;
pub mod middleware;
pub mod plugins;

// Re-exports for convenience
pub use adapters::{adapters_from_config, OutputAdapter};
pub use config::Config;
pub use core::{Engine, EventBus, PipelineHandle, StateEvent, Status};
pub use error::PulseError;
pub use fusion::{FusionEngine, FusionResult};
pub use plugins::{registry_from_config, Plugin, PluginRegistry};

/// PulseCat version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// PulseCat name
pub const NAME: &str = "PulseCat";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: String,
    /// Target architecture
    pub target: String,
    pub os: String,
    pub features: Vec<String>,
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "mqtt")]
    features.push("mqtt".to_string());

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, VERSION);
        assert_eq!(info.os, std::env::consts::OS);
        assert_eq!(info.features.contains(&"mqtt".to_string()), cfg!(feature = "mqtt"));
    }
}
