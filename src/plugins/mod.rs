// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Signal plugins - each normalizes one activity signal into state events

pub mod classify;
mod log;
mod manager;
mod process;
mod simulator;
mod traits;

pub use classify::{Classified, Classifier, Observation, TranscriptInfo};
pub use log::LogPlugin;
pub use manager::{PluginMessage, PluginRegistry};
pub use process::{classify_cpu, ProcessPlugin, ProcessProbe, ProcessSample, SysinfoProbe};
pub use simulator::SimulatorPlugin;
pub use traits::*;

use anyhow::Result;
use tracing::info;

use crate::config::Config;

/// Build the registry for `config`: the simulator alone in demo mode,
/// otherwise every enabled real plugin.
pub fn registry_from_config(config: &Config) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();

    if config.demo_mode {
        info!("Demo mode: using simulated plugin");
        registry.register(Box::new(SimulatorPlugin::new(&config.plugins.simulator)))?;
        return Ok(registry);
    }

    if config.plugins.claude_log.enabled {
        registry.register(Box::new(LogPlugin::new(&config.plugins.claude_log)))?;
    }
    if config.plugins.claude_process.enabled {
        registry.register(Box::new(ProcessPlugin::from_config(&config.plugins.claude_process)))?;
    }

    Ok(registry)
}
