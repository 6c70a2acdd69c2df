// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Simulated assistant activity for demo/testing

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::prelude::*;
use tracing::{debug, info};

use super::{EdgeTrigger, Plugin};
use crate::config::SimulatorConfig;
use crate::core::{Callbacks, PluginCategory, PluginMetadata, StateEvent, Status};

/// Statuses a simulated assistant moves between, with relative likelihood
const WALK: &[(Status, u32)] = &[
    (Status::Idle, 4),
    (Status::Running, 2),
    (Status::Thinking, 3),
    (Status::Reading, 2),
    (Status::Writing, 2),
    (Status::Executing, 2),
    (Status::Working, 3),
    (Status::Error, 1),
    (Status::Done, 1),
];

const TOOLS: &[&str] = &["Read", "Edit", "Bash", "Grep", "Write", "WebFetch"];

/// Random walk over statuses, always available
pub struct SimulatorPlugin {
    metadata: PluginMetadata,
    rng: StdRng,
    change_probability: f64,
    check_interval: Duration,
    weight: f64,
    current: Status,
    running: bool,
    edge: EdgeTrigger,
    callbacks: Callbacks<StateEvent>,
}

impl SimulatorPlugin {
    pub const NAME: &'static str = "simulator";

    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            metadata: PluginMetadata::new(
                Self::NAME,
                env!("CARGO_PKG_VERSION"),
                "PulseCat",
                PluginCategory::Custom,
                &["demo"],
                &[],
                "Simulated activity for demos and tests",
            ),
            rng,
            change_probability: config.change_probability.clamp(0.0, 1.0),
            check_interval: Duration::from_millis(config.check_interval_ms),
            weight: config.weight,
            current: Status::Idle,
            running: false,
            edge: EdgeTrigger::new(),
            callbacks: Callbacks::new(Self::NAME),
        }
    }

    fn step(&mut self) -> Status {
        if self.rng.gen_bool(self.change_probability) {
            let total: u32 = WALK.iter().map(|(_, w)| w).sum();
            let mut pick = self.rng.gen_range(0..total);
            for (status, w) in WALK {
                if pick < *w {
                    self.current = *status;
                    break;
                }
                pick -= w;
            }
        }
        self.current
    }
}

#[async_trait]
impl Plugin for SimulatorPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn check_available(&mut self) -> bool {
        true
    }

    async fn start(&mut self) -> Result<()> {
        if !self.running {
            self.running = true;
            info!("[{}] Started", Self::NAME);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            info!("[{}] Stopped", Self::NAME);
        }
        Ok(())
    }

    async fn detect(&mut self) -> Option<StateEvent> {
        let status = self.step();
        if !self.edge.fire(status) {
            return None;
        }

        let confidence = self.rng.gen_range(0.6..0.98);
        let mut event = StateEvent::new(status, confidence, Self::NAME)
            .with_detail("event", "simulated")
            .with_priority(self.priority());

        match status {
            Status::Reading | Status::Writing | Status::Executing | Status::Working => {
                if let Some(tool) = TOOLS.choose(&mut self.rng) {
                    event = event.with_detail("tool", *tool);
                }
            }
            Status::Idle | Status::Done => {
                let input = self.rng.gen_range(200..4000u64);
                let output = self.rng.gen_range(50..1500u64);
                let cache_read = self.rng.gen_range(0..20000u64);
                event = event.with_detail(
                    "tokens",
                    serde_json::json!({ "input": input, "output": output, "cache_read": cache_read }),
                );
            }
            _ => {}
        }

        debug!("[{}] -> {} ({:.2})", Self::NAME, status, confidence);
        Some(event)
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn check_interval(&self) -> Duration {
        self.check_interval
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn callbacks(&self) -> &Callbacks<StateEvent> {
        &self.callbacks
    }

    fn callbacks_mut(&mut self) -> &mut Callbacks<StateEvent> {
        &mut self.callbacks
    }
}
