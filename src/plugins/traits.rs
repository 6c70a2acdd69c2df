// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Plugin traits and common types

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Callback, Callbacks, PluginMetadata, StateEvent, Status};

/// Fusion weight used when a plugin or config does not specify one
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Source-class priority stamped on events when a plugin does not override it
pub const DEFAULT_PRIORITY: i32 = 5;

/// Trait for all signal plugins.
///
/// `detect` is edge-triggered: it yields an event only when the inferred
/// status differs from the one it returned last time. Steady state yields
/// `None`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Static descriptor
    fn metadata(&self) -> &PluginMetadata;

    /// Plugin name, used as the event source
    fn name(&self) -> &str {
        self.metadata().name()
    }

    /// True iff the target can currently be observed. Never fails; any
    /// probing error reads as unavailable.
    fn check_available(&mut self) -> bool;

    /// Begin observing. Calling twice is a no-op.
    async fn start(&mut self) -> Result<()>;

    /// Stop observing. Calling twice is a no-op.
    async fn stop(&mut self) -> Result<()>;

    /// Sample the raw signal and report a status change, if any.
    async fn detect(&mut self) -> Option<StateEvent>;

    fn is_running(&self) -> bool;

    /// Delay between detection cycles
    fn check_interval(&self) -> Duration;

    /// Trust coefficient in (0, 1] used by the fusion vote
    fn weight(&self) -> f64 {
        DEFAULT_WEIGHT
    }

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn callbacks(&self) -> &Callbacks<StateEvent>;

    fn callbacks_mut(&mut self) -> &mut Callbacks<StateEvent>;

    /// Register a listener outside the pipeline
    fn register_callback(&mut self, callback: Callback<StateEvent>) {
        self.callbacks_mut().register_boxed(callback);
    }

    /// Deliver `event` to registered listeners, isolating failures.
    fn emit(&self, event: &StateEvent) -> usize {
        self.callbacks().emit(event)
    }
}

/// Remembers the last reported status so a plugin only reports changes.
#[derive(Debug, Clone, Default)]
pub struct EdgeTrigger {
    last: Option<Status>,
}

impl EdgeTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status`; true when it differs from the previous one.
    pub fn fire(&mut self, status: Status) -> bool {
        if self.last == Some(status) {
            return false;
        }
        self.last = Some(status);
        true
    }

    pub fn last(&self) -> Option<Status> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Availability and lifecycle view of a registered plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginHealth {
    pub name: String,
    pub available: bool,
    pub running: bool,
    pub weight: f64,
    pub events_emitted: u64,
    pub last_status: Option<Status>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_trigger_fires_once_per_change() {
        let mut edge = EdgeTrigger::new();
        let fired: Vec<bool> = [
            Status::Idle,
            Status::Idle,
            Status::Idle,
            Status::Working,
            Status::Working,
            Status::Idle,
        ]
        .into_iter()
        .map(|s| edge.fire(s))
        .collect();

        assert_eq!(fired, vec![true, false, false, true, false, true]);
        assert_eq!(edge.last(), Some(Status::Idle));
    }
}
