// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Plugin registry - owns plugins and runs one detection task per plugin

use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Plugin;
use crate::core::StateEvent;
use crate::error::PulseError;

/// Upper bound on events drained from one plugin per tick
const MAX_EVENTS_PER_TICK: usize = 64;

const MIN_TICK: Duration = Duration::from_millis(10);

/// Messages from plugin tasks to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PluginMessage {
    Event(StateEvent),
    Availability {
        source: String,
        available: bool,
        running: bool,
    },
}

struct PluginTask {
    name: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<Box<dyn Plugin>>,
}

/// Explicitly constructed plugin registry.
///
/// Plugins are held here while idle. [`PluginRegistry::start_all`] moves each
/// one into its own task; [`PluginRegistry::stop_all`] signals the tasks and
/// takes the plugins back once they have stopped.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
    tasks: Vec<PluginTask>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.names().iter().any(|n| *n == name) {
            return Err(PulseError::DuplicatePlugin(name).into());
        }
        info!("Registered plugin: {} ({:?})", name, plugin.metadata().category());
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .iter()
            .map(|p| p.name().to_string())
            .chain(self.tasks.iter().map(|t| t.name.clone()))
            .collect()
    }

    /// Fusion weight of every registered plugin
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.plugins
            .iter()
            .map(|p| (p.name().to_string(), p.weight()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len() + self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_started(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn a detection task for every idle plugin.
    pub fn start_all(&mut self, tx: mpsc::Sender<PluginMessage>) {
        for plugin in self.plugins.drain(..) {
            let name = plugin.name().to_string();
            let (stop, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(run_plugin(plugin, tx.clone(), stop_rx));
            debug!("Spawned detection task for {}", name);
            self.tasks.push(PluginTask { name, stop, handle });
        }
    }

    /// Stop every task and wait for it to finish.
    pub async fn stop_all(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.stop.send(true);
            match task.handle.await {
                Ok(plugin) => self.plugins.push(plugin),
                Err(e) => warn!("Plugin task {} ended abnormally: {}", task.name, e),
            }
        }
    }
}

async fn run_plugin(
    mut plugin: Box<dyn Plugin>,
    tx: mpsc::Sender<PluginMessage>,
    mut stop: watch::Receiver<bool>,
) -> Box<dyn Plugin> {
    let name = plugin.name().to_string();
    let mut reported: Option<(bool, bool)> = None;

    let mut ticker = interval(plugin.check_interval().max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'run: loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break 'run;
                }
            }
            _ = ticker.tick() => {
                let available = plugin.check_available();
                if available && !plugin.is_running() {
                    if let Err(e) = plugin.start().await {
                        warn!("[{}] start failed: {}", name, e);
                    }
                }

                let state = (available, plugin.is_running());
                if reported != Some(state) {
                    reported = Some(state);
                    let message = PluginMessage::Availability {
                        source: name.clone(),
                        available: state.0,
                        running: state.1,
                    };
                    if tx.send(message).await.is_err() {
                        break 'run;
                    }
                }

                if !(available && plugin.is_running()) {
                    continue;
                }

                for _ in 0..MAX_EVENTS_PER_TICK {
                    let Some(event) = plugin.detect().await else {
                        break;
                    };
                    plugin.emit(&event);
                    if tx.send(PluginMessage::Event(event)).await.is_err() {
                        break 'run;
                    }
                }
            }
        }
    }

    if let Err(e) = plugin.stop().await {
        warn!("[{}] stop failed: {}", name, e);
    }
    if reported.is_some_and(|(available, running)| available || running) {
        let _ = tx.try_send(PluginMessage::Availability {
            source: name.clone(),
            available: false,
            running: false,
        });
    }
    debug!("Detection task for {} finished", name);
    plugin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Callbacks, PluginCategory, PluginMetadata, Status};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct Scripted {
        metadata: PluginMetadata,
        script: VecDeque<Status>,
        running: bool,
        callbacks: Callbacks<StateEvent>,
    }

    impl Scripted {
        fn boxed(name: &str, script: &[Status]) -> Box<dyn Plugin> {
            Box::new(Self {
                metadata: PluginMetadata::new(name, "0.0.0", "test", PluginCategory::Custom, &[], &[], ""),
                script: script.iter().copied().collect(),
                running: false,
                callbacks: Callbacks::new(name),
            })
        }
    }

    #[async_trait]
    impl Plugin for Scripted {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn check_available(&mut self) -> bool {
            true
        }

        async fn start(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.running = false;
            Ok(())
        }

        async fn detect(&mut self) -> Option<StateEvent> {
            let status = self.script.pop_front()?;
            Some(StateEvent::new(status, 0.9, self.metadata.name()))
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn check_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn callbacks(&self) -> &Callbacks<StateEvent> {
            &self.callbacks
        }

        fn callbacks_mut(&mut self) -> &mut Callbacks<StateEvent> {
            &mut self.callbacks
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(Scripted::boxed("a", &[])).unwrap();
        assert!(registry.register(Scripted::boxed("a", &[])).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_tasks_forward_events_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut registry = PluginRegistry::new();
        registry
            .register(Scripted::boxed("a", &[Status::Idle, Status::Working, Status::Done]))
            .unwrap();
        registry.start_all(tx);
        assert!(registry.is_started());

        let mut statuses = Vec::new();
        while statuses.len() < 3 {
            match rx.recv().await.unwrap() {
                PluginMessage::Event(e) => statuses.push(e.status()),
                PluginMessage::Availability { available, running, .. } => {
                    assert!(available && running);
                }
            }
        }
        assert_eq!(statuses, vec![Status::Idle, Status::Working, Status::Done]);

        registry.stop_all().await;
        assert!(!registry.is_started());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.weights(), vec![("a".to_string(), 0.5)]);
        // nothing but the final availability notice after stop
        let mut leftovers = Vec::new();
        while let Ok(message) = rx.try_recv() {
            leftovers.push(message);
        }
        assert_eq!(
            leftovers,
            vec![PluginMessage::Availability {
                source: "a".into(),
                available: false,
                running: false,
            }]
        );
    }
}
