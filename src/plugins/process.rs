// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Process plugin - infers activity from the CPU load of the assistant process

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sysinfo::System;
use tracing::{debug, info};

use super::{EdgeTrigger, Plugin};
use crate::config::ProcessPluginConfig;
use crate::core::{Callbacks, Details, PluginCategory, PluginMetadata, StateEvent, Status};

/// CPU thresholds in percent, checked in ascending order
const IDLE_BELOW: f64 = 0.5;
const RUNNING_BELOW: f64 = 3.0;
const THINKING_BELOW: f64 = 15.0;

/// One observed process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
}

/// Source of raw process samples.
///
/// `refresh` is called twice around the sampling interval so that CPU usage
/// is measured over that window.
pub trait ProcessProbe: Send + Sync {
    fn refresh(&mut self);

    /// Processes whose name or command line contains any keyword (case-insensitive).
    fn matching(&self, keywords: &[String]) -> Vec<ProcessSample>;
}

/// [`ProcessProbe`] backed by `sysinfo`
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn refresh(&mut self) {
        self.system.refresh_processes();
    }

    fn matching(&self, keywords: &[String]) -> Vec<ProcessSample> {
        let own_pid = std::process::id();
        self.system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .filter_map(|(pid, process)| {
                let name = process.name().to_lowercase();
                let cmdline = process.cmd().join(" ").to_lowercase();
                let hit = keywords.iter().any(|kw| {
                    let kw = kw.to_lowercase();
                    name.contains(&kw) || cmdline.contains(&kw)
                });
                hit.then(|| ProcessSample {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    cpu_percent: process.cpu_usage() as f64,
                })
            })
            .collect()
    }
}

/// Map summed CPU load to a status and confidence.
pub fn classify_cpu(process_count: usize, cpu_percent: f64) -> (Status, f64) {
    if process_count == 0 {
        (Status::NotRunning, 1.0)
    } else if cpu_percent < IDLE_BELOW {
        (Status::Idle, 0.9)
    } else if cpu_percent < RUNNING_BELOW {
        (Status::Running, 0.7)
    } else if cpu_percent < THINKING_BELOW {
        (Status::Thinking, 0.8)
    } else {
        (Status::Working, 0.85)
    }
}

/// Samples CPU usage of the monitored process over a fixed interval.
pub struct ProcessPlugin<P: ProcessProbe> {
    metadata: PluginMetadata,
    probe: P,
    keywords: Vec<String>,
    check_interval: Duration,
    sample_interval: Duration,
    weight: f64,
    running: bool,
    edge: EdgeTrigger,
    callbacks: Callbacks<StateEvent>,
}

impl ProcessPlugin<SysinfoProbe> {
    pub fn from_config(config: &ProcessPluginConfig) -> Self {
        Self::with_probe(SysinfoProbe::new(), config)
    }
}

impl<P: ProcessProbe> ProcessPlugin<P> {
    pub const NAME: &'static str = "claude_process";

    pub fn with_probe(probe: P, config: &ProcessPluginConfig) -> Self {
        Self {
            metadata: PluginMetadata::new(
                Self::NAME,
                env!("CARGO_PKG_VERSION"),
                "PulseCat",
                PluginCategory::Process,
                &["Claude Code"],
                &["sysinfo"],
                "Infers assistant activity from process CPU usage",
            ),
            probe,
            keywords: config.process_names.clone(),
            check_interval: Duration::from_millis(config.check_interval_ms),
            sample_interval: Duration::from_millis(config.sample_ms),
            weight: config.weight,
            running: false,
            edge: EdgeTrigger::new(),
            callbacks: Callbacks::new(Self::NAME),
        }
    }

    async fn sample(&mut self) -> Vec<ProcessSample> {
        self.probe.refresh();
        if !self.sample_interval.is_zero() {
            tokio::time::sleep(self.sample_interval).await;
        }
        self.probe.refresh();
        self.probe.matching(&self.keywords)
    }
}

#[async_trait]
impl<P: ProcessProbe> Plugin for ProcessPlugin<P> {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn check_available(&mut self) -> bool {
        self.probe.refresh();
        !self.probe.matching(&self.keywords).is_empty()
    }

    async fn start(&mut self) -> Result<()> {
        if !self.running {
            self.running = true;
            info!("[{}] Started (keywords: {:?})", Self::NAME, self.keywords);
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
        let processes = self.sample().await;
        let cpu_percent: f64 = processes.iter().map(|p| p.cpu_percent).sum();
        let (status, confidence) = classify_cpu(processes.len(), cpu_percent);

        if !self.edge.fire(status) {
            return None;
        }

        debug!(
            "[{}] {} processes at {:.2}% CPU -> {}",
            Self::NAME,
            processes.len(),
            cpu_percent,
            status
        );

        let mut details = Details::new();
        details.insert("process_count".into(), processes.len().into());
        if !processes.is_empty() {
            let rounded = (cpu_percent * 100.0).round() / 100.0;
            details.insert("cpu_percent".into(), rounded.into());
        }

        Some(
            StateEvent::new(status, confidence, Self::NAME)
                .with_details(details)
                .with_priority(self.priority()),
        )
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

    fn priority(&self) -> i32 {
        1
    }

    fn callbacks(&self) -> &Callbacks<StateEvent> {
        &self.callbacks
    }

    fn callbacks_mut(&mut self) -> &mut Callbacks<StateEvent> {
        &mut self.callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of CPU totals; the last one repeats.
    struct ScriptedProbe {
        script: VecDeque<Option<f64>>,
        current: Option<f64>,
    }

    impl ScriptedProbe {
        fn new(script: &[Option<f64>]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                current: None,
            }
        }
    }

    impl ProcessProbe for ScriptedProbe {
        fn refresh(&mut self) {
            if let Some(next) = self.script.pop_front() {
                self.current = next;
            }
        }

        fn matching(&self, _keywords: &[String]) -> Vec<ProcessSample> {
            self.current
                .map(|cpu| {
                    vec![ProcessSample {
                        pid: 42,
                        name: "claude".into(),
                        cpu_percent: cpu,
                    }]
                })
                .unwrap_or_default()
        }
    }

    fn config() -> ProcessPluginConfig {
        ProcessPluginConfig {
            sample_ms: 0,
            ..ProcessPluginConfig::default()
        }
    }

    #[test]
    fn test_cpu_thresholds() {
        assert_eq!(classify_cpu(0, 50.0).0, Status::NotRunning);
        assert_eq!(classify_cpu(1, 0.1).0, Status::Idle);
        assert_eq!(classify_cpu(1, 2.0).0, Status::Running);
        assert_eq!(classify_cpu(1, 10.0).0, Status::Thinking);
        assert_eq!(classify_cpu(2, 80.0).0, Status::Working);
    }

    #[tokio::test]
    async fn test_unchanged_signal_emits_once() {
        let probe = ScriptedProbe::new(&[Some(10.0)]);
        let mut plugin = ProcessPlugin::with_probe(probe, &config());
        plugin.start().await.unwrap();

        let mut emitted = 0;
        for _ in 0..20 {
            if plugin.detect().await.is_some() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn test_reports_transitions() {
        // two refreshes per detect call
        let probe = ScriptedProbe::new(&[
            Some(0.1),
            Some(0.1),
            Some(20.0),
            Some(20.0),
            None,
            None,
        ]);
        let mut plugin = ProcessPlugin::with_probe(probe, &config());

        let first = plugin.detect().await.unwrap();
        assert_eq!(first.status(), Status::Idle);
        assert_eq!(first.source(), "claude_process");

        let second = plugin.detect().await.unwrap();
        assert_eq!(second.status(), Status::Working);
        assert_eq!(second.details()["cpu_percent"], serde_json::json!(20.0));

        let third = plugin.detect().await.unwrap();
        assert_eq!(third.status(), Status::NotRunning);
        assert_eq!(third.confidence(), 1.0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let mut plugin = ProcessPlugin::with_probe(ScriptedProbe::new(&[]), &config());
        plugin.start().await.unwrap();
        plugin.start().await.unwrap();
        assert!(plugin.is_running());
        plugin.stop().await.unwrap();
        plugin.stop().await.unwrap();
        assert!(!plugin.is_running());
        assert!(!plugin.check_available());
    }
}
