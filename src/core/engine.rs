// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Pipeline engine - plugin events through privacy, tokens, fusion and out to adapters
//!
//! A single pipeline task owns the fusion, session and token state. Plugin
//! tasks feed it through a bounded channel; other tasks only ever see the
//! read-only [`PipelineSnapshot`] published after each step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{EventBus, StateEvent};
use crate::adapters::OutputAdapter;
use crate::config::Config;
use crate::error::PulseError;
use crate::fusion::{FusionEngine, FusionResult};
use crate::middleware::{PrivacyFilter, Session, SessionManager, TokenSnapshot, TokenStats};
use crate::plugins::{PluginHealth, PluginMessage, PluginRegistry};

/// Source name of fused events
pub const FUSION_SOURCE: &str = "fusion";

/// Read-only view of pipeline state
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    /// Latest fused event, if any has been produced
    pub current: Option<StateEvent>,
    pub last_fusion: Option<FusionResult>,
    pub tokens: TokenSnapshot,
    pub sessions: Vec<Session>,
    pub plugins: Vec<PluginHealth>,
    pub health: PipelineHealth,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineHealth {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub events_received: u64,
    pub events_published: u64,
    pub adapters: Vec<String>,
}

/// Cloneable reader for the pipeline snapshot
#[derive(Clone)]
pub struct PipelineHandle {
    rx: watch::Receiver<PipelineSnapshot>,
}

impl PipelineHandle {
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.rx.borrow().clone()
    }

    pub fn current(&self) -> Option<StateEvent> {
        self.rx.borrow().current.clone()
    }

    /// Wait for the next snapshot. Errors once the engine is gone.
    pub async fn changed(&mut self) -> Result<PipelineSnapshot> {
        self.rx.changed().await?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

/// State owned by the pipeline task
struct Pipeline {
    privacy: PrivacyFilter,
    tokens: TokenStats,
    fusion: FusionEngine,
    sessions: SessionManager,
    bus: EventBus,
    adapters: Vec<Box<dyn OutputAdapter>>,
    adapter_timeout: Duration,
    latest: HashMap<String, StateEvent>,
    plugins: HashMap<String, PluginHealth>,
    health: PipelineHealth,
    current: Option<StateEvent>,
    snapshot_tx: watch::Sender<PipelineSnapshot>,
}

impl Pipeline {
    async fn handle(&mut self, message: PluginMessage) {
        match message {
            PluginMessage::Event(event) => self.on_event(event).await,
            PluginMessage::Availability {
                source,
                available,
                running,
            } => self.on_availability(source, available, running).await,
        }
        self.publish_snapshot();
    }

    async fn on_event(&mut self, event: StateEvent) {
        self.health.events_received += 1;
        self.track_session(&event);

        let filtered = self.privacy.filter(&event);
        self.tokens.update(&filtered);

        let weight = self.fusion.weight(filtered.source());
        let health = self
            .plugins
            .entry(filtered.source().to_string())
            .or_insert_with(|| PluginHealth {
                name: filtered.source().to_string(),
                available: true,
                running: true,
                weight,
                events_emitted: 0,
                last_status: None,
            });
        health.events_emitted += 1;
        health.last_status = Some(filtered.status());

        self.latest.insert(filtered.source().to_string(), filtered.clone());

        let result = self.fusion.fuse(&self.fusion_inputs());
        let fused = StateEvent::new(result.status, result.confidence, FUSION_SOURCE)
            .with_details(filtered.details().clone())
            .with_detail("trigger", filtered.source())
            .with_priority(filtered.priority());

        self.distribute(fused).await;
    }

    async fn on_availability(&mut self, source: String, available: bool, running: bool) {
        debug!("Plugin {}: available={} running={}", source, available, running);
        let weight = self.fusion.weight(&source);
        let health = self.plugins.entry(source.clone()).or_insert_with(|| PluginHealth {
            name: source.clone(),
            available,
            running,
            weight,
            events_emitted: 0,
            last_status: None,
        });
        let was_voting = health.available && health.running;
        health.available = available;
        health.running = running;

        // a source dropping out changes the vote
        if was_voting && !(available && running) && self.current.is_some() {
            let result = self.fusion.fuse(&self.fusion_inputs());
            let fused = StateEvent::new(result.status, result.confidence, FUSION_SOURCE)
                .with_detail("trigger", "availability");
            self.distribute(fused).await;
        }
    }

    /// Latest event of every available, running source, ordered by source
    fn fusion_inputs(&self) -> Vec<StateEvent> {
        let mut inputs: Vec<StateEvent> = self
            .latest
            .iter()
            .filter(|(source, _)| {
                self.plugins
                    .get(source.as_str())
                    .map_or(true, |h| h.available && h.running)
            })
            .map(|(_, event)| event.clone())
            .collect();
        inputs.sort_by(|a, b| a.source().cmp(b.source()));
        inputs
    }

    fn track_session(&mut self, event: &StateEvent) {
        let Some(session_id) = event.detail_str("session_id") else {
            return;
        };
        let now = Utc::now();
        let project = event.detail_str("project").unwrap_or("unknown");

        self.sessions.on_session_start(session_id, project, now);
        if let Some(agent) = event.detail_str("agent_id") {
            self.sessions.add_agent(session_id, agent, now);
        }
    }

    async fn distribute(&mut self, fused: StateEvent) {
        self.bus.publish(&fused);

        for adapter in &self.adapters {
            match timeout(self.adapter_timeout, adapter.send(&fused)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Adapter {} send failed: {}", adapter.name(), e),
                Err(_) => warn!(
                    "{}",
                    PulseError::SendTimeout {
                        adapter: adapter.name().to_string(),
                        timeout_ms: self.adapter_timeout.as_millis() as u64,
                    }
                ),
            }
        }

        self.health.events_published += 1;
        self.current = Some(fused);
    }

    fn sweep(&mut self) {
        self.sessions.sweep(Utc::now());
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let mut plugins: Vec<PluginHealth> = self.plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));

        let snapshot = PipelineSnapshot {
            current: self.current.clone(),
            last_fusion: self.fusion.last_result().cloned(),
            tokens: self.tokens.snapshot(),
            sessions: self.sessions.snapshot(),
            plugins,
            health: self.health.clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn run_pipeline(
    mut pipeline: Pipeline,
    mut rx: mpsc::Receiver<PluginMessage>,
    mut stop: watch::Receiver<bool>,
    sweep_every: Duration,
) -> Pipeline {
    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    sweep.tick().await;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            message = rx.recv() => match message {
                Some(message) => pipeline.handle(message).await,
                None => break,
            },
            _ = sweep.tick() => pipeline.sweep(),
        }
    }

    // plugins are stopped first, so whatever is queued is final
    while let Ok(message) = rx.try_recv() {
        pipeline.handle(message).await;
    }
    pipeline
}

struct RunningPipeline {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Pipeline>,
}

/// Main PulseCat engine
pub struct Engine {
    config: Arc<Config>,
    registry: PluginRegistry,
    idle: Option<Pipeline>,
    running: Option<RunningPipeline>,
    snapshot_rx: watch::Receiver<PipelineSnapshot>,
    start_time: Option<Instant>,
}

impl Engine {
    pub fn new(config: Config, registry: PluginRegistry) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(PipelineSnapshot::default());

        let mut fusion = FusionEngine::new(config.fusion.clone());
        for (source, weight) in registry.weights() {
            fusion.set_weight(&source, weight);
        }

        let pipeline = Pipeline {
            privacy: PrivacyFilter::new(config.privacy.clone()),
            tokens: TokenStats::new(&config.token_stats),
            fusion,
            sessions: SessionManager::new(&config.sessions),
            bus: EventBus::new(),
            adapters: Vec::new(),
            adapter_timeout: Duration::from_millis(config.pipeline.adapter_timeout_ms.max(1)),
            latest: HashMap::new(),
            plugins: HashMap::new(),
            health: PipelineHealth::default(),
            current: None,
            snapshot_tx,
        };

        Self {
            config: Arc::new(config),
            registry,
            idle: Some(pipeline),
            running: None,
            snapshot_rx,
            start_time: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reader for the published pipeline state
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            rx: self.snapshot_rx.clone(),
        }
    }

    /// Add an adapter. Only possible while stopped.
    pub fn add_adapter(&mut self, adapter: Box<dyn OutputAdapter>) -> Result<()> {
        let pipeline = self.idle.as_mut().ok_or(PulseError::AlreadyRunning)?;
        pipeline.adapters.push(adapter);
        Ok(())
    }

    /// Subscribe to fused events on the event bus. Only possible while stopped.
    pub fn subscribe<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(&StateEvent) -> Result<()> + Send + Sync + 'static,
    {
        let pipeline = self.idle.as_mut().ok_or(PulseError::AlreadyRunning)?;
        pipeline.bus.subscribe(callback);
        Ok(())
    }

    /// Override the fusion weight of a source. Only possible while stopped.
    pub fn set_weight(&mut self, source: &str, weight: f64) -> Result<()> {
        let pipeline = self.idle.as_mut().ok_or(PulseError::AlreadyRunning)?;
        pipeline.fusion.set_weight(source, weight);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub async fn start(&mut self) -> Result<()> {
        let Some(mut pipeline) = self.idle.take() else {
            return Err(PulseError::AlreadyRunning.into());
        };
        info!("Starting PulseCat engine...");

        let mut started = Vec::new();
        for mut adapter in pipeline.adapters.drain(..) {
            match adapter.start().await {
                Ok(()) => {
                    info!("Adapter {} started", adapter.name());
                    started.push(adapter);
                }
                Err(e) => error!("Adapter {} disabled: {:#}", adapter.name(), e),
            }
        }
        pipeline.adapters = started;

        pipeline.health.running = true;
        pipeline.health.started_at = Some(Utc::now());
        pipeline.health.adapters = pipeline.adapters.iter().map(|a| a.name().to_string()).collect();
        pipeline.publish_snapshot();

        let (tx, rx) = mpsc::channel(self.config.pipeline.channel_capacity.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let sweep_every = Duration::from_secs(self.config.sessions.sweep_interval_secs.max(1));
        let handle = tokio::spawn(run_pipeline(pipeline, rx, stop_rx, sweep_every));

        self.registry.start_all(tx);
        self.running = Some(RunningPipeline { stop, handle });
        self.start_time = Some(Instant::now());

        info!("PulseCat engine started with {} plugins", self.registry.len());
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!("Stopping PulseCat engine...");

        self.registry.stop_all().await;

        let _ = running.stop.send(true);
        let mut pipeline = running.handle.await?;

        for adapter in pipeline.adapters.iter_mut() {
            if let Err(e) = adapter.stop().await {
                warn!("Adapter {} stop failed: {}", adapter.name(), e);
            }
        }
        pipeline.health.running = false;
        pipeline.publish_snapshot();
        self.idle = Some(pipeline);
        self.start_time = None;

        info!("PulseCat engine stopped");
        Ok(())
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Callbacks, PluginCategory, PluginMetadata, Status};
    use crate::plugins::Plugin;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Scripted {
        metadata: PluginMetadata,
        script: VecDeque<StateEvent>,
        running: bool,
        callbacks: Callbacks<StateEvent>,
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
            self.script.pop_front()
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

    struct Capture {
        events: Arc<Mutex<Vec<StateEvent>>>,
    }

    #[async_trait]
    impl OutputAdapter for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, event: &StateEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl OutputAdapter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _event: &StateEvent) -> Result<()> {
            anyhow::bail!("sink unreachable")
        }
    }

    struct Stalled;

    #[async_trait]
    impl OutputAdapter for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _event: &StateEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn registry(events: Vec<StateEvent>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(Scripted {
                metadata: PluginMetadata::new("scripted", "0.0.0", "test", PluginCategory::Custom, &[], &[], ""),
                script: events.into(),
                running: false,
                callbacks: Callbacks::new("scripted"),
            }))
            .unwrap();
        registry
    }

    async fn wait_published(handle: &mut PipelineHandle, count: u64) -> PipelineSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = handle.changed().await.unwrap();
                if snapshot.health.events_published >= count {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_event_flows_through_pipeline() {
        let event = StateEvent::new(Status::Writing, 0.9, "scripted")
            .with_detail("file_path", "/home/u/project/src/main.rs")
            .with_detail("session_id", "s1")
            .with_detail("project", "demo")
            .with_detail("tokens", serde_json::json!({ "input": 100, "output": 20 }));

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new(Config::default(), registry(vec![event]));
        engine
            .add_adapter(Box::new(Capture {
                events: captured.clone(),
            }))
            .unwrap();
        let mut handle = engine.handle();

        engine.start().await.unwrap();
        let snapshot = wait_published(&mut handle, 1).await;
        engine.stop().await.unwrap();

        let fused = snapshot.current.unwrap();
        assert_eq!(fused.status(), Status::Writing);
        assert_eq!(fused.source(), FUSION_SOURCE);
        assert_eq!(fused.detail_str("trigger"), Some("scripted"));
        assert_eq!(fused.detail_str("file"), Some("main.rs"));
        assert!(fused.details().get("file_path").is_none());

        assert_eq!(snapshot.tokens.total.input, 100);
        assert_eq!(snapshot.tokens.total.sum, 120);
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].project, "demo");
        assert_eq!(snapshot.plugins[0].events_emitted, 1);
        assert_eq!(snapshot.health.adapters, vec!["capture".to_string()]);

        // the plugin dropping out at shutdown re-fuses to the empty vote
        let captured = captured.lock();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0], fused);
        assert_eq!(captured[1].status(), Status::Idle);
        assert_eq!(captured[1].confidence(), 0.0);
        assert_eq!(captured[1].detail_str("trigger"), Some("availability"));
        assert!(!handle.snapshot().health.running);
    }

    #[tokio::test]
    async fn test_failing_and_stalled_adapters_do_not_block_others() {
        let mut config = Config::default();
        config.pipeline.adapter_timeout_ms = 50;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new(
            config,
            registry(vec![
                StateEvent::new(Status::Thinking, 0.9, "scripted"),
                StateEvent::new(Status::Working, 0.9, "scripted"),
            ]),
        );
        engine.add_adapter(Box::new(Failing)).unwrap();
        engine.add_adapter(Box::new(Stalled)).unwrap();
        engine
            .add_adapter(Box::new(Capture {
                events: captured.clone(),
            }))
            .unwrap();
        let mut handle = engine.handle();

        engine.start().await.unwrap();
        wait_published(&mut handle, 2).await;
        engine.stop().await.unwrap();

        let published = handle.snapshot().health.events_published;
        assert!(published >= 2);

        let captured = captured.lock();
        assert_eq!(captured.len() as u64, published);
        assert_eq!(captured[0].detail_str("trigger"), Some("scripted"));
        assert_eq!(captured[1].detail_str("trigger"), Some("scripted"));
    }

    #[tokio::test]
    async fn test_bus_subscribers_see_fused_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut engine = Engine::new(
            Config::default(),
            registry(vec![
                StateEvent::new(Status::Thinking, 0.9, "scripted"),
                StateEvent::new(Status::Executing, 0.9, "scripted"),
            ]),
        );
        engine
            .subscribe(move |event| {
                sink.lock().push(event.source().to_string());
                Ok(())
            })
            .unwrap();
        let mut handle = engine.handle();

        engine.start().await.unwrap();
        wait_published(&mut handle, 2).await;
        engine.stop().await.unwrap();

        let seen = seen.lock();
        assert!(seen.len() >= 2);
        assert!(seen.iter().all(|source| source == FUSION_SOURCE));
    }

    #[tokio::test]
    async fn test_start_twice_and_late_adapter_rejected() {
        let mut engine = Engine::new(Config::default(), PluginRegistry::new());
        engine.start().await.unwrap();
        assert!(engine.is_running());

        assert!(engine.start().await.is_err());
        let late = Capture {
            events: Arc::new(Mutex::new(Vec::new())),
        };
        assert!(engine.add_adapter(Box::new(late)).is_err());

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        engine.stop().await.unwrap();
    }
}
