// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Transcript log plugin - tails JSONL session transcripts
//!
//! A `notify` watcher runs on its own OS thread and only forwards changed
//! transcript paths into a bounded channel. `detect` drains that channel,
//! reads whatever complete lines were appended since the last read, and turns
//! them into edge-triggered events. Only content written after `start` is
//! processed, apart from a short replay of the newest transcript that primes
//! the initial status.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::classify::{parse_transcript_path, Classifier};
use super::{EdgeTrigger, Plugin};
use crate::config::LogPluginConfig;
use crate::core::{Callbacks, PluginCategory, PluginMetadata, StateEvent};
use crate::middleware::TokenUsage;

const TRANSCRIPT_EXT: &str = "jsonl";

/// Lines replayed from the newest transcript at start
const PRIME_LINES: usize = 10;

/// Tail window used when priming
const PRIME_BYTES: u64 = 64 * 1024;

/// Upper bound on bytes read from one file per `detect` call
const MAX_READ_BYTES: u64 = 256 * 1024;

/// Pending change notifications; overflow is dropped since reads are offset based
const CHANGE_QUEUE: usize = 512;

/// Transcript tailing plugin
pub struct LogPlugin {
    metadata: PluginMetadata,
    projects_dir: PathBuf,
    track_subagents: bool,
    classifier: Classifier,
    check_interval: Duration,
    weight: f64,
    running: bool,

    offsets: HashMap<PathBuf, u64>,
    backlog: BTreeSet<PathBuf>,
    changes_tx: Option<mpsc::Sender<PathBuf>>,
    changes_rx: Option<mpsc::Receiver<PathBuf>>,
    stop_watcher: Option<std_mpsc::SyncSender<()>>,

    edge: EdgeTrigger,
    pending: VecDeque<StateEvent>,
    pending_tokens: TokenUsage,
    callbacks: Callbacks<StateEvent>,
}

impl LogPlugin {
    pub const NAME: &'static str = "claude_log";

    pub fn new(config: &LogPluginConfig) -> Self {
        Self {
            metadata: PluginMetadata::new(
                Self::NAME,
                env!("CARGO_PKG_VERSION"),
                "PulseCat",
                PluginCategory::File,
                &["Claude Code"],
                &["notify"],
                "Tails session transcripts for tool, thinking and token activity",
            ),
            projects_dir: config.resolved_projects_dir(),
            track_subagents: config.track_subagents,
            classifier: Classifier::new(config.show_all_errors),
            check_interval: Duration::from_millis(config.check_interval_ms),
            weight: config.weight,
            running: false,
            offsets: HashMap::new(),
            backlog: BTreeSet::new(),
            changes_tx: None,
            changes_rx: None,
            stop_watcher: None,
            edge: EdgeTrigger::new(),
            pending: VecDeque::new(),
            pending_tokens: TokenUsage::default(),
            callbacks: Callbacks::new(Self::NAME),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Queue `path` for reading, as a watcher notification would.
    pub fn mark_changed(&self, path: &Path) {
        if let Some(tx) = &self.changes_tx {
            let _ = tx.try_send(path.to_path_buf());
        }
    }

    /// Classify one transcript line attributed to `path` and queue any
    /// resulting status changes.
    pub fn ingest_line(&mut self, line: &str, path: &Path) {
        let classified = self.classifier.classify_line(line);
        self.pending_tokens.add(&classified.usage);

        let info = parse_transcript_path(path);
        for observation in classified.observations {
            if !self.edge.fire(observation.status) {
                continue;
            }

            let mut event = StateEvent::new(observation.status, observation.confidence, Self::NAME)
                .with_details(observation.details)
                .with_priority(self.priority());

            if let Some(info) = &info {
                event = event
                    .with_detail("project", info.project.as_str())
                    .with_detail("session_id", info.session_id.as_str());
                if let Some(agent) = &info.agent_id {
                    event = event.with_detail("agent_id", agent.as_str());
                }
            }
            if let Some(name) = path.file_name() {
                event = event.with_detail("transcript", name.to_string_lossy().to_string());
            }

            self.pending.push_back(event);
        }
    }

    fn is_subagent(path: &Path) -> bool {
        path.parent()
            .and_then(Path::file_name)
            .is_some_and(|n| n == "subagents")
    }

    fn wanted(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == TRANSCRIPT_EXT)
            && (self.track_subagents || !Self::is_subagent(path))
    }

    /// Read complete lines appended to `path` since the last read.
    fn read_new_lines(&mut self, path: &Path) -> Vec<String> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!("[{}] cannot open {:?}: {}", Self::NAME, path, e);
                return Vec::new();
            }
        };
        let len = match file.metadata() {
            Ok(m) => m.len(),
            Err(_) => return Vec::new(),
        };

        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if len < offset {
            // truncated or replaced
            offset = 0;
        }
        if len == offset {
            return Vec::new();
        }

        let want = (len - offset).min(MAX_READ_BYTES);
        let mut buf = Vec::with_capacity(want as usize);
        if file.seek(SeekFrom::Start(offset)).is_err()
            || file.take(want).read_to_end(&mut buf).is_err()
        {
            return Vec::new();
        }

        // keep a trailing partial line for the next read
        let consumed = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None if want == MAX_READ_BYTES => buf.len(),
            None => 0,
        };
        self.offsets.insert(path.to_path_buf(), offset + consumed as u64);
        if offset + (consumed as u64) < len && consumed > 0 {
            self.backlog.insert(path.to_path_buf());
        }

        String::from_utf8_lossy(&buf[..consumed])
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    fn drain_changes(&mut self) -> BTreeSet<PathBuf> {
        let mut changed = std::mem::take(&mut self.backlog);
        if let Some(rx) = &mut self.changes_rx {
            while let Ok(path) = rx.try_recv() {
                changed.insert(path);
            }
        }
        changed.retain(|p| self.wanted(p));
        changed
    }

    /// Record current sizes and replay the tail of the newest transcript.
    fn prime(&mut self) {
        let transcripts = find_transcripts(&self.projects_dir);
        let mut newest: Option<(PathBuf, std::time::SystemTime)> = None;

        for path in transcripts {
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            self.offsets.insert(path.clone(), meta.len());
            if !self.wanted(&path) {
                continue;
            }
            if let Ok(modified) = meta.modified() {
                if newest.as_ref().map_or(true, |(_, t)| modified > *t) {
                    newest = Some((path, modified));
                }
            }
        }

        let Some((path, _)) = newest else {
            return;
        };
        for line in tail_lines(&path, PRIME_LINES) {
            self.ingest_line(&line, &path);
        }

        // report only where the replay ended up; historical usage is not counted
        if let Some(last) = self.pending.pop_back() {
            self.pending.clear();
            self.pending.push_back(last);
        }
        self.pending_tokens = TokenUsage::default();
        debug!("[{}] primed from {:?}", Self::NAME, path);
    }
}

#[async_trait]
impl Plugin for LogPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn check_available(&mut self) -> bool {
        self.projects_dir.is_dir()
    }

    async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        if !self.projects_dir.is_dir() {
            warn!(
                "[{}] transcript directory {:?} not found, plugin disabled",
                Self::NAME,
                self.projects_dir
            );
            return Ok(());
        }

        self.prime();

        let (tx, rx) = mpsc::channel(CHANGE_QUEUE);
        self.stop_watcher = Some(spawn_watcher(self.projects_dir.clone(), tx.clone()));
        self.changes_tx = Some(tx);
        self.changes_rx = Some(rx);
        self.running = true;

        info!(
            "[{}] Started, watching {:?} ({} transcripts)",
            Self::NAME,
            self.projects_dir,
            self.offsets.len()
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        if let Some(stop) = self.stop_watcher.take() {
            let _ = stop.try_send(());
        }
        self.changes_tx = None;
        self.changes_rx = None;
        self.running = false;
        info!("[{}] Stopped", Self::NAME);
        Ok(())
    }

    async fn detect(&mut self) -> Option<StateEvent> {
        if self.pending.is_empty() {
            for path in self.drain_changes() {
                for line in self.read_new_lines(&path) {
                    self.ingest_line(&line, &path);
                }
            }
        }

        let event = self.pending.pop_front()?;
        if self.pending_tokens.is_empty() {
            return Some(event);
        }
        let tokens = std::mem::take(&mut self.pending_tokens);
        Some(event.with_detail("tokens", tokens.to_value()))
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
        2
    }

    fn callbacks(&self) -> &Callbacks<StateEvent> {
        &self.callbacks
    }

    fn callbacks_mut(&mut self) -> &mut Callbacks<StateEvent> {
        &mut self.callbacks
    }
}

impl Drop for LogPlugin {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_watcher.take() {
            let _ = stop.try_send(());
        }
    }
}

/// Watch `root` recursively and forward changed transcript paths to `tx`.
/// The returned sender stops the watcher thread when a value is sent or it is dropped.
fn spawn_watcher(root: PathBuf, tx: mpsc::Sender<PathBuf>) -> std_mpsc::SyncSender<()> {
    let (stop_tx, stop_rx) = std_mpsc::sync_channel::<()>(1);

    std::thread::spawn(move || {
        let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = match RecommendedWatcher::new(raw_tx, notify::Config::default()) {
            Ok(w) => w,
            Err(e) => {
                warn!("transcript watcher init failed: {e}");
                return;
            }
        };
        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            warn!("cannot watch {}: {e}", root.display());
            return;
        }

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
                Err(std_mpsc::TryRecvError::Empty) => {}
            }

            match raw_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(event)) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        continue;
                    }
                    for path in event.paths {
                        if path.extension().is_some_and(|e| e == TRANSCRIPT_EXT) {
                            let _ = tx.try_send(path);
                        }
                    }
                }
                Ok(Err(e)) => warn!("transcript watch error: {e}"),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("transcript watcher for {} stopped", root.display());
    });

    stop_tx
}

/// All transcripts below `root`, in no particular order.
fn find_transcripts(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.extension().is_some_and(|e| e == TRANSCRIPT_EXT) {
                found.push(path);
            }
        }
    }

    found
}

/// Last `n` complete lines of `path`.
fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(mut file) = File::open(path) else {
        return Vec::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(PRIME_BYTES);

    let mut buf = Vec::new();
    if file.seek(SeekFrom::Start(start)).is_err() || file.read_to_end(&mut buf).is_err() {
        return Vec::new();
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if start > 0 && !lines.is_empty() {
        // first line is probably cut
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use serde_json::json;
    use std::io::Write;

    const THINKING: &str = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"..."}],"usage":{"input_tokens":10,"output_tokens":2}}}"#;
    const USER: &str = r#"{"type":"user","message":{"content":"hi"}}"#;
    const END_TURN: &str = r#"{"type":"assistant","message":{"stop_reason":"end_turn","content":[]}}"#;

    fn plugin_for(dir: &Path) -> LogPlugin {
        LogPlugin::new(&LogPluginConfig {
            projects_dir: Some(dir.to_path_buf()),
            ..LogPluginConfig::default()
        })
    }

    fn append(path: &Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[tokio::test]
    async fn test_fed_lines_are_edge_triggered_with_token_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = plugin_for(dir.path());
        let path = dir.path().join("my-app").join("sess-1.jsonl");

        plugin.ingest_line(THINKING, &path);
        plugin.ingest_line(THINKING, &path);
        plugin.ingest_line("garbage", &path);
        plugin.ingest_line(USER, &path);

        let first = plugin.detect().await.unwrap();
        assert_eq!(first.status(), Status::Thinking);
        assert_eq!(first.detail_str("project"), Some("my-app"));
        assert_eq!(first.detail_str("session_id"), Some("sess-1"));
        // both assistant lines contribute even though only one event was emitted
        assert_eq!(first.details()["tokens"], json!({ "input": 20, "output": 4, "cache_write": 0, "cache_read": 0 }));

        let second = plugin.detect().await.unwrap();
        assert_eq!(second.status(), Status::Running);
        assert!(second.details().get("tokens").is_none());

        assert!(plugin.detect().await.is_none());
    }

    #[tokio::test]
    async fn test_tails_only_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("my-app");
        std::fs::create_dir_all(&project).unwrap();
        let transcript = project.join("sess-1.jsonl");
        append(&transcript, &[USER, THINKING, END_TURN]);

        let mut plugin = plugin_for(dir.path());
        assert!(plugin.check_available());
        plugin.start().await.unwrap();
        assert!(plugin.is_running());

        // replay collapses to the latest status
        let primed = plugin.detect().await.unwrap();
        assert_eq!(primed.status(), Status::Idle);
        assert!(primed.details().get("tokens").is_none());
        assert!(plugin.detect().await.is_none());

        append(&transcript, &[USER]);
        plugin.mark_changed(&transcript);
        let event = plugin.detect().await.unwrap();
        assert_eq!(event.status(), Status::Running);

        // a partial line waits for its newline
        let mut file = std::fs::OpenOptions::new().append(true).open(&transcript).unwrap();
        write!(file, "{}", &END_TURN[..20]).unwrap();
        plugin.mark_changed(&transcript);
        assert!(plugin.detect().await.is_none());

        writeln!(file, "{}", &END_TURN[20..]).unwrap();
        plugin.mark_changed(&transcript);
        assert_eq!(plugin.detect().await.unwrap().status(), Status::Idle);

        plugin.stop().await.unwrap();
        assert!(!plugin.is_running());
    }

    #[tokio::test]
    async fn test_subagent_transcripts() {
        let dir = tempfile::tempdir().unwrap();
        let subagents = dir.path().join("my-app").join("sess-1").join("subagents");
        std::fs::create_dir_all(&subagents).unwrap();
        let transcript = subagents.join("agent-9.jsonl");

        let mut plugin = plugin_for(dir.path());
        plugin.start().await.unwrap();

        append(&transcript, &[THINKING]);
        plugin.mark_changed(&transcript);
        let event = plugin.detect().await.unwrap();
        assert_eq!(event.detail_str("session_id"), Some("sess-1"));
        assert_eq!(event.detail_str("agent_id"), Some("agent-9"));

        let mut ignoring = LogPlugin::new(&LogPluginConfig {
            projects_dir: Some(dir.path().to_path_buf()),
            track_subagents: false,
            ..LogPluginConfig::default()
        });
        ignoring.start().await.unwrap();
        append(&transcript, &[USER]);
        ignoring.mark_changed(&transcript);
        assert!(ignoring.detect().await.is_none());
    }

    #[tokio::test]
    async fn test_huge_usage_does_not_overflow_pending_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = plugin_for(dir.path());
        let path = dir.path().join("my-app").join("sess-1.jsonl");
        let huge = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"..."}],"usage":{"input_tokens":18446744073709551615,"output_tokens":1}}}"#;

        plugin.ingest_line(huge, &path);
        plugin.ingest_line(huge, &path);

        let event = plugin.detect().await.unwrap();
        assert_eq!(event.details()["tokens"]["input"], json!(u64::MAX));
        assert_eq!(event.details()["tokens"]["output"], json!(2));
    }

    #[tokio::test]
    async fn test_missing_directory_disables_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = plugin_for(&dir.path().join("nope"));

        assert!(!plugin.check_available());
        plugin.start().await.unwrap();
        assert!(!plugin.is_running());
        assert!(plugin.detect().await.is_none());
    }

    #[test]
    fn test_tail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let lines: Vec<String> = (0..25).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        append(&path, &refs);

        let tail = tail_lines(&path, 10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0], "line 15");
        assert_eq!(tail[9], "line 24");
    }
}
