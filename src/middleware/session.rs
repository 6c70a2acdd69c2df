// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Session lifecycle tracking
//!
//! Sessions move active -> idle -> ended, and back from idle to active on new
//! activity. Ended is terminal. Timeouts are evaluated by [`SessionManager::sweep`],
//! which the pipeline calls on a fixed interval; every operation takes the
//! current time explicitly.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::core::Callbacks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Ended,
}

/// One logical session of continuous interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub agents: BTreeSet<String>,
    pub status: SessionStatus,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    fn new(id: &str, project: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            project: project.to_string(),
            start_time: now,
            last_activity: now,
            agents: BTreeSet::new(),
            status: SessionStatus::Active,
            end_time: None,
        }
    }

    /// Time from start to end, or to `now` while still open
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }

    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }
}

/// Lifecycle transition delivered to session callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started(Session),
    Active(Session),
    Idle(Session),
    Ended(Session),
}

impl SessionEvent {
    pub fn session(&self) -> &Session {
        match self {
            SessionEvent::Started(s)
            | SessionEvent::Active(s)
            | SessionEvent::Idle(s)
            | SessionEvent::Ended(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Started(_) => "session_start",
            SessionEvent::Active(_) => "session_active",
            SessionEvent::Idle(_) => "session_idle",
            SessionEvent::Ended(_) => "session_end",
        }
    }
}

/// Session manager
pub struct SessionManager {
    timeout: Duration,
    retention: Duration,
    sessions: HashMap<String, Session>,
    callbacks: Callbacks<SessionEvent>,
}

/// Upper bound for configured durations: one year
const MAX_MINUTES: u64 = 365 * 24 * 60;

fn config_minutes(minutes: u64) -> Duration {
    Duration::minutes(minutes.min(MAX_MINUTES) as i64)
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            timeout: config_minutes(config.timeout_minutes),
            retention: config_minutes(config.retention_minutes),
            sessions: HashMap::new(),
            callbacks: Callbacks::new("SessionManager"),
        }
    }

    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: Fn(&SessionEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(callback);
    }

    /// Open a session. A known open session just records activity; an ended
    /// one is replaced.
    pub fn on_session_start(&mut self, id: &str, project: &str, now: DateTime<Utc>) {
        match self.sessions.get(id).map(|s| s.status) {
            Some(SessionStatus::Active) | Some(SessionStatus::Idle) => {
                self.on_session_activity(id, now);
            }
            _ => {
                let session = Session::new(id, project, now);
                info!("Session {} started ({})", id, project);
                self.sessions.insert(id.to_string(), session.clone());
                self.callbacks.emit(&SessionEvent::Started(session));
            }
        }
    }

    /// Record activity. Unknown or ended sessions are ignored.
    pub fn on_session_activity(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.status == SessionStatus::Ended {
            return;
        }

        let was_idle = session.status == SessionStatus::Idle;
        session.last_activity = now;
        session.status = SessionStatus::Active;

        if was_idle {
            debug!("Session {} active again", id);
            let snapshot = session.clone();
            self.callbacks.emit(&SessionEvent::Active(snapshot));
        }
    }

    /// End a session now. It stays queryable for the retention window.
    pub fn on_session_end(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.status == SessionStatus::Ended {
            return;
        }

        session.status = SessionStatus::Ended;
        session.end_time = Some(now);
        info!("Session {} ended", id);
        let snapshot = session.clone();
        self.callbacks.emit(&SessionEvent::Ended(snapshot));
    }

    /// Record a subagent; counts as activity.
    pub fn add_agent(&mut self, id: &str, agent: &str, now: DateTime<Utc>) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.status != SessionStatus::Ended {
                session.agents.insert(agent.to_string());
            }
            self.on_session_activity(id, now);
        }
    }

    /// Apply timeouts and drop ended sessions past retention.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let mut fired = Vec::new();

        for session in self.sessions.values_mut() {
            if session.status == SessionStatus::Ended {
                continue;
            }
            let idle = session.idle_duration(now);

            if idle > self.timeout * 2 {
                session.status = SessionStatus::Ended;
                session.end_time = Some(now);
                info!("Session {} ended after {}s idle", session.id, idle.num_seconds());
                fired.push(SessionEvent::Ended(session.clone()));
            } else if idle > self.timeout && session.status == SessionStatus::Active {
                session.status = SessionStatus::Idle;
                debug!("Session {} idle", session.id);
                fired.push(SessionEvent::Idle(session.clone()));
            }
        }

        for event in &fired {
            self.callbacks.emit(event);
        }

        let retention = self.retention;
        self.sessions.retain(|id, session| match session.end_time {
            Some(end) if now - end >= retention => {
                debug!("Session {} removed", id);
                false
            }
            _ => true,
        });
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn active_sessions(&self) -> Vec<&Session> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .collect()
    }

    /// All tracked sessions, oldest first
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}
