// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Status fusion engine - weighted vote with temporal smoothing
//!
//! Every pass takes the latest event of each available source, scores each
//! status by `confidence * weight`, and picks the best one. The raw winner is
//! then smoothed against the recent history of raw winners so a single
//! outlier vote does not flip the reported status.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::FusionConfig;
use crate::core::{Callbacks, StateEvent, Status};
use crate::plugins::DEFAULT_WEIGHT;

const MIN_WEIGHT: f64 = 0.01;
const MAX_WEIGHT: f64 = 1.0;

const BASE_FACTOR: f64 = 0.6;
const CONSISTENCY_FACTOR: f64 = 0.3;
const ACTIVITY_FACTOR: f64 = 0.1;

/// Vote diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteDetails {
    /// Accumulated score per status, best first
    pub scores: Vec<(Status, f64)>,
    /// Raw vote winner before smoothing
    pub winner: Status,
    /// Statuses that scored close to the winner
    pub runners_up: Vec<(Status, f64)>,
    pub reason: String,
}

/// Outcome of a single fusion pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionResult {
    pub status: Status,
    pub confidence: f64,
    pub sources: Vec<StateEvent>,
    pub vote: VoteDetails,
    pub timestamp: DateTime<Utc>,
}

impl FusionResult {
    /// True when smoothing replaced the raw vote winner.
    pub fn was_smoothed(&self) -> bool {
        self.status != self.vote.winner
    }
}

/// Fusion engine
pub struct FusionEngine {
    config: FusionConfig,
    weights: HashMap<String, f64>,
    history: VecDeque<Status>,
    last_result: Option<FusionResult>,
    last_notified: Option<Status>,
    callbacks: Callbacks<FusionResult>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            config,
            weights: HashMap::new(),
            last_result: None,
            last_notified: None,
            callbacks: Callbacks::new("FusionEngine"),
        }
    }

    /// Set the trust coefficient of a source, clamped to `[0.01, 1.0]`.
    pub fn set_weight(&mut self, source: &str, weight: f64) {
        let weight = if weight.is_nan() {
            DEFAULT_WEIGHT
        } else {
            weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
        };
        self.weights.insert(source.to_string(), weight);
    }

    pub fn weight(&self, source: &str) -> f64 {
        self.weights.get(source).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Called with each result whose status differs from the last notified one
    pub fn on_change<F>(&mut self, callback: F)
    where
        F: Fn(&FusionResult) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(callback);
    }

    /// Raw vote winners, oldest first
    pub fn history(&self) -> impl Iterator<Item = Status> + '_ {
        self.history.iter().copied()
    }

    pub fn last_result(&self) -> Option<&FusionResult> {
        self.last_result.as_ref()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_result = None;
        self.last_notified = None;
    }

    /// Fuse the latest event of every available source.
    pub fn fuse(&mut self, inputs: &[StateEvent]) -> FusionResult {
        let result = if inputs.is_empty() {
            FusionResult {
                status: Status::Idle,
                confidence: 0.0,
                sources: Vec::new(),
                vote: VoteDetails {
                    scores: Vec::new(),
                    winner: Status::Idle,
                    runners_up: Vec::new(),
                    reason: "no plugins available".to_string(),
                },
                timestamp: Utc::now(),
            }
        } else {
            let vote = self.weighted_vote(inputs);

            self.history.push_back(vote.winner);
            while self.history.len() > self.config.history_size.max(1) {
                self.history.pop_front();
            }

            let status = self.smooth(vote.winner);
            let confidence = self.final_confidence(inputs, &vote);

            FusionResult {
                status,
                confidence,
                sources: inputs.to_vec(),
                vote,
                timestamp: Utc::now(),
            }
        };

        debug!(
            "Fusion: {} (raw {}) at {:.3} from {} sources",
            result.status,
            result.vote.winner,
            result.confidence,
            result.sources.len()
        );

        if self.last_notified != Some(result.status) {
            self.last_notified = Some(result.status);
            self.callbacks.emit(&result);
        }

        self.last_result = Some(result.clone());
        result
    }

    fn weighted_vote(&self, inputs: &[StateEvent]) -> VoteDetails {
        let mut scores: Vec<(Status, f64)> = Vec::new();
        for event in inputs {
            let score = event.confidence() * self.weight(event.source());
            match scores.iter_mut().find(|(s, _)| *s == event.status()) {
                Some((_, total)) => *total += score,
                None => scores.push((event.status(), score)),
            }
        }

        // best first; equal scores go to the higher priority status
        scores.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| b.priority().cmp(&a.priority()))
        });

        let (winner, best) = scores[0];
        let runners_up = scores[1..]
            .iter()
            .filter(|(_, score)| *score >= best * self.config.runner_up_ratio)
            .copied()
            .collect();

        VoteDetails {
            scores,
            winner,
            runners_up,
            reason: "weighted vote".to_string(),
        }
    }

    /// Replace a winner that appears at most once in the recent window when
    /// another status holds the majority there. The current winner is already
    /// part of the history.
    fn smooth(&self, winner: Status) -> Status {
        let window = self.config.smoothing_window.max(1);
        let recent: Vec<Status> = self.history.iter().rev().take(window).copied().collect();

        let mut counts: Vec<(Status, usize)> = Vec::new();
        for status in &recent {
            match counts.iter_mut().find(|(s, _)| s == status) {
                Some((_, n)) => *n += 1,
                None => counts.push((*status, 1)),
            }
        }

        let winner_count = counts
            .iter()
            .find(|(s, _)| *s == winner)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        if winner_count > 1 {
            return winner;
        }

        counts
            .into_iter()
            .filter(|(s, n)| *s != winner && *n >= 2)
            .max_by(|(a, na), (b, nb)| na.cmp(nb).then_with(|| a.priority().cmp(&b.priority())))
            .map(|(s, _)| s)
            .unwrap_or(winner)
    }

    fn final_confidence(&self, inputs: &[StateEvent], vote: &VoteDetails) -> f64 {
        let total: f64 = vote.scores.iter().map(|(_, s)| s).sum();
        let winner_score = vote.scores.first().map(|(_, s)| *s).unwrap_or(0.0);
        let base = if total > 0.0 { winner_score / total } else { 0.0 };

        let consistency = if inputs.len() <= 1 {
            1.0
        } else {
            let mut counts: HashMap<Status, usize> = HashMap::new();
            for event in inputs {
                *counts.entry(event.status()).or_default() += 1;
            }
            let most_common = counts.values().copied().max().unwrap_or(0);
            most_common as f64 / inputs.len() as f64
        };

        let activity = if inputs.iter().any(|e| e.status().is_high_significance()) {
            1.0
        } else {
            0.5
        };

        let confidence =
            BASE_FACTOR * base + CONSISTENCY_FACTOR * consistency + ACTIVITY_FACTOR * activity;
        confidence.clamp(0.0, self.config.max_confidence)
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}
