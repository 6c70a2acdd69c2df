// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Console sink

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::OutputAdapter;
use crate::core::StateEvent;

/// Console line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdoutFormat {
    /// `[12:00:01] [WORKING] fusion (85%)`
    Simple,
    /// Simple plus `key=value` details, tokens omitted
    Detailed,
    /// Wire JSON
    Json,
}

/// Render `event` as one console line.
pub fn format_event(format: StdoutFormat, event: &StateEvent) -> Result<String> {
    let head = || {
        format!(
            "[{}] [{}] {} ({}%)",
            event.timestamp().format("%H:%M:%S"),
            event.status().as_str().to_uppercase(),
            event.source(),
            (event.confidence() * 100.0) as u32
        )
    };

    Ok(match format {
        StdoutFormat::Simple => head(),
        StdoutFormat::Detailed => {
            let details: Vec<String> = event
                .details()
                .iter()
                .filter(|(key, _)| key.as_str() != "tokens")
                .map(|(key, value)| match value.as_str() {
                    Some(s) => format!("{}={}", key, s),
                    None => format!("{}={}", key, value),
                })
                .collect();
            format!("{} - {}", head(), details.join(", "))
        }
        StdoutFormat::Json => event.to_json()?,
    })
}

pub struct StdoutAdapter {
    format: StdoutFormat,
    running: bool,
}

impl StdoutAdapter {
    pub fn new(format: StdoutFormat) -> Self {
        Self {
            format,
            running: false,
        }
    }
}

#[async_trait]
impl OutputAdapter for StdoutAdapter {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn start(&mut self) -> Result<()> {
        self.running = true;
        info!("Stdout adapter started ({:?})", self.format);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn send(&self, event: &StateEvent) -> Result<()> {
        if self.running {
            println!("{}", format_event(self.format, event)?);
        }
        Ok(())
    }
}
