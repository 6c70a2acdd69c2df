// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Output adapters - console, WebSocket push, HTTP query and MQTT sinks

mod http;
#[cfg(feature = "mqtt")]
mod mqtt;
mod stdout;
mod websocket;

pub use http::HttpAdapter;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttAdapter;
pub use stdout::{format_event, StdoutAdapter, StdoutFormat};
pub use websocket::WebSocketAdapter;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::core::{PipelineHandle, StateEvent};

/// Sink for fused status events.
///
/// `send` is awaited by the pipeline under a timeout; it should hand the
/// event off quickly rather than wait on slow consumers.
#[async_trait]
pub trait OutputAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn send(&self, event: &StateEvent) -> Result<()>;
}

/// Every adapter enabled in `config`.
pub fn adapters_from_config(config: &Config, pipeline: &PipelineHandle) -> Vec<Box<dyn OutputAdapter>> {
    let mut adapters: Vec<Box<dyn OutputAdapter>> = Vec::new();
    let section = &config.adapters;

    if section.stdout.enabled {
        adapters.push(Box::new(StdoutAdapter::new(section.stdout.format)));
    }
    if section.websocket.enabled {
        adapters.push(Box::new(WebSocketAdapter::new(&section.websocket)));
    }
    if section.http.enabled {
        adapters.push(Box::new(HttpAdapter::new(&section.http, pipeline.clone())));
    }
    if section.mqtt.enabled {
        #[cfg(feature = "mqtt")]
        adapters.push(Box::new(MqttAdapter::new(&section.mqtt)));

        #[cfg(not(feature = "mqtt"))]
        tracing::warn!("MQTT adapter enabled in config but built without the mqtt feature");
    }

    adapters
}
