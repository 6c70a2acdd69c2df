// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! MQTT publisher for fused status

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::OutputAdapter;
use crate::config::MqttConfig;
use crate::core::StateEvent;
use crate::error::PulseError;

const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Publishes each fused event, retained, to `<topic_prefix>/status`
pub struct MqttAdapter {
    config: MqttConfig,
    client: Option<AsyncClient>,
    eventloop: Option<JoinHandle<()>>,
}

impl MqttAdapter {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            config: config.clone(),
            client: None,
            eventloop: None,
        }
    }

    pub fn status_topic(&self) -> String {
        format!("{}/status", self.config.topic_prefix.trim_end_matches('/'))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.broker, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }
        options
    }
}

#[async_trait]
impl OutputAdapter for MqttAdapter {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn start(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        // rumqttc reconnects on the next poll after an error
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected"),
                    Ok(Event::Incoming(packet)) => debug!("MQTT received: {:?}", packet),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        info!(
            "MQTT adapter publishing to {} on {}:{}",
            self.status_topic(),
            self.config.broker,
            self.config.port
        );
        self.client = Some(client);
        self.eventloop = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("MQTT disconnect: {}", e);
            }
        }
        if let Some(handle) = self.eventloop.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn send(&self, event: &StateEvent) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or(PulseError::NotStarted { adapter: "mqtt" })?;

        client
            .publish(self.status_topic(), QoS::AtLeastOnce, true, event.to_json()?)
            .await
            .map_err(|e| anyhow!("MQTT publish failed: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;

    #[test]
    fn test_status_topic() {
        let adapter = MqttAdapter::new(&MqttConfig {
            topic_prefix: "home/pulsecat/".into(),
            ..MqttConfig::default()
        });
        assert_eq!(adapter.status_topic(), "home/pulsecat/status");
    }

    #[tokio::test]
    async fn test_send_before_start() {
        let adapter = MqttAdapter::new(&MqttConfig::default());
        let err = adapter
            .send(&StateEvent::new(Status::Idle, 0.5, "fusion"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PulseError>(),
            Some(PulseError::NotStarted { adapter: "mqtt" })
        ));
    }
}
