// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! WebSocket server for real-time status push

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::OutputAdapter;
use crate::config::WebSocketConfig;
use crate::core::StateEvent;
use crate::error::PulseError;

/// Buffered broadcasts per client before it starts lagging
const BROADCAST_CAPACITY: usize = 256;

/// How long stopping waits for clients to close before aborting them
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket push adapter
pub struct WebSocketAdapter {
    host: String,
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    broadcast_tx: broadcast::Sender<String>,
    shutdown: Option<broadcast::Sender<()>>,
    server: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

struct ClientHandle {
    addr: SocketAddr,
}

impl WebSocketAdapter {
    pub fn new(config: &WebSocketConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            host: config.host.clone(),
            port: config.port,
            max_clients: config.max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
            shutdown: None,
            server: None,
            local_addr: None,
        }
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait]
impl OutputAdapter for WebSocketAdapter {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&mut self) -> Result<()> {
        if self.shutdown.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| PulseError::bind("websocket", &addr, e))?;
        let local_addr = listener.local_addr()?;

        info!("WebSocket server listening on ws://{}", local_addr);

        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let server = tokio::spawn(accept_loop(
            listener,
            self.clients.clone(),
            self.max_clients,
            self.broadcast_tx.clone(),
            shutdown_tx.clone(),
            shutdown,
        ));

        self.shutdown = Some(shutdown_tx);
        self.server = Some(server);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Signal shutdown and wait until the listener and every client task are gone.
    async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                warn!("WebSocket server task ended abnormally: {}", e);
            }
        }
        self.local_addr = None;
        Ok(())
    }

    async fn send(&self, event: &StateEvent) -> Result<()> {
        let json = event.to_json()?;
        // no receivers simply means no clients
        let _ = self.broadcast_tx.send(json);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    max_clients: usize,
    broadcast_tx: broadcast::Sender<String>,
    client_shutdown: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        // the slot is taken before the handshake so bursts cannot overshoot
                        let client_id = {
                            let mut clients = clients.write().await;
                            if clients.len() >= max_clients {
                                warn!("Max clients reached, rejecting connection from {}", addr);
                                continue;
                            }
                            let client_id = uuid::Uuid::new_v4().to_string();
                            clients.insert(client_id.clone(), ClientHandle { addr });
                            client_id
                        };

                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            client_id,
                            clients.clone(),
                            broadcast_tx.subscribe(),
                            client_shutdown.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.recv() => {
                info!("WebSocket server shutting down");
                break;
            }
        }
    }

    drop(listener);

    // clients close on the shutdown broadcast; stragglers are aborted
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        connections.shutdown().await;
    }
    clients.write().await.clear();
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: String,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    mut broadcast_rx: broadcast::Receiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let handshake = tokio::select! {
        result = accept_async(stream) => Some(result),
        _ = shutdown.recv() => None,
    };
    let ws_stream = match handshake {
        Some(Ok(ws)) => ws,
        Some(Err(e)) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            clients.write().await.remove(&client_id);
            return;
        }
        None => {
            clients.write().await.remove(&client_id);
            return;
        }
    };

    info!("New WebSocket connection from {} (id: {})", addr, client_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);
                        if let Some(reply) = command_reply(&text) {
                            if ws_sender.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(json) => {
                        if let Err(e) = ws_sender.send(Message::Text(json)).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagging, skipped {} events", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = shutdown.recv() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    clients.write().await.remove(&client_id);

    info!("WebSocket client {} disconnected", addr);
}

/// Reply to a client command: plain `ping` or `{"type":"ping"}`.
fn command_reply(text: &str) -> Option<String> {
    if text.trim().eq_ignore_ascii_case("ping") {
        return Some("pong".to_string());
    }
    let cmd = serde_json::from_str::<serde_json::Value>(text).ok()?;
    match cmd.get("type").and_then(|v| v.as_str()) {
        Some("ping") => Some(serde_json::json!({ "type": "pong" }).to_string()),
        _ => None,
    }
}
