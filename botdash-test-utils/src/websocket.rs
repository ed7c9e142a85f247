use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Result};
use botdash_transport::session::{AUTH_URL_TOPIC, REQUEST_AUTH_URL_TOPIC};
use botdash_transport::wire::{EnginePacket, OpenHandshake, PacketKind, SocketPacket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::{MockServerState, ServerPush};

/// Minimal Socket.IO v4 server speaking the WebSocket transport only.
pub struct MockSocketServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockSocketServer {
    pub async fn spawn(state: MockServerState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept_result = listener.accept() => match accept_result {
                        Ok((stream, _peer)) => {
                            let state = state.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_socket(state, stream).await {
                                    warn!(error = %err, "socket.io connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to accept websocket connection");
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    /// Server origin in the form clients are configured with.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockSocketServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn handle_socket(state: MockServerState, stream: TcpStream) -> Result<()> {
    let captured_path = Arc::new(StdMutex::new(String::new()));
    let path_clone = captured_path.clone();
    let ws_stream = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        if let Ok(mut path) = path_clone.lock() {
            *path = req.uri().path().to_string();
        }
        Ok(resp)
    })
    .await?;
    let path = captured_path
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default();
    if !path.starts_with("/socket.io") {
        bail!("unexpected websocket path {path}");
    }

    let config = state.config().await;
    let namespace = config.namespace.clone();
    let (mut sink, mut source) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerPush>();
    let writer = tokio::spawn(async move {
        while let Some(push) = rx.recv().await {
            match push {
                ServerPush::Frame(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                ServerPush::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    let open = OpenHandshake {
        sid: Uuid::new_v4().to_string(),
        upgrades: Vec::new(),
        ping_interval: config.ping_interval.as_millis() as u64,
        ping_timeout: config.ping_timeout.as_millis() as u64,
        max_payload: Some(1_000_000),
    };
    let _ = tx.send(ServerPush::Frame(EnginePacket::Open(open).encode()));

    let pinger = {
        let tx = tx.clone();
        let period = config.ping_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx.send(ServerPush::Frame(EnginePacket::Ping(String::new()).encode())).is_err() {
                    break;
                }
            }
        })
    };

    let mut socket_id = None;
    while let Some(msg) = source.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let body = match EnginePacket::decode(&text) {
            Ok(EnginePacket::Message(body)) => body,
            Ok(EnginePacket::Close) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(error = %err, "mock server ignoring frame");
                continue;
            }
        };
        let packet = match SocketPacket::decode(&body) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(error = %err, "mock server ignoring packet");
                continue;
            }
        };
        match packet.kind {
            PacketKind::Connect => {
                if packet.namespace != namespace {
                    let refusal = SocketPacket {
                        kind: PacketKind::ConnectError,
                        namespace: packet.namespace.clone(),
                        id: None,
                        data: Some(json!({ "message": "Invalid namespace" })),
                    };
                    let _ = tx.send(ServerPush::Frame(refusal.to_frame()));
                    continue;
                }
                if let Some(action) = state
                    .scenarios()
                    .take_for(ScenarioTrigger::NamespaceConnect)
                    .await
                {
                    match action {
                        ScenarioAction::Delay(delay) => tokio::time::sleep(delay).await,
                        ScenarioAction::Fail { reason, .. } => {
                            let refusal = SocketPacket {
                                kind: PacketKind::ConnectError,
                                namespace: namespace.clone(),
                                id: None,
                                data: Some(json!({ "message": reason })),
                            };
                            let _ = tx.send(ServerPush::Frame(refusal.to_frame()));
                            continue;
                        }
                    }
                }
                // Register first so broadcasts issued right after the ack reach this socket.
                socket_id = Some(state.register_socket(tx.clone()).await);
                let ack = SocketPacket::connect(
                    namespace.clone(),
                    Some(json!({ "sid": Uuid::new_v4().to_string() })),
                );
                let _ = tx.send(ServerPush::Frame(ack.to_frame()));
            }
            PacketKind::Disconnect => break,
            PacketKind::Event => {
                if let Some((name, payload)) = packet.event_parts() {
                    respond_to_event(&state, &tx, &namespace, &name, &payload).await;
                    state.record_client_event(name, payload).await;
                }
            }
            _ => {}
        }
    }

    if let Some(id) = socket_id {
        state.unregister_socket(id).await;
    }
    pinger.abort();
    drop(tx);
    writer.abort();
    Ok(())
}

async fn respond_to_event(
    state: &MockServerState,
    tx: &mpsc::UnboundedSender<ServerPush>,
    namespace: &str,
    name: &str,
    payload: &Value,
) {
    if name != REQUEST_AUTH_URL_TOPIC {
        return;
    }
    let provider = payload
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if let Some(url) = state.config().await.auth_url {
        let reply = SocketPacket::event(
            namespace,
            AUTH_URL_TOPIC,
            json!({ "url": format!("{url}?provider={provider}") }),
        );
        let _ = tx.send(ServerPush::Frame(reply.to_frame()));
    }
}
