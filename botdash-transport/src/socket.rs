//! Socket.IO v4 client channel over a WebSocket transport.
//!
//! One driver task owns the socket. It connects on startup, joins the configured
//! namespace, answers Engine.IO heartbeats and dispatches every event to the
//! handlers registered for its topic. When the connection drops it retries with
//! exponential backoff until [`SocketChannel::disconnect`] is called.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::wire::{EnginePacket, OpenHandshake, PacketKind, SocketPacket};
use crate::{
    EventChannel, EventHandler, SubscriptionId, TransportError, TransportErrorKind,
    TransportResult, CONNECT_ERROR_TOPIC, CONNECT_TOPIC, DISCONNECT_TOPIC, RECONNECT_TOPIC,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_PENDING_EMITS: usize = 256;

/// Connection parameters for [`SocketChannel`].
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Server origin, e.g. `http://host:6900`.
    pub server_url: String,
    pub namespace: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            server_url: "http://deadhorse.net:6900".into(),
            namespace: "/v1".into(),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(5),
        }
    }
}

impl SocketConfig {
    /// WebSocket endpoint of the Engine.IO server.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let origin = self.server_url.trim_end_matches('/');
        let origin = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            origin.to_string()
        };
        format!("{origin}/socket.io/?EIO=4&transport=websocket")
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.reconnect_delay, self.reconnect_delay_max, attempt)
    }
}

/// Delay before reconnect attempt `attempt` (0-based): doubles from `base`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max.max(base))
}

enum Command {
    Connect,
    Disconnect,
    Emit(String),
    Shutdown,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<(SubscriptionId, EventHandler)>>,
}

struct Shared {
    registry: RwLock<Registry>,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    fn dispatch(&self, topic: &str, payload: &Value) {
        let handlers: Vec<EventHandler> = {
            let registry = self.registry.read();
            match registry.topics.get(topic) {
                Some(entries) => entries.iter().map(|(_, handler)| handler.clone()).collect(),
                None => return,
            }
        };
        trace!(topic, listeners = handlers.len(), "dispatching event");
        for handler in handlers {
            handler(payload);
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Socket.IO client implementing [`EventChannel`].
pub struct SocketChannel {
    shared: Arc<Shared>,
    namespace: String,
    command_tx: mpsc::UnboundedSender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SocketChannel {
    /// Spawn the driver task and start connecting immediately. Requires a Tokio runtime.
    pub fn open(config: SocketConfig) -> Self {
        let shared = Arc::new(Shared {
            registry: RwLock::new(Registry::default()),
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        info!(endpoint = %config.endpoint(), namespace = %config.namespace, "opening socket channel");
        let namespace = config.namespace.clone();
        let driver = Driver {
            config,
            shared: shared.clone(),
            commands: command_rx,
            pending: VecDeque::new(),
        };
        let handle = tokio::spawn(driver.run());
        Self {
            shared,
            namespace,
            command_tx,
            driver: Mutex::new(Some(handle)),
        }
    }

    fn send(&self, command: Command) -> TransportResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| TransportError::Closed)
    }
}

impl EventChannel for SocketChannel {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.shared
            .registry
            .write()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.shared.registry.write();
        let mut removed = false;
        registry.topics.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    fn unsubscribe_topic(&self, topic: &str) -> usize {
        self.shared
            .registry
            .write()
            .topics
            .remove(topic)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn listener_count(&self, topic: &str) -> usize {
        self.shared
            .registry
            .read()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) {
        if self.send(Command::Connect).is_err() {
            warn!("connect requested on a closed socket channel");
        }
    }

    fn disconnect(&self) {
        self.shared.set_connected(false);
        let _ = self.send(Command::Disconnect);
    }

    fn emit(&self, topic: &str, payload: Value) -> TransportResult<()> {
        let frame = SocketPacket::event(self.namespace.as_str(), topic, payload).to_frame();
        self.send(Command::Emit(frame))
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        if self.command_tx.send(Command::Shutdown).is_err() {
            if let Some(handle) = self.driver.lock().take() {
                handle.abort();
            }
        }
    }
}

enum SessionEnd {
    Lost(String),
    ServerDisconnect,
    ClientDisconnect,
    Shutdown,
}

enum Idle {
    Retry,
    Suspend,
    Shutdown,
}

struct Driver {
    config: SocketConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<String>,
}

impl Driver {
    async fn run(mut self) {
        let mut active = true;
        let mut failures: u32 = 0;
        // Attempts made since the last established session dropped; `None` before the first one.
        let mut reconnect_attempts: Option<u32> = None;

        loop {
            if !active {
                match self.wait_for_connect().await {
                    Idle::Retry => {
                        active = true;
                        failures = 0;
                    }
                    Idle::Suspend => continue,
                    Idle::Shutdown => break,
                }
            }

            if let Some(attempts) = reconnect_attempts.as_mut() {
                *attempts += 1;
            }

            match self.establish().await {
                Ok((socket, open)) => {
                    failures = 0;
                    self.shared.set_connected(true);
                    info!(sid = %open.sid, namespace = %self.config.namespace, "socket connected");
                    self.shared.dispatch(CONNECT_TOPIC, &Value::Null);
                    if let Some(attempts) = reconnect_attempts.take() {
                        self.shared.dispatch(RECONNECT_TOPIC, &json!(attempts));
                    }
                    let end = self.session(socket, &open).await;
                    self.shared.set_connected(false);
                    match end {
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, "socket connection lost");
                            self.shared.dispatch(DISCONNECT_TOPIC, &json!(reason));
                            reconnect_attempts = Some(0);
                        }
                        SessionEnd::ServerDisconnect => {
                            info!("server closed the namespace, waiting for an explicit reconnect");
                            self.shared
                                .dispatch(DISCONNECT_TOPIC, &json!("io server disconnect"));
                            reconnect_attempts = Some(0);
                            active = false;
                            continue;
                        }
                        SessionEnd::ClientDisconnect => {
                            info!("socket disconnected by client");
                            self.shared
                                .dispatch(DISCONNECT_TOPIC, &json!("io client disconnect"));
                            reconnect_attempts = None;
                            active = false;
                            continue;
                        }
                        SessionEnd::Shutdown => break,
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    debug!(error = %err, failures, "socket connect attempt failed");
                    self.shared
                        .dispatch(CONNECT_ERROR_TOPIC, &json!({ "message": err.to_string() }));
                    if reconnect_attempts.is_none() {
                        reconnect_attempts = Some(0);
                    }
                }
            }

            let delay = self.config.backoff(failures.saturating_sub(1));
            match self.wait_backoff(delay).await {
                Idle::Retry => {}
                Idle::Suspend => active = false,
                Idle::Shutdown => break,
            }
        }

        self.shared.set_connected(false);
        debug!("socket driver stopped");
    }

    /// Suspended: only an explicit connect (or shutdown) wakes the driver.
    async fn wait_for_connect(&mut self) -> Idle {
        match self.commands.recv().await {
            Some(Command::Connect) => Idle::Retry,
            Some(Command::Disconnect) => Idle::Suspend,
            Some(Command::Emit(frame)) => {
                self.buffer(frame);
                Idle::Suspend
            }
            Some(Command::Shutdown) | None => Idle::Shutdown,
        }
    }

    /// Backoff between attempts; an explicit connect skips the remaining wait.
    async fn wait_backoff(&mut self, delay: Duration) -> Idle {
        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Idle::Retry,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => return Idle::Retry,
                    Some(Command::Disconnect) => return Idle::Suspend,
                    Some(Command::Emit(frame)) => self.buffer(frame),
                    Some(Command::Shutdown) | None => return Idle::Shutdown,
                }
            }
        }
    }

    fn buffer(&mut self, frame: String) {
        if self.pending.len() >= MAX_PENDING_EMITS {
            warn!("emit buffer full, dropping oldest frame");
            self.pending.pop_front();
        }
        self.pending.push_back(frame);
    }

    async fn establish(&mut self) -> TransportResult<(WsStream, OpenHandshake)> {
        let endpoint = self.config.endpoint();
        let (mut socket, _) = timeout(self.config.connect_timeout, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| TransportError::Transport(format!("timed out connecting to {endpoint}")))?
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Transport))?;

        let open = match timeout(self.config.connect_timeout, socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match EnginePacket::decode(&text) {
                Ok(EnginePacket::Open(open)) => open,
                Ok(other) => {
                    return Err(TransportError::Transport(format!(
                        "expected engine open packet, got {other:?}"
                    )))
                }
                Err(err) => {
                    return Err(TransportError::from_display(
                        err,
                        TransportErrorKind::Serialization,
                    ))
                }
            },
            Ok(Some(Ok(other))) => {
                return Err(TransportError::Transport(format!(
                    "unexpected handshake frame {other:?}"
                )))
            }
            Ok(Some(Err(err))) => {
                return Err(TransportError::from_display(err, TransportErrorKind::Transport))
            }
            Ok(None) => return Err(TransportError::Closed),
            Err(_) => return Err(TransportError::Transport("handshake timed out".into())),
        };

        let join = SocketPacket::connect(self.config.namespace.clone(), None).to_frame();
        socket
            .send(Message::Text(join))
            .await
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Transport))?;

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, socket.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return Err(TransportError::Closed),
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(err))) => {
                    return Err(TransportError::from_display(err, TransportErrorKind::Transport))
                }
                Err(_) => {
                    return Err(TransportError::Transport(
                        "namespace connect timed out".into(),
                    ))
                }
            };
            match EnginePacket::decode(&frame) {
                Ok(EnginePacket::Ping(body)) => {
                    socket
                        .send(Message::Text(EnginePacket::Pong(body).encode()))
                        .await
                        .map_err(|err| {
                            TransportError::from_display(err, TransportErrorKind::Transport)
                        })?;
                }
                Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                    Ok(packet) if packet.namespace == self.config.namespace => match packet.kind {
                        PacketKind::Connect => return Ok((socket, open)),
                        PacketKind::ConnectError => {
                            let message = packet
                                .data
                                .as_ref()
                                .and_then(|data| data.get("message"))
                                .and_then(Value::as_str)
                                .unwrap_or("namespace connect refused")
                                .to_string();
                            return Err(TransportError::Transport(message));
                        }
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "ignoring undecodable handshake frame"),
                },
                Ok(EnginePacket::Close) => return Err(TransportError::Closed),
                Ok(_) => {}
                Err(err) => debug!(error = %err, "ignoring undecodable handshake frame"),
            }
        }
    }

    async fn session(&mut self, mut socket: WsStream, open: &OpenHandshake) -> SessionEnd {
        while let Some(frame) = self.pending.pop_front() {
            if let Err(err) = socket.send(Message::Text(frame)).await {
                return SessionEnd::Lost(format!("transport error: {err}"));
            }
        }

        let silence_limit = Duration::from_millis(open.ping_interval + open.ping_timeout);
        let silence = sleep(silence_limit);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                msg = socket.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(_))) => {
                            warn!("dropping binary frame, attachments are not supported");
                            continue;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(err) = socket.send(Message::Pong(payload)).await {
                                return SessionEnd::Lost(format!("transport error: {err}"));
                            }
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Lost("transport close".into());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return SessionEnd::Lost(format!("transport error: {err}")),
                    };
                    match EnginePacket::decode(&text) {
                        Ok(EnginePacket::Ping(body)) => {
                            silence.as_mut().reset(Instant::now() + silence_limit);
                            if let Err(err) = socket.send(Message::Text(EnginePacket::Pong(body).encode())).await {
                                return SessionEnd::Lost(format!("transport error: {err}"));
                            }
                        }
                        Ok(EnginePacket::Message(body)) => {
                            if let Some(end) = self.handle_packet(&body) {
                                return end;
                            }
                        }
                        Ok(EnginePacket::Close) => return SessionEnd::Lost("transport close".into()),
                        Ok(_) => {}
                        Err(err) => debug!(error = %err, "dropping undecodable frame"),
                    }
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => {}
                    Some(Command::Emit(frame)) => {
                        if let Err(err) = socket.send(Message::Text(frame)).await {
                            return SessionEnd::Lost(format!("transport error: {err}"));
                        }
                    }
                    Some(Command::Disconnect) => {
                        let leave = SocketPacket::disconnect(self.config.namespace.clone()).to_frame();
                        let _ = socket.send(Message::Text(leave)).await;
                        let _ = socket.close(None).await;
                        return SessionEnd::ClientDisconnect;
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = socket.close(None).await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = &mut silence => return SessionEnd::Lost("ping timeout".into()),
            }
        }
    }

    fn handle_packet(&self, body: &str) -> Option<SessionEnd> {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(error = %err, "dropping undecodable packet");
                return None;
            }
        };
        if packet.namespace != self.config.namespace {
            return None;
        }
        match packet.kind {
            PacketKind::Event => {
                if let Some((topic, payload)) = packet.event_parts() {
                    self.shared.dispatch(&topic, &payload);
                }
                None
            }
            PacketKind::Disconnect => Some(SessionEnd::ServerDisconnect),
            _ => None,
        }
    }
}
