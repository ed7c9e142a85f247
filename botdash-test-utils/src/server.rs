use anyhow::Result;
use botdash_transport::wire::SocketPacket;
use serde_json::Value;

use crate::rest::MockRestApi;
use crate::state::{MockServerConfig, MockServerState};
use crate::websocket::MockSocketServer;

/// High-level handle over the mock REST and Socket.IO servers.
pub struct MockBotServer {
    state: MockServerState,
    rest: MockRestApi,
    socket: MockSocketServer,
}

impl MockBotServer {
    /// Spawns both servers backed by the provided configuration.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let state = MockServerState::new(config);
        let rest = MockRestApi::spawn(state.clone()).await?;
        let socket = MockSocketServer::spawn(state.clone()).await?;
        Ok(Self {
            state,
            rest,
            socket,
        })
    }

    /// REST base URL, including the API prefix.
    #[must_use]
    pub fn rest_url(&self) -> String {
        self.rest.base_url()
    }

    /// Origin for the Socket.IO endpoint.
    #[must_use]
    pub fn socket_url(&self) -> String {
        self.socket.base_url()
    }

    #[must_use]
    pub fn state(&self) -> MockServerState {
        self.state.clone()
    }

    /// Push an event to every joined socket. Returns how many sockets received it.
    pub async fn emit(&self, topic: &str, payload: Value) -> usize {
        let namespace = self.state.config().await.namespace;
        let frame = SocketPacket::event(namespace, topic, payload).to_frame();
        self.state.broadcast(frame).await
    }

    pub async fn drop_connections(&self) -> usize {
        self.state.drop_connections().await
    }

    pub async fn shutdown(&mut self) {
        self.rest.shutdown().await;
        self.socket.shutdown().await;
    }
}
