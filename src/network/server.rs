//! WebSocket Game Server
//!
//! Async WebSocket server for battle connections. Authenticates the
//! handshake, then hands every frame to the [`Gateway`] and drains the
//! connection's outbound queue. A background loop reaps idle connections
//! and expired sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::UserId;
use crate::network::auth::{bearer_token, query_token, AuthError, Authenticator};
use crate::network::config::ServerConfig;
use crate::network::gateway::Gateway;
use crate::network::protocol::{ErrorCode, ServerMessage};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connection gateway.
    gateway: Arc<Gateway>,
    /// Handshake token verifier.
    authenticator: Arc<dyn Authenticator>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, gateway: Arc<Gateway>, authenticator: Arc<dyn Authenticator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            gateway,
            authenticator,
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.ws_bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Run the server on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let cleanup_gateway = self.gateway.clone();
        let cleanup_config = self.config.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_gateway, cleanup_config).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let overloaded = self.gateway.connection_count().await >= self.config.max_connections;
                            if overloaded {
                                warn!("Connection limit reached, rejecting {}", addr);
                            } else {
                                info!("New connection from {}", addr);
                            }
                            self.handle_connection(stream, addr, overloaded);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, overloaded: bool) {
        let gateway = self.gateway.clone();
        let authenticator = self.authenticator.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut token: Option<String> = None;
            let capture_token = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                token = request
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(bearer_token)
                    .or_else(|| request.uri().query().and_then(query_token))
                    .map(str::to_string);
                Ok(response)
            };

            let mut ws_stream = match accept_hdr_async(stream, capture_token).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            if overloaded {
                reject(&mut ws_stream, ServerMessage::error(ErrorCode::ServerOverloaded, "Server is at capacity")).await;
                return;
            }

            let identity = match authenticate(authenticator.as_ref(), token.as_deref(), config.require_auth) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Authentication failed for {}: {}", addr, e);
                    reject(&mut ws_stream, ServerMessage::error(ErrorCode::Unauthorized, e.to_string())).await;
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

            let connection_id = gateway.on_connect(msg_tx.clone(), identity).await;
            let close_signal = gateway.close_signal(connection_id).await.unwrap_or_default();

            // Writer: closes the socket after a shutdown notice
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let closing = matches!(msg, ServerMessage::Shutdown { .. });
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    if closing {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            });
            let mut writer_done = false;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                gateway.on_text(connection_id, &text).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.try_send(ServerMessage::error(
                                    ErrorCode::InvalidMessage,
                                    "Binary frames are not supported",
                                ));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut sender_task => {
                        writer_done = true;
                        break;
                    }
                    _ = close_signal.notified() => {
                        debug!("Gateway dropped client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            gateway.on_disconnect(connection_id).await;
            drop(msg_tx);

            // Let the writer flush whatever is queued
            if !writer_done && tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            info!(connection_id, "Client {} cleaned up", addr);
        });
    }

    /// Reap idle connections and expired sessions.
    async fn run_cleanup_loop(gateway: Arc<Gateway>, config: ServerConfig) {
        let mut interval = interval(config.cleanup_interval);

        loop {
            interval.tick().await;

            let reaped = gateway.reap_idle(config.idle_timeout).await;
            let purged = gateway.registry().purge_expired(&config.session_timeouts()).await;

            if reaped > 0 || purged > 0 {
                debug!(reaped, purged, "Cleanup pass");
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.gateway.connection_count().await
    }

    /// Get session count.
    pub async fn session_count(&self) -> usize {
        self.gateway.registry().session_count().await
    }
}

/// Resolve the handshake token to an identity.
fn authenticate(
    authenticator: &dyn Authenticator,
    token: Option<&str>,
    require_auth: bool,
) -> Result<Option<UserId>, AuthError> {
    match token {
        Some(token) => authenticator.verify(token).map(Some),
        None if require_auth => Err(AuthError::MissingToken),
        None => Ok(None),
    }
}

/// Send a final error and close before any core logic runs.
async fn reject(ws_stream: &mut WebSocketStream<TcpStream>, message: ServerMessage) {
    if let Ok(text) = message.to_json() {
        let _ = ws_stream.send(Message::Text(text)).await;
    }
    let _ = ws_stream.close(None).await;
}
