use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, StreamExt, stream::SplitStream};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, protocol::WebSocketConfig},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::broadcast,
    config::RelayConfig,
    connection::{Connection, ConnectionId, Payload},
    error::{RelayError, RelayResult},
    registry::Registry,
    validator,
};

type WsStream = WebSocketStream<TcpStream>;

/// Accepts WebSocket clients and relays every valid JSON message they send to
/// all other connected clients.
pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Relay {
    /// Binds the listener described by `config`. A bind failure is fatal.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    /// Wraps an already bound listener; `config.listen` is ignored.
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new(config)),
        }
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        self.listener.local_addr().map_err(RelayError::LocalAddr)
    }

    /// Shared handle to the live connection set.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state.registry)
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    let clients = state.registry.len().await;
                    info!(clients, "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> RelayResult<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

struct RelayState {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    max_message_size: usize,
}

impl RelayState {
    fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            next_id: AtomicU64::new(1),
            max_message_size: config.max_message_size,
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

/// Why a connection left the registry on its own side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Close frame or end of stream.
    Closed,
    TransportError,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let ws = perform_handshake(stream, &state).await?;
    let (sink, stream) = ws.split();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Connection::new(state.next_id(), Some(peer), outbound_tx));
    register_connection(&state, &conn).await;

    let writer = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        Arc::clone(&conn),
        Arc::clone(&state.registry),
    ));
    let reason = run_client_session(&state, &conn, stream).await;

    cleanup_client_disconnect(&state, &conn, reason).await;
    writer.abort();

    Ok(())
}

async fn perform_handshake(stream: TcpStream, state: &RelayState) -> Result<WsStream> {
    tokio_tungstenite::accept_async_with_config(stream, Some(state.websocket_config()))
        .await
        .context("websocket handshake failed")
}

async fn register_connection(state: &RelayState, conn: &Arc<Connection>) {
    state.registry.add(Arc::clone(conn)).await;
    conn.mark_open();
    let clients = state.registry.len().await;
    info!(
        conn_id = %conn.id(),
        peer = ?conn.peer(),
        clients,
        "client connected"
    );
}

/// Drains the connection's outbound queue into the socket.
///
/// A failed write moves the connection to `Errored` and deregisters it, the
/// same as a failed enqueue during broadcast.
async fn run_writer<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    conn: Arc<Connection>,
    registry: Arc<Registry>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Debug,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(err) = sink.send(Message::Text(payload)).await {
            warn!(conn_id = %conn.id(), ?err, "failed to deliver message, dropping connection");
            conn.mark_errored();
            registry.remove(conn.id()).await;
            break;
        }
    }
}

async fn run_client_session(
    state: &RelayState,
    conn: &Connection,
    mut stream: SplitStream<WsStream>,
) -> DisconnectReason {
    // Keep reading after a close frame so the transport can finish the close handshake.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(message) => handle_client_frame(state, conn, message).await,
            Err(err) => {
                warn!(conn_id = %conn.id(), error = %err, "client transport error");
                return DisconnectReason::TransportError;
            }
        }
    }

    DisconnectReason::Closed
}

async fn handle_client_frame(state: &RelayState, conn: &Connection, message: Message) {
    let payload = match message {
        Message::Text(text) => text,
        Message::Binary(bytes) => match validator::decode(&bytes) {
            Some(text) => Payload::from(text.to_owned()),
            None => {
                debug!(
                    conn_id = %conn.id(),
                    len = bytes.len(),
                    "dropping non-UTF-8 binary frame"
                );
                return;
            }
        },
        Message::Close(frame) => {
            debug!(conn_id = %conn.id(), ?frame, "client sent close frame");
            conn.mark_closing();
            return;
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return,
    };

    relay_payload(state, conn, payload).await;
}

async fn relay_payload(state: &RelayState, conn: &Connection, payload: Payload) {
    debug!(conn_id = %conn.id(), bytes = payload.as_str().len(), "message received");

    if !validator::is_valid(payload.as_str()) {
        debug!(conn_id = %conn.id(), "message is not valid JSON, dropping");
        return;
    }

    let outcome = broadcast(&state.registry, &payload, conn.id()).await;
    debug!(
        conn_id = %conn.id(),
        recipients = outcome.recipients,
        delivered = outcome.delivered,
        failed = outcome.failed,
        "message relayed"
    );
}

async fn cleanup_client_disconnect(
    state: &RelayState,
    conn: &Connection,
    reason: DisconnectReason,
) {
    match reason {
        DisconnectReason::Closed => conn.mark_closed(),
        DisconnectReason::TransportError => conn.mark_errored(),
    };

    state.registry.remove(conn.id()).await;
    let clients = state.registry.len().await;
    info!(
        conn_id = %conn.id(),
        peer = ?conn.peer(),
        ?reason,
        clients,
        "client disconnected"
    );
}
