//! Relay server core: shared state, WebSocket handler, and message
//! forwarding.
//!
//! The relay accepts WebSocket connections addressed by channel identifier
//! (the request path is the identifier), admits them into the
//! [`ChannelRegistry`], announces `START_PEERING` when a pair completes, and
//! forwards every subsequent frame verbatim to the other member. Payloads
//! are opaque — the relay never parses or inspects them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::channels::{self, ChannelRegistry, ConnId};

/// Control frame announcing that both members of a channel are present and
/// peer negotiation may begin.
pub const START_PEERING: &str = "START_PEERING";

/// Shared relay server state holding the channel registry.
pub struct RelayState {
    /// Directory of active channels and their member connections.
    pub channels: ChannelRegistry,
    /// Source of unique connection handles.
    next_conn_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty channel registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: ChannelRegistry::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handles an upgraded WebSocket connection for one channel member.
///
/// The connection lifecycle:
/// 1. Admit the connection into its channel bucket.
/// 2. If this admission completed the pair, broadcast `START_PEERING` to
///    both members.
/// 3. Enter the message loop, forwarding frames to the peer.
/// 4. On disconnect, error, or forced closure, evict the connection.
pub async fn handle_socket(socket: WebSocket, channel_id: String, state: Arc<RelayState>) {
    let conn_id = state.next_conn_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel feeding this connection's writer task. The registry hands
    // clones of the sender to the peer's forwarder and to the sweeper.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let admission = match state.channels.admit(&channel_id, conn_id, tx).await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(channel = %channel_id, conn = conn_id, error = %e, "admission refused");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::info!(
        channel = %channel_id,
        conn = conn_id,
        members = admission.members,
        "connection admitted"
    );

    // Pair complete: signal both members to begin peer negotiation. The
    // senders were snapshotted under the registry lock, so exactly one
    // admission observes the transition to two.
    if let Some(members) = admission.peering {
        tracing::info!(channel = %channel_id, "channel paired, broadcasting start signal");
        for member in members {
            let _ = member.send(Message::Text(START_PEERING.into()));
        }
    }

    // Writer task: drains the frame channel onto the WebSocket. A close
    // frame ends the task, which tears the connection down through the same
    // eviction path as a natural disconnect (the sweeper relies on this).
    let writer_channel = channel_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(channel = %writer_channel, conn = conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader loop: forward inbound payload frames to the peer.
    let reader_channel = channel_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(_) | Message::Binary(_) => {
                    forward(&reader_state, &reader_channel, conn_id, msg).await;
                }
                Message::Close(_) => {
                    tracing::debug!(channel = %reader_channel, conn = conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore ping/pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.channels.evict(&channel_id, conn_id).await;
    tracing::info!(channel = %channel_id, conn = conn_id, "connection closed and evicted");
}

/// Forwards a frame verbatim to every member of the channel except the
/// sender.
///
/// The member snapshot is taken under the registry lock; delivery happens
/// outside it. A failed delivery (the peer's writer is gone) evicts that
/// peer and never aborts delivery to others or surfaces to the sender. With
/// no peer present the frame is dropped — the relay does not buffer.
async fn forward(
    state: &Arc<RelayState>,
    channel_id: &str,
    sender_conn_id: ConnId,
    frame: Message,
) {
    let peers = state.channels.peers(channel_id, sender_conn_id).await;
    for (peer_conn_id, sender) in peers {
        if sender.send(frame.clone()).is_err() {
            tracing::warn!(
                channel = %channel_id,
                conn = peer_conn_id,
                "delivery failed, evicting peer"
            );
            state.channels.evict(channel_id, peer_conn_id).await;
        }
    }
}

/// axum handler that validates the path-carried channel identifier and
/// upgrades the request to a WebSocket connection.
///
/// A malformed identifier is rejected before the upgrade completes, so the
/// client sees the connection close with no frames exchanged and no registry
/// state created.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    if let Err(e) = channels::validate_channel_id(&channel_id) {
        tracing::warn!(channel = %channel_id, error = %e, "rejected connection");
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, channel_id, state))
        .into_response()
}

/// Starts the relay server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-built [`RelayState`].
///
/// This is the primary entry point used by both `main.rs` and test code;
/// sharing the state lets tests observe the registry directly.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/{channel_id}", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}
