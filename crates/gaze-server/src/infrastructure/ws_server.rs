//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from camera clients.
//! 3. Upgrading each connection to a WebSocket session, applying the CORS
//!    policy to the handshake.
//! 4. Running three cooperating pieces per session:
//!    - **Reader** (inline): reads WebSocket messages, turns them into
//!      [`SessionEvent`]s, keeps them in a [`FrameBacklog`], and hands them
//!      to the processor one at a time.
//!    - **Processor** task: owns the [`Session`], takes one event at a time,
//!      runs the CPU-bound pipeline on a blocking thread, and queues the
//!      resulting events.
//!    - **Writer** task: serialises events to JSON text frames.
//! 5. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Ordering and isolation
//!
//! The processor handles exactly one frame at a time, so replies leave in the
//! order frames arrived.  Each connection has its own session, queues and
//! tasks; the only thing shared between connections is the read-only
//! [`FrameProcessor`].
//!
//! # Backpressure
//!
//! The reader never stops reading, so it notices a Close frame as soon as
//! the client sends it.  Work waiting for the processor is bounded instead:
//! at most `frame_queue_depth` messages sit in the backlog, plus one in the
//! hand-off slot and one in flight.  When the backlog is full the oldest
//! waiting message is discarded and later answered with a
//! `"Frame dropped: server busy"` error, so every message still gets exactly
//! one reply, in order.
//!
//! # Disconnect
//!
//! When the reader sees a Close frame, a `disconnect` event or the end of the
//! stream, it signals the processor through a oneshot channel and drops the
//! backlog.  The processor abandons any frame still being computed (its
//! result is discarded), moves the session to `Disconnected`, and exits.
//! Only the frame already in flight may keep a blocking thread busy until it
//! finishes; nothing queued behind it is started.
//!
//! # Oversized messages
//!
//! Messages over `max_frame_bytes` are refused by tungstenite while reading.
//! That is a transport-level rejection: the session ends without an `error`
//! event and the connection is closed.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use gaze_core::FrameProcessor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::application::backlog::FrameBacklog;
use crate::application::session::{
    run_guarded, Dispatch, FrameFailure, Session, SessionEvent, SessionId,
};
use crate::domain::config::ServerConfig;
use crate::domain::cors::CorsPolicy;
use crate::domain::events::{ClientEvent, ServerEvent};

/// How often the accept loop wakes up to check the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long queued replies may take to flush after the client went away.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound, not yet serving, gaze WebSocket server.
///
/// Binding is separate from serving so callers (tests in particular) can bind
/// to port 0 and learn the real address before the accept loop starts.
pub struct GazeServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    processor: Arc<dyn FrameProcessor>,
}

impl GazeServer {
    /// Binds the listener on `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (port in use, missing
    /// permission).
    pub async fn bind(
        config: ServerConfig,
        processor: Arc<dyn FrameProcessor>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            processor,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    /// Runs the accept loop until `running` is set to `false`.
    ///
    /// Each accepted connection is handed to its own Tokio task so one slow
    /// client never blocks others.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!("gaze server listening on {}", self.local_addr()?);

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // A short timeout on `accept()` lets the loop notice the shutdown
            // flag even when nobody is connecting.
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new TCP connection from {peer_addr}");
                    let config = Arc::clone(&self.config);
                    let processor = Arc::clone(&self.processor);
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, config, processor).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient (e.g. too many open files); keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        Ok(())
    }
}

/// Binds and serves in one call.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    config: ServerConfig,
    processor: Arc<dyn FrameProcessor>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    GazeServer::bind(config, processor)
        .await?
        .serve(running)
        .await
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    processor: Arc<dyn FrameProcessor>,
) {
    match run_session(raw_stream, peer_addr, config, processor).await {
        Ok(()) => debug!("connection {peer_addr} closed normally"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// What the reader should do with one WebSocket message.
#[derive(Debug, PartialEq)]
enum Inbound {
    Work(SessionEvent),
    Disconnect,
    Control,
}

/// Runs the complete lifecycle of one WebSocket session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails (including CORS
/// rejection).
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    processor: Arc<dyn FrameProcessor>,
) -> anyhow::Result<()> {
    // ── Step 1: WebSocket handshake ───────────────────────────────────────────
    let cors = config.cors.clone();
    let callback =
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            cors_handshake(&cors, req, resp)
        };
    let ws_stream = accept_hdr_async_with_config(
        raw_stream,
        callback,
        Some(websocket_config(config.max_frame_bytes)),
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    // ── Step 2: connect event → new Session ───────────────────────────────────
    let session = Session::connect(SessionId::new());
    let session_id = session.id();
    info!("session {session_id}: WebSocket established with {peer_addr}");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let depth = config.frame_queue_depth.max(1);
    let mut backlog = FrameBacklog::new(depth);
    // Capacity 1: the processor pulls one event at a time; everything else
    // waits in the backlog where it can be shed.
    let (work_tx, work_rx) = mpsc::channel::<SessionEvent>(1);
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(depth);
    let (disconnect_tx, disconnect_rx) = oneshot::channel::<()>();

    // ── Writer: events → JSON text frames ─────────────────────────────────────
    let mut writer_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("session {session_id}: JSON serialization error: {e}");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                debug!("session {session_id}: WebSocket send failed (client disconnected)");
                return;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Processor: one frame at a time ────────────────────────────────────────
    let processor_task = tokio::spawn(process_events(
        session,
        work_rx,
        event_tx,
        disconnect_rx,
        processor,
    ));

    // ── Reader: runs until the client goes away ───────────────────────────────
    read_client(&mut ws_rx, &work_tx, &mut backlog, session_id).await;

    // ── disconnect event → Session torn down ──────────────────────────────────
    let _ = disconnect_tx.send(());
    drop(work_tx);
    if !backlog.is_empty() {
        debug!(
            "session {session_id}: discarding {} waiting message(s)",
            backlog.live()
        );
    }
    drop(backlog);
    if let Err(e) = processor_task.await {
        error!("session {session_id}: processor task failed: {e}");
    }
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        debug!("session {session_id}: writer did not drain in time; aborting");
        writer_task.abort();
    }

    Ok(())
}

/// Reads client messages into `backlog` and hands them to the processor.
///
/// Reading never waits on the processor.  Returns when the client closes the
/// connection, sends `disconnect`, or the stream fails.
async fn read_client(
    ws_rx: &mut SplitStream<WebSocketStream<TcpStream>>,
    handoff: &mpsc::Sender<SessionEvent>,
    backlog: &mut FrameBacklog,
    session_id: SessionId,
) {
    loop {
        tokio::select! {
            biased;
            // Feeding the processor first keeps a steady stream of input
            // from starving it.
            permit = handoff.reserve(), if !backlog.is_empty() => {
                let Ok(permit) = permit else { return };
                if let Some(event) = backlog.pop() {
                    permit.send(event);
                }
            }
            next = ws_rx.next() => {
                let msg = match next {
                    None => {
                        debug!("session {session_id}: client stream ended");
                        return;
                    }
                    Some(Ok(msg)) => msg,
                    Some(Err(
                        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_),
                    )) => {
                        debug!("session {session_id}: WebSocket closed");
                        return;
                    }
                    Some(Err(WsError::Capacity(e))) => {
                        warn!("session {session_id}: message rejected by transport: {e}");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("session {session_id}: WebSocket error: {e}");
                        return;
                    }
                };

                match classify_message(msg) {
                    Inbound::Work(event) => {
                        if let SessionEvent::Frame(bytes) = &event {
                            debug!("session {session_id}: received frame data ({} bytes)", bytes.len());
                        }
                        if backlog.push(event) {
                            debug!(
                                "session {session_id}: backlog full, oldest message dropped ({} so far)",
                                backlog.shed_total()
                            );
                        }
                    }
                    Inbound::Disconnect => {
                        debug!("session {session_id}: client requested disconnect");
                        return;
                    }
                    Inbound::Control => {}
                }
            }
        }
    }
}

/// Drives the session with handed-off events until disconnect.
async fn process_events(
    mut session: Session,
    mut inbox: mpsc::Receiver<SessionEvent>,
    events: mpsc::Sender<ServerEvent>,
    mut disconnected: oneshot::Receiver<()>,
    processor: Arc<dyn FrameProcessor>,
) -> Session {
    'session: loop {
        let next = tokio::select! {
            biased;
            _ = &mut disconnected => break,
            next = inbox.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        let replies = match session.dispatch(next) {
            Dispatch::Reply(replies) => replies,
            Dispatch::Run { seq, bytes } => {
                let processor = Arc::clone(&processor);
                let work =
                    tokio::task::spawn_blocking(move || run_guarded(processor.as_ref(), &bytes));
                let outcome = tokio::select! {
                    biased;
                    // The blocking work keeps running, but its result is
                    // never delivered.
                    _ = &mut disconnected => break,
                    joined = work => joined.unwrap_or_else(|e| {
                        Err(FrameFailure::Unexpected(format!("frame worker failed: {e}")))
                    }),
                };
                session.complete_frame(seq, outcome).into_iter().collect()
            }
        };

        for event in replies {
            debug!("session {}: sending {}", session.id(), event.name());
            if events.send(event).await.is_err() {
                break 'session;
            }
        }
    }

    session.disconnect();
    session
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Maps one WebSocket message to a reader action.
///
/// Binary messages are frames.  Text messages must be a JSON
/// [`ClientEvent`]; anything else becomes [`SessionEvent::Invalid`] so the
/// client gets an `error` event in sequence with its frame replies.
fn classify_message(msg: WsMessage) -> Inbound {
    match msg {
        WsMessage::Binary(bytes) => Inbound::Work(SessionEvent::Frame(bytes)),
        WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
            Ok(ClientEvent::HandleFrame(bytes)) => Inbound::Work(SessionEvent::Frame(bytes)),
            Ok(ClientEvent::Disconnect) => Inbound::Disconnect,
            Err(e) => Inbound::Work(SessionEvent::Invalid(e.to_string())),
        },
        WsMessage::Close(_) => Inbound::Disconnect,
        // tungstenite answers pings itself.
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Inbound::Control,
    }
}

/// Applies `cors` to the upgrade request.
///
/// Disallowed origins get `403 Forbidden`; allowed ones get the CORS headers
/// added to the `101 Switching Protocols` response.
fn cors_handshake(
    cors: &CorsPolicy,
    req: &Request,
    mut resp: Response,
) -> Result<Response, ErrorResponse> {
    let origin = req
        .headers()
        .get("Origin")
        .and_then(|value| value.to_str().ok());

    if !cors.allows(origin) {
        warn!("rejecting WebSocket handshake from origin {origin:?}");
        let mut reject = ErrorResponse::new(Some("origin not allowed".to_string()));
        *reject.status_mut() = StatusCode::FORBIDDEN;
        return Err(reject);
    }

    for (name, value) in cors.response_headers(origin) {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                resp.headers_mut().insert(name, value);
            }
            Err(e) => warn!("skipping invalid {name} header value: {e}"),
        }
    }
    Ok(resp)
}

fn websocket_config(max_frame_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_bytes);
    config.max_frame_size = Some(max_frame_bytes);
    config
}

// ── Tests ─────────────────────────────────────────────────────────────────────
