//! Per-connection session state machine.
//!
//! Each WebSocket connection owns exactly one [`Session`].  The session has
//! two states and no intermediate ones:
//!
//! ```text
//!            connect
//!               │
//!               ▼
//!        ┌────────────┐  frame (gaze_data | error)
//!        │ Connected  │◄───────────────┐
//!        └────────────┘────────────────┘
//!               │ disconnect
//!               ▼
//!        ┌──────────────┐
//!        │ Disconnected │  (terminal: no further events are emitted)
//!        └──────────────┘
//! ```
//!
//! Inbound work arrives as [`SessionEvent`]s and goes through
//! [`Session::dispatch`].  Frames are handled one at a time: a frame event
//! yields [`Dispatch::Run`], and [`Session::complete_frame`] closes it, dropping
//! the result if the client disconnected meanwhile.  Nothing is carried from
//! one frame to the next.
//!
//! The failure boundary is explicit: [`run_guarded`] turns every pipeline
//! error *and* every panic inside the pipeline into a [`FrameFailure`], and
//! [`outcome_to_event`] maps any result onto exactly one outbound event.  A
//! bad frame therefore never ends the session.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use gaze_core::{FrameProcessor, GazeOutcome, PipelineError};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::events::{GazePayload, ServerEvent, FRAME_DROPPED};

// ── Identity and state ────────────────────────────────────────────────────────

/// Opaque identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Queued inbound work for a connected session, in arrival order.
///
/// Disconnect is not queued: it is signalled out of band and applied with
/// [`Session::disconnect`] so it overtakes any waiting work.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Raw bytes of one encoded still image.
    Frame(Vec<u8>),

    /// A message that was not a usable event, with the reason.
    Invalid(String),

    /// This many earlier messages were discarded because the session was
    /// behind.
    Shed(u32),
}

/// What the caller has to do after [`Session::dispatch`].
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Run the pipeline on `bytes`, then report with
    /// [`Session::complete_frame`]`(seq, ..)`.
    Run { seq: u64, bytes: Vec<u8> },

    /// Send these events; no pipeline work is needed.
    Reply(Vec<ServerEvent>),
}

/// Transitions the state machine refuses.
#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("session {0} is disconnected")]
    Disconnected(SessionId),

    #[error("session {id} is still processing frame {seq}")]
    FrameInFlight { id: SessionId, seq: u64 },
}

/// Why a frame produced no gaze result.
#[derive(Debug, Error)]
pub enum FrameFailure {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The pipeline panicked or its worker was lost.
    #[error("{0}")]
    Unexpected(String),
}

impl FrameFailure {
    fn is_decode_failure(&self) -> bool {
        matches!(self, FrameFailure::Pipeline(e) if e.is_decode_failure())
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_handled: u64,
    pub faces_missed: u64,
    pub errors: u64,
    pub frames_shed: u64,
}

// ── Failure boundary ──────────────────────────────────────────────────────────

/// Runs `processor` on one frame, converting panics into
/// [`FrameFailure::Unexpected`].
///
/// This is the only place a frame is processed, so no fault in decoding,
/// detection or estimation can unwind past it.
pub fn run_guarded<P>(processor: &P, bytes: &[u8]) -> Result<GazeOutcome, FrameFailure>
where
    P: FrameProcessor + ?Sized,
{
    match catch_unwind(AssertUnwindSafe(|| processor.process(bytes))) {
        Ok(result) => result.map_err(FrameFailure::from),
        Err(payload) => Err(FrameFailure::Unexpected(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_string()
    }
}

/// Maps a frame result onto the single event sent back to the client.
///
/// | Result                         | Event                                         |
/// |--------------------------------|-----------------------------------------------|
/// | `Found(gaze)`                  | `gaze_data` with four coordinates             |
/// | `NotFound`                     | `gaze_data` with `{"error": "Failed to ..."}` |
/// | decode failure                 | `error` "Failed to decode frame: ..."         |
/// | any other failure              | `error` "Error in processing frame: ..."      |
pub fn outcome_to_event(outcome: &Result<GazeOutcome, FrameFailure>) -> ServerEvent {
    match outcome {
        Ok(GazeOutcome::Found(gaze)) => ServerEvent::GazeData(GazePayload::Gaze(*gaze)),
        Ok(GazeOutcome::NotFound) => ServerEvent::GazeData(GazePayload::not_detected()),
        Err(e) if e.is_decode_failure() => {
            ServerEvent::error(format!("Failed to decode frame: {e}"))
        }
        Err(e) => ServerEvent::error(format!("Error in processing frame: {e}")),
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// State of one client connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    next_seq: u64,
    in_flight: Option<u64>,
    stats: SessionStats,
}

impl Session {
    /// Handles the `connect` event: a new session starts `Connected`.
    pub fn connect(id: SessionId) -> Self {
        info!("session {id}: client connected");
        Self {
            id,
            state: SessionState::Connected,
            next_seq: 0,
            in_flight: None,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Accepts a `frame` event and returns its sequence number.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Disconnected`] after [`disconnect`](Self::disconnect).
    /// - [`SessionError::FrameInFlight`] if the previous frame has not been
    ///   completed yet.
    pub fn begin_frame(&mut self) -> Result<u64, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected(self.id));
        }
        if let Some(seq) = self.in_flight {
            return Err(SessionError::FrameInFlight { id: self.id, seq });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight = Some(seq);
        debug!("session {}: received frame {seq}", self.id);
        Ok(seq)
    }

    /// Finishes frame `seq` and returns the event to send, if any.
    ///
    /// Returns `None` when the session disconnected while the frame was being
    /// processed (the channel is gone) or when `seq` is not the frame in
    /// flight.
    pub fn complete_frame(
        &mut self,
        seq: u64,
        outcome: Result<GazeOutcome, FrameFailure>,
    ) -> Option<ServerEvent> {
        if !self.is_connected() {
            debug!("session {}: dropping result of frame {seq} after disconnect", self.id);
            return None;
        }
        if self.in_flight != Some(seq) {
            warn!(
                "session {}: result for frame {seq} does not match in-flight {:?}",
                self.id, self.in_flight
            );
            return None;
        }
        self.in_flight = None;
        self.stats.frames_handled += 1;

        match &outcome {
            Ok(GazeOutcome::Found(_)) => debug!("session {}: frame {seq} processed", self.id),
            Ok(GazeOutcome::NotFound) => {
                self.stats.faces_missed += 1;
                warn!("session {}: frame {seq}: failed to detect eyes", self.id);
            }
            Err(e) if e.is_decode_failure() => {
                self.stats.errors += 1;
                error!("session {}: frame {seq}: failed to decode frame: {e}", self.id);
            }
            Err(e) => {
                self.stats.errors += 1;
                error!("session {}: frame {seq}: error in processing frame: {e}", self.id);
            }
        }

        Some(outcome_to_event(&outcome))
    }

    /// Reports an inbound message that was not a usable event.
    ///
    /// The session stays `Connected`.
    pub fn reject_message(&mut self, reason: &str) -> Option<ServerEvent> {
        if !self.is_connected() {
            return None;
        }
        self.stats.errors += 1;
        warn!("session {}: invalid message: {reason}", self.id);
        Some(ServerEvent::error(format!("Invalid message: {reason}")))
    }

    /// Handles the `disconnect` event.  Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        self.in_flight = None;
        info!(
            "session {}: client disconnected ({} frames, {} without face, {} errors, {} shed)",
            self.id,
            self.stats.frames_handled,
            self.stats.faces_missed,
            self.stats.errors,
            self.stats.frames_shed
        );
    }

    /// Answers `count` messages that were discarded unprocessed.
    ///
    /// Each one gets its own `error` event so the client still receives one
    /// reply per message.
    pub fn shed(&mut self, count: u32) -> Vec<ServerEvent> {
        if !self.is_connected() || count == 0 {
            return Vec::new();
        }
        self.stats.frames_shed += u64::from(count);
        warn!("session {}: {count} message(s) dropped, server busy", self.id);
        (0..count).map(|_| ServerEvent::error(FRAME_DROPPED)).collect()
    }

    /// Applies one queued event.
    ///
    /// Frames are not processed here: the pipeline is CPU bound, so the
    /// caller runs it where it can afford to block and reports back through
    /// [`complete_frame`](Self::complete_frame).
    pub fn dispatch(&mut self, event: SessionEvent) -> Dispatch {
        match event {
            SessionEvent::Frame(bytes) => match self.begin_frame() {
                Ok(seq) => Dispatch::Run { seq, bytes },
                Err(e) => {
                    debug!("{e}; frame ignored");
                    Dispatch::Reply(Vec::new())
                }
            },
            SessionEvent::Invalid(reason) => {
                Dispatch::Reply(self.reject_message(&reason).into_iter().collect())
            }
            SessionEvent::Shed(count) => Dispatch::Reply(self.shed(count)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
