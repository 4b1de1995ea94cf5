//! Bounded per-connection backlog of work waiting for the session.
//!
//! The WebSocket reader never stops reading: it has to see a Close frame as
//! soon as the client sends it.  Memory stays bounded because the backlog
//! holds at most `capacity` live events.  When one more arrives, the oldest
//! waiting event is shed: its payload is freed and it is replaced by a
//! counter at the front of the queue.
//!
//! ```text
//! capacity = 2
//!
//! push F1, F2        [F1, F2]
//! push F3            [Shed(1), F2, F3]
//! push F4            [Shed(2), F3, F4]
//! pop                Shed(2)  → two "Frame dropped" errors, in order
//! ```
//!
//! Every shed event is still answered, so the client receives exactly one
//! reply per message, in the order it sent them.

use std::collections::VecDeque;

use super::session::SessionEvent;

/// FIFO of [`SessionEvent`]s with drop-oldest overflow.
///
/// Invariant: at most one `Shed` marker exists and, when present, it is at
/// the front.  Everything behind it is live.
#[derive(Debug)]
pub struct FrameBacklog {
    events: VecDeque<SessionEvent>,
    capacity: usize,
    shed_total: u64,
}

impl FrameBacklog {
    /// A backlog holding at most `capacity` live events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity + 1),
            capacity,
            shed_total: 0,
        }
    }

    /// Appends `event`, shedding the oldest live event if the backlog is full.
    ///
    /// Returns `true` when something was shed.
    pub fn push(&mut self, event: SessionEvent) -> bool {
        let shed = self.live() >= self.capacity;
        if shed {
            let oldest = usize::from(self.has_marker());
            self.events.remove(oldest);
            match self.events.front_mut() {
                Some(SessionEvent::Shed(count)) if oldest == 1 => *count += 1,
                _ => self.events.push_front(SessionEvent::Shed(1)),
            }
            self.shed_total += 1;
        }
        self.events.push_back(event);
        shed
    }

    /// Removes the next event in arrival order.
    pub fn pop(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events still carrying work.
    pub fn live(&self) -> usize {
        self.events.len() - usize::from(self.has_marker())
    }

    /// Events shed since the backlog was created.
    pub fn shed_total(&self) -> u64 {
        self.shed_total
    }

    fn has_marker(&self) -> bool {
        matches!(self.events.front(), Some(SessionEvent::Shed(_)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
