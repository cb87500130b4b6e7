use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU8, Ordering},
};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Text payload shared between the reader that received it and every writer it fans out to.
pub type Payload = Utf8Bytes;

/// Stable per-connection handle, allocated once at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its lifetime.
///
/// Transitions only move forward: `Accepted -> Open -> Closing -> Closed`, with
/// `Errored` reachable from any non-terminal state. `Closed` and `Errored` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Accepted = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
    Errored = 4,
}

impl ReadyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ReadyState::Accepted,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            3 => ReadyState::Closed,
            _ => ReadyState::Errored,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReadyState::Closed | ReadyState::Errored)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("{id} is not open (state: {state:?})")]
    NotOpen { id: ConnectionId, state: ReadyState },
    #[error("{id} outbound channel is closed")]
    ChannelClosed { id: ConnectionId },
}

/// One client's side of the relay.
///
/// The socket itself lives in the per-connection tasks; this handle only carries
/// identity, ready state, and the sending end of the writer task's queue.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Payload>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Payload>,
    ) -> Self {
        Self {
            id,
            peer,
            state: AtomicU8::new(ReadyState::Accepted as u8),
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn mark_open(&self) -> bool {
        self.transition(ReadyState::Open)
    }

    pub fn mark_closing(&self) -> bool {
        self.transition(ReadyState::Closing)
    }

    pub fn mark_closed(&self) -> bool {
        self.transition(ReadyState::Closed)
    }

    pub fn mark_errored(&self) -> bool {
        self.transition(ReadyState::Errored)
    }

    /// Queues `payload` for the writer task without waiting on the socket.
    ///
    /// A closed queue means the writer is gone; the connection is moved to
    /// `Errored` so later broadcasts skip it.
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(SendError::NotOpen { id: self.id, state });
        }

        self.outbound.send(payload).map_err(|_| {
            self.mark_errored();
            SendError::ChannelClosed { id: self.id }
        })
    }

    fn transition(&self, next: ReadyState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ReadyState::from_u8(current);
            if from.is_terminal() || ((from as u8) >= (next as u8) && next != ReadyState::Errored) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.ready_state())
            .finish()
    }
}
