//! Server lifecycle state machine

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

// ----------------------------------------------------------------------------
// Server State
// ----------------------------------------------------------------------------

/// Lifecycle state of a server instance.
///
/// The only legal path is `Stopped -> Starting -> Running -> Stopping -> Stopped`,
/// plus `Starting -> Stopped` when a start attempt fails part way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServerState {
    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "Stopped"),
            ServerState::Starting => write!(f, "Starting"),
            ServerState::Running => write!(f, "Running"),
            ServerState::Stopping => write!(f, "Stopping"),
        }
    }
}

// ----------------------------------------------------------------------------
// Shared State Cell
// ----------------------------------------------------------------------------

/// Atomic holder for the single [`ServerState`] value.
///
/// Owned by the controller and read lock-free by the acceptor and session workers.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ServerState::Stopped as u8))
    }

    /// Current state
    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// True while the server accepts and serves connections
    pub fn is_running(&self) -> bool {
        self.get() == ServerState::Running
    }

    /// Move from `from` to `to`.
    ///
    /// Fails if `from -> to` is not an edge of the state machine or if the
    /// current state is not `from`.
    pub fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerError> {
        if !from.can_transition_to(to) {
            return Err(ServerError::InvalidTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ServerError::InvalidTransition {
                from: ServerState::from_u8(actual),
                to,
            })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
