//! Connection State Machine
//!
//! Defines the valid transitions of the client link. The connect loop owns
//! the only instance and publishes every accepted state to observers.

use std::fmt;

/// State of the client link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Parked, waiting for a start request
    #[default]
    Idle,
    /// Dialling or backing off between attempts
    Connecting,
    /// Both sockets are open and the session is running
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection attempt is starting
    Dial,
    /// Both sockets opened
    Established,
    /// A connection attempt failed
    AttemptFailed,
    /// An established session ended
    Lost,
    /// The connect loop parked (stop or dispose)
    Park,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid; carries the new state
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// The link state machine
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: ConnectionState,
}

impl LinkStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match next_state(self.current_state, event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }
}

/// Get the next state for a given event, if the transition is valid
fn next_state(from: ConnectionState, event: LinkEvent) -> Option<ConnectionState> {
    use ConnectionState::*;
    use LinkEvent::*;

    match (from, event) {
        // Parking is always allowed
        (_, Park) => Some(Idle),

        (Idle | Connecting, Dial) => Some(Connecting),
        (Connecting, Established) => Some(Connected),
        (Connecting, AttemptFailed) => Some(Connecting),
        (Connected, Lost) => Some(Connecting),

        _ => None,
    }
}
