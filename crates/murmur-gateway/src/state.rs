//! Connection lifecycle state machine.
//!
//! Pure: no I/O and no timers. The driver in `connection` feeds it transport
//! events and executes the returned actions.
//!
//! ```text
//!                connect                open                 connected
//! Disconnected ─────────> Connecting ─────────> Authenticating ─────────> Authenticated
//!       ^                   ^    │                    │                        │
//!       │ give up           │    └──── closed ───┐    │ closed                 │ closed
//!       │                   │ delay elapsed      v    v                        │
//!       └────────────── Reconnecting <─────────────────────────────────────────┘
//! ```

use std::time::Duration;

/// First reconnect waits this long; attempt `n` waits `n` times as long.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Consecutive failed reconnects before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Reconnecting,
}

/// Linear backoff with a ceiling on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// What the driver must do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Sleep for `delay`, then open a new transport.
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Attempts exhausted; stay disconnected until the next `connect`.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnects made since the last successful authentication.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Explicit `connect`: always starts a fresh attempt budget.
    pub fn on_connect(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// Transport is open; the driver sends `auth` next.
    pub fn on_open(&mut self) -> ConnectionState {
        self.state = ConnectionState::Authenticating;
        self.state
    }

    /// Server accepted the token.
    pub fn on_authenticated(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Authenticated;
        self.state
    }

    /// Transport closed, or failed to open.
    pub fn on_close(&mut self) -> ConnectionAction {
        if self.state == ConnectionState::Disconnected {
            return ConnectionAction::GiveUp;
        }

        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::Reconnecting;
            ConnectionAction::ScheduleReconnect {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            }
        } else {
            self.state = ConnectionState::Disconnected;
            ConnectionAction::GiveUp
        }
    }

    /// Backoff delay elapsed.
    pub fn on_retry(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    pub fn on_disconnect(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Disconnected;
        self.state
    }
}
