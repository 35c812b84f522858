use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// How long an indicator stays up after the last signal.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(2000);

/// "Peer is typing" state for the open conversation.
///
/// Only the active peer's signals count. Each signal pushes the hide deadline
/// out to `now + timeout`. Time is passed in so the router can drive it from
/// the tokio clock.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    timeout: Duration,
    active_peer: Option<Uuid>,
    visible_until: Option<Instant>,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active_peer: None,
            visible_until: None,
        }
    }

    pub fn active_peer(&self) -> Option<Uuid> {
        self.active_peer
    }

    pub fn is_visible(&self) -> bool {
        self.visible_until.is_some()
    }

    /// When the indicator will hide, if it is showing.
    pub fn deadline(&self) -> Option<Instant> {
        self.visible_until
    }

    /// Returns true when this signal made the indicator appear.
    pub fn on_signal(&mut self, sender: Uuid, now: Instant) -> bool {
        if self.active_peer != Some(sender) {
            return false;
        }
        let was_visible = self.visible_until.is_some();
        self.visible_until = Some(now + self.timeout);
        !was_visible
    }

    /// Hide the indicator if its deadline has passed; returns the peer it was for.
    pub fn poll_expired(&mut self, now: Instant) -> Option<Uuid> {
        match self.visible_until {
            Some(until) if now >= until => {
                self.visible_until = None;
                self.active_peer
            }
            _ => None,
        }
    }

    /// Switch conversations. Returns the peer whose indicator got hidden.
    pub fn set_active_peer(&mut self, peer: Option<Uuid>) -> Option<Uuid> {
        if peer == self.active_peer {
            return None;
        }
        let hidden = self.visible_until.take().and(self.active_peer);
        self.active_peer = peer;
        hidden
    }
}
