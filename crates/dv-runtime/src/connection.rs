#![forbid(unsafe_code)]

//! Connection lifecycle.
//!
//! ```text
//!            begin_connect            on_connected
//! Disconnected ─────────────► Connecting ─────────────► Connected
//!      ▲  ▲                       │                        │
//!      │  └── retry delay ◄───────┘ on_disconnected        │
//!      └────────────────────────────────────────────────────┘ on_disconnected
//!
//! any state ── on_fatal / retries exhausted ──► FatalError (terminal)
//! ```
//!
//! The machine owns no socket. It tells the host when to (re)connect and
//! keeps the opaque session token across reconnects.

use std::fmt;
use std::time::Duration;

use crate::config::BackoffConfig;

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. No further messages are dispatched.
    FatalError { reason: String },
}

impl ConnectionState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::FatalError { .. } => "fatal_error",
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalError { reason } => write!(f, "fatal_error ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    /// `event` is not valid in state `from`.
    InvalidTransition { from: &'static str, event: &'static str },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, event } => {
                write!(f, "cannot handle {event} while {from}")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Doubling retry delay, capped at `max`.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: Backoff,
    max_attempts: Option<u32>,
    /// Consecutive attempts since the last successful connect.
    attempts: u32,
    retry_at: Option<Duration>,
    session_token: Option<String>,
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(config.base, config.max),
            max_attempts: config.max_attempts,
            attempts: 0,
            retry_at: None,
            session_token: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Opaque token identifying the server-side session, if one was issued.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the next reconnect is due, if one is scheduled.
    #[must_use]
    pub fn retry_at(&self) -> Option<Duration> {
        self.retry_at
    }

    /// The host is opening a transport.
    pub fn begin_connect(&mut self) -> Result<(), ConnectionError> {
        self.guard(matches!(self.state, ConnectionState::Disconnected), "begin_connect")?;
        self.attempts = self.attempts.saturating_add(1);
        self.retry_at = None;
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    /// The transport is up. A `None` token keeps the previous one.
    pub fn on_connected(&mut self, session_token: Option<String>) -> Result<(), ConnectionError> {
        self.guard(matches!(self.state, ConnectionState::Connecting), "on_connected")?;
        if session_token.is_some() {
            self.session_token = session_token;
        }
        self.attempts = 0;
        self.backoff.reset();
        self.transition(ConnectionState::Connected);
        Ok(())
    }

    /// The transport dropped or failed to open.
    ///
    /// Returns the delay before the next attempt, or `None` when retries are
    /// exhausted and the machine went fatal. Already disconnected is a
    /// no-op.
    pub fn on_disconnected(&mut self, now: Duration) -> Result<Option<Duration>, ConnectionError> {
        match self.state {
            ConnectionState::Disconnected => return Ok(None),
            ConnectionState::FatalError { .. } => {
                return Err(self.invalid("on_disconnected"));
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        if let Some(max) = self.max_attempts
            && self.attempts >= max
        {
            self.on_fatal(format!("gave up after {max} connection attempts"));
            return Ok(None);
        }

        let delay = self.backoff.next_delay();
        self.retry_at = Some(now.saturating_add(delay));
        self.transition(ConnectionState::Disconnected);
        Ok(Some(delay))
    }

    /// Enter the terminal state.
    pub fn on_fatal(&mut self, reason: impl Into<String>) {
        self.retry_at = None;
        self.transition(ConnectionState::FatalError {
            reason: reason.into(),
        });
    }

    /// Whether a scheduled reconnect is due. Clears the schedule when it is.
    pub fn poll_retry(&mut self, now: Duration) -> bool {
        if !matches!(self.state, ConnectionState::Disconnected) {
            return false;
        }
        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                true
            }
            _ => false,
        }
    }

    /// Leave the current connection without scheduling a retry.
    pub fn shutdown(&mut self) {
        if !self.state.is_fatal() {
            self.retry_at = None;
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn guard(&self, ok: bool, event: &'static str) -> Result<(), ConnectionError> {
        if ok { Ok(()) } else { Err(self.invalid(event)) }
    }

    fn invalid(&self, event: &'static str) -> ConnectionError {
        ConnectionError::InvalidTransition {
            from: self.state.name(),
            event,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "connection state changed");
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn machine(max_attempts: Option<u32>) -> ConnectionStateMachine {
        ConnectionStateMachine::new(&BackoffConfig {
            base: ms(100),
            max: ms(400),
            max_attempts,
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(ms(100), ms(350));
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(350), ms(350)]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), ms(100));
    }

    #[test]
    fn happy_path_keeps_token() {
        let mut conn = machine(None);
        conn.begin_connect().unwrap();
        conn.on_connected(Some("tok".into())).unwrap();
        assert_eq!(conn.state(), &ConnectionState::Connected);

        assert_eq!(conn.on_disconnected(ms(0)).unwrap(), Some(ms(100)));
        assert!(!conn.poll_retry(ms(99)));
        assert!(conn.poll_retry(ms(100)));
        conn.begin_connect().unwrap();
        conn.on_connected(None).unwrap();
        assert_eq!(conn.session_token(), Some("tok"));
    }

    #[test]
    fn failed_attempts_grow_the_delay_until_success() {
        let mut conn = machine(None);
        let mut delays = Vec::new();
        for _ in 0..3 {
            conn.begin_connect().unwrap();
            delays.push(conn.on_disconnected(ms(0)).unwrap());
        }
        assert_eq!(delays, vec![Some(ms(100)), Some(ms(200)), Some(ms(400))]);

        conn.begin_connect().unwrap();
        conn.on_connected(None).unwrap();
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.on_disconnected(ms(0)).unwrap(), Some(ms(100)));
    }

    #[test]
    fn exhausted_attempts_are_fatal() {
        let mut conn = machine(Some(2));
        conn.begin_connect().unwrap();
        assert!(conn.on_disconnected(ms(0)).unwrap().is_some());
        conn.begin_connect().unwrap();
        assert_eq!(conn.on_disconnected(ms(0)).unwrap(), None);
        assert!(conn.state().is_fatal());
        assert!(conn.begin_connect().is_err());
    }

    #[test]
    fn invalid_transitions_are_reported() {
        let mut conn = machine(None);
        assert_eq!(
            conn.on_connected(None),
            Err(ConnectionError::InvalidTransition {
                from: "disconnected",
                event: "on_connected"
            })
        );
        assert_eq!(conn.on_disconnected(ms(0)), Ok(None));
    }

    #[test]
    fn shutdown_cancels_retry() {
        let mut conn = machine(None);
        conn.begin_connect().unwrap();
        conn.on_disconnected(ms(0)).unwrap();
        conn.shutdown();
        assert_eq!(conn.retry_at(), None);
        assert!(!conn.poll_retry(ms(10_000)));
    }
}
