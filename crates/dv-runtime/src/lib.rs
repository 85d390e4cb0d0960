#![forbid(unsafe_code)]

//! Host-driven session runtime.
//!
//! Ties the message cache, the element tree, and the widget state manager
//! together behind a connection state machine. The [`Session`] performs no
//! I/O: the host feeds it frames and fetch results, calls
//! [`Session::tick`] to let timers fire against the session's [`Clock`], and
//! drains [`SessionOutputs`] after each step. Tests and replays use a
//! [`DeterministicClock`] and advance it by hand.
//!
//! # Example
//!
//! ```
//! use dv_core::{ForwardMsg, ForwardMsgBody, ForwardMsgMetadata, JsonCodec, ScriptRunId};
//! use dv_runtime::{Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::default());
//! session.begin_connect().unwrap();
//! session.on_connected(None).unwrap();
//!
//! let hello = ForwardMsg::new(
//!     "",
//!     ForwardMsgMetadata::default(),
//!     ForwardMsgBody::NewSession {
//!         script_run_id: ScriptRunId::new("run-1"),
//!         page_script_hash: "main".into(),
//!         max_cached_message_age: None,
//!     },
//! );
//! session
//!     .receive(JsonCodec.encode_forward(&hello).unwrap())
//!     .unwrap();
//! assert!(session.is_script_running());
//! ```

pub mod clock;
pub mod config;
pub mod connection;
pub mod message_queue;
pub mod session;

pub use clock::{Clock, DeterministicClock, SystemClock};
pub use config::{BackoffConfig, QueueConfig, SessionConfig};
pub use connection::{Backoff, ConnectionError, ConnectionState, ConnectionStateMachine};
pub use message_queue::{GapTimeout, Ingest, MessageQueue, QueueError};
pub use session::{Diagnostic, DiagnosticKind, Session, SessionError, SessionOutputs};

/// Install a JSON log subscriber. Returns `false` if one was already set.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging(filter: &str) -> bool {
    dv_core::logging::install_json_subscriber(filter)
}
