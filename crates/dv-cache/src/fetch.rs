#![forbid(unsafe_code)]

//! Fetch-by-hash plumbing for cache misses.
//!
//! The cache never performs I/O. A miss hands out a [`WaiterToken`] and, for
//! the first waiter on a hash, asks its owner to fetch. The owner later reports
//! the outcome through [`ForwardMsgCache::complete_fetch`], which fans the
//! fetched payload out to every waiter. Hosts without an event loop can use a
//! [`MessageFetcher`] and [`ForwardMsgCache::resolve_with`] instead.
//!
//! [`ForwardMsgCache::complete_fetch`]: crate::ForwardMsgCache::complete_fetch
//! [`ForwardMsgCache::resolve_with`]: crate::ForwardMsgCache::resolve_with

use std::fmt;

use dv_core::{CodecError, ForwardMsg, MessageHash};

/// Identifies one reference waiting on an in-flight fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterToken(pub(crate) u64);

impl WaiterToken {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Why fetching a missing payload failed.
#[derive(Debug)]
pub enum FetchError {
    /// The host could not retrieve the payload.
    Transport(String),
    /// The fetched bytes are not a valid message.
    Decode(CodecError),
    /// The server answered with a different message than requested.
    HashMismatch {
        expected: MessageHash,
        found: MessageHash,
    },
    /// The fetch was dropped because the session ended.
    Abandoned,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Decode(e) => write!(f, "fetched payload undecodable: {e}"),
            Self::HashMismatch { expected, found } => {
                write!(f, "fetched message {found} but requested {expected}")
            }
            Self::Abandoned => write!(f, "fetch abandoned"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for FetchError {
    fn from(e: CodecError) -> Self {
        Self::Decode(e)
    }
}

/// Synchronous fetch-by-hash collaborator.
pub trait MessageFetcher {
    /// Retrieve the encoded message stored under `hash`.
    fn fetch(&mut self, hash: &MessageHash) -> Result<Vec<u8>, FetchError>;
}

impl<F> MessageFetcher for F
where
    F: FnMut(&MessageHash) -> Result<Vec<u8>, FetchError>,
{
    fn fetch(&mut self, hash: &MessageHash) -> Result<Vec<u8>, FetchError> {
        self(hash)
    }
}

/// Result of a successful fetch: one resolved message per waiter, in the
/// order the waiters arrived.
#[derive(Clone, Debug)]
pub struct FetchCompletion {
    pub hash: MessageHash,
    pub resolved: Vec<(WaiterToken, ForwardMsg)>,
}

impl FetchCompletion {
    /// The message resolved for `token`, if it was waiting on this fetch.
    #[must_use]
    pub fn take(&mut self, token: WaiterToken) -> Option<ForwardMsg> {
        let index = self.resolved.iter().position(|(t, _)| *t == token)?;
        Some(self.resolved.remove(index).1)
    }
}
