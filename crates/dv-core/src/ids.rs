//! Identifier newtypes carried on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content hash of a forward message, assigned by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHash(String);

impl MessageHash {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of one script run.
///
/// Every tree node remembers the run that last touched it; nodes whose run id
/// differs from the current run are stale once that run finishes.
/// The empty id never matches a real run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptRunId(String);

impl ScriptRunId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The run id used for nodes that were never produced by a script run.
    #[must_use]
    pub fn none() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ScriptRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptRunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScriptRunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Returns `true` if `form_id` names a form. The empty string means "no form".
#[inline]
#[must_use]
pub fn is_valid_form_id(form_id: &str) -> bool {
    !form_id.is_empty()
}
