//! Server-to-client messages.
//!
//! A [`ForwardMsg`] either carries a full body or, when the server knows the
//! client has already seen an identical payload, a [`ForwardMsgBody::RefHash`]
//! pointing at it. The receiver, not the sender, assigns arrival indices.

use serde::{Deserialize, Serialize};

use crate::delta::Delta;
use crate::ids::{MessageHash, ScriptRunId};

/// Per-message metadata. It legitimately differs between a payload and every
/// reference to it (a reference usually targets a different delta path).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardMsgMetadata {
    /// Whether the client should keep this payload for later references.
    #[serde(default)]
    pub cacheable: bool,
    /// Child indices from the tree root. The first index selects the top-level
    /// container (0 = main, 1 = sidebar).
    #[serde(default)]
    pub delta_path: Vec<usize>,
}

impl ForwardMsgMetadata {
    #[must_use]
    pub fn at(delta_path: Vec<usize>) -> Self {
        Self {
            cacheable: false,
            delta_path,
        }
    }

    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

/// How a script run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFinishedStatus {
    FinishedSuccessfully,
    FinishedWithCompileError,
    /// The run was interrupted because another run was requested.
    FinishedEarlyForRerun,
}

/// Page layout mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLayout {
    #[default]
    Centered,
    Wide,
}

/// Initial sidebar visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebarState {
    #[default]
    Auto,
    Expanded,
    Collapsed,
}

/// Page-level settings requested by the script.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub layout: PageLayout,
    #[serde(default)]
    pub initial_sidebar_state: SidebarState,
}

/// Out-of-band session notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ScriptChangedOnDisk,
    ScriptCompilationException { message: String },
}

/// Body of a [`ForwardMsg`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwardMsgBody {
    /// A script run has started.
    NewSession {
        script_run_id: ScriptRunId,
        #[serde(default)]
        page_script_hash: String,
        /// Cache TTL in script runs; `None` keeps the client's configured value.
        #[serde(default)]
        max_cached_message_age: Option<u32>,
    },
    SessionStatusChanged {
        script_is_running: bool,
        #[serde(default)]
        run_on_save: bool,
    },
    Delta {
        delta: Delta,
    },
    ScriptFinished {
        status: ScriptFinishedStatus,
    },
    PageConfigChanged {
        config: PageConfig,
    },
    SessionEvent {
        event: SessionEvent,
    },
    /// Reference to a previously sent payload with this hash.
    RefHash {
        ref_hash: MessageHash,
    },
}

impl ForwardMsgBody {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewSession { .. } => "new_session",
            Self::SessionStatusChanged { .. } => "session_status_changed",
            Self::Delta { .. } => "delta",
            Self::ScriptFinished { .. } => "script_finished",
            Self::PageConfigChanged { .. } => "page_config_changed",
            Self::SessionEvent { .. } => "session_event",
            Self::RefHash { .. } => "ref_hash",
        }
    }
}

/// One message from the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardMsg {
    #[serde(default)]
    pub hash: MessageHash,
    #[serde(default)]
    pub metadata: ForwardMsgMetadata,
    #[serde(flatten)]
    pub body: ForwardMsgBody,
}

impl ForwardMsg {
    #[must_use]
    pub fn new(
        hash: impl Into<MessageHash>,
        metadata: ForwardMsgMetadata,
        body: ForwardMsgBody,
    ) -> Self {
        Self {
            hash: hash.into(),
            metadata,
            body,
        }
    }

    /// A delta message targeting `delta_path`.
    #[must_use]
    pub fn delta(hash: impl Into<MessageHash>, delta_path: Vec<usize>, delta: Delta) -> Self {
        Self::new(
            hash,
            ForwardMsgMetadata::at(delta_path),
            ForwardMsgBody::Delta { delta },
        )
    }

    /// A reference to the payload stored under `ref_hash`.
    #[must_use]
    pub fn reference(ref_hash: impl Into<MessageHash>, metadata: ForwardMsgMetadata) -> Self {
        Self {
            hash: MessageHash::default(),
            metadata,
            body: ForwardMsgBody::RefHash {
                ref_hash: ref_hash.into(),
            },
        }
    }

    /// The referenced hash if this is a reference message.
    #[must_use]
    pub fn ref_hash(&self) -> Option<&MessageHash> {
        match &self.body {
            ForwardMsgBody::RefHash { ref_hash } => Some(ref_hash),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.ref_hash().is_some()
    }
}
