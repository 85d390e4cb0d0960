#![forbid(unsafe_code)]

//! Deltaview public facade crate.
//!
//! Re-exports the wire model, the element tree, the message cache, the
//! widget state manager, and (with the default `runtime` feature) the
//! host-driven [`Session`], plus a prelude for everyday use.

use std::fmt;

// --- Wire model re-exports -------------------------------------------------

pub use dv_core::{
    BackMsg, Block, BlockKind, CodecError, DataFrame, Delta, Element, ForwardMsg, ForwardMsgBody,
    ForwardMsgMetadata, JsonCodec, MessageCodec, MessageHash, PageConfig, ScriptFinishedStatus,
    ScriptRunId, WidgetElement, WidgetKind, WidgetStates, WidgetValue,
};

// --- Tree re-exports -------------------------------------------------------

pub use dv_tree::{AppNode, AppRoot, BlockNode, ElementNode, TreeError};

// --- Cache re-exports ------------------------------------------------------

pub use dv_cache::{CacheError, FetchError, ForwardMsgCache, MessageFetcher, Resolution};

// --- Widget re-exports -----------------------------------------------------

pub use dv_widgets::{FormsData, WidgetError, WidgetSource, WidgetStateManager, WidgetStateUpdate};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use dv_runtime::{
    Clock, ConnectionState, DeterministicClock, Diagnostic, DiagnosticKind, Session,
    SessionConfig, SessionError, SessionOutputs, SystemClock,
};

// --- Errors ---------------------------------------------------------------

/// Any error produced by the session core.
#[derive(Debug)]
pub enum Error {
    Codec(CodecError),
    Tree(TreeError),
    Cache(CacheError),
    Fetch(FetchError),
    Widget(WidgetError),
    #[cfg(feature = "runtime")]
    Session(SessionError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Cache(err) => write!(f, "{err}"),
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Widget(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::Session(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Cache(err) => Some(err),
            Self::Fetch(err) => Some(err),
            Self::Widget(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::Session(err) => Some(err),
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl From<TreeError> for Error {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<WidgetError> for Error {
    fn from(err: WidgetError) -> Self {
        Self::Widget(err)
    }
}

#[cfg(feature = "runtime")]
impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

/// Standard result type for deltaview APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        AppRoot, BackMsg, Delta, Element, Error, ForwardMsg, JsonCodec, MessageCodec, Result,
        WidgetSource, WidgetStateManager, WidgetValue,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{Session, SessionConfig, SessionOutputs};

    pub use crate::{cache, core, tree, widgets};

    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use dv_cache as cache;
pub use dv_core as core;
#[cfg(feature = "runtime")]
pub use dv_runtime as runtime;
pub use dv_tree as tree;
pub use dv_widgets as widgets;
