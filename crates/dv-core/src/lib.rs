#![forbid(unsafe_code)]

//! Core: wire model, codecs, and logging for the Deltaview session core.
//!
//! Everything the server streams ([`ForwardMsg`], [`Delta`], [`Element`],
//! [`Block`]) and everything the client sends back ([`BackMsg`],
//! [`WidgetStates`]) is a closed, serde-derived sum type defined here. The
//! tree, cache, widget, and runtime crates build on these types.

pub mod back_msg;
pub mod block;
pub mod codec;
pub mod dataframe;
pub mod delta;
pub mod element;
pub mod forward_msg;
pub mod ids;
pub mod logging;
pub mod widget;

pub use back_msg::{BackMsg, RerunRequest};
pub use block::{Block, BlockKind};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use dataframe::{CellValue, Column, ColumnType, DataFrame, DataFrameError};
pub use delta::Delta;
pub use element::{AddRowsError, AlertFormat, Element, NamedDataSet};
pub use forward_msg::{
    ForwardMsg, ForwardMsgBody, ForwardMsgMetadata, PageConfig, PageLayout, ScriptFinishedStatus,
    SessionEvent, SidebarState,
};
pub use ids::{MessageHash, ScriptRunId, is_valid_form_id};
pub use widget::{
    FileUploaderState, NumericKind, UploadedFileInfo, WidgetElement, WidgetKind, WidgetState,
    WidgetStates, WidgetValue, WidgetValueType,
};

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, error, info, trace, warn};
