#![forbid(unsafe_code)]

//! Delta tree: the immutable, structurally shared output of a script run.
//!
//! The server streams [`Delta`](dv_core::Delta)s addressed by child-index
//! paths. [`AppRoot::apply_delta`] turns each one into a new root that shares
//! every untouched subtree with the previous root, and
//! [`AppRoot::clear_stale_nodes`] drops whatever the latest run did not touch.
//!
//! # Example
//!
//! ```
//! use dv_core::{Delta, Element, ForwardMsgMetadata, ScriptRunId};
//! use dv_tree::AppRoot;
//!
//! let run = ScriptRunId::new("r1");
//! let root = AppRoot::empty("")
//!     .apply_delta(&run, &Delta::NewElement(Element::text("Hello")), &ForwardMsgMetadata::at(vec![0, 0]))
//!     .unwrap();
//! assert_eq!(root.main().len(), 1);
//! ```

pub mod node;
pub mod root;

pub use node::{AppNode, BlockNode, ElementNode, PathError};
pub use root::{AppRoot, MAIN_INDEX, SIDEBAR_INDEX, TreeError};
