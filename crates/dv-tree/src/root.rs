#![forbid(unsafe_code)]

//! The tree root and delta application.
//!
//! [`AppRoot`] holds the two top-level containers, main (path index 0) and
//! sidebar (path index 1). Both are always present; pruning may empty them but
//! never removes them. Every operation returns a new root and leaves `self`
//! intact, so a renderer holding an old root keeps a consistent snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dv_core::{
    AddRowsError, Block, DataFrameError, Delta, Element, ForwardMsgMetadata, NamedDataSet,
    ScriptRunId, WidgetElement,
};

use crate::node::{AppNode, BlockNode, ElementNode, PathError};

/// Path index of the main container.
pub const MAIN_INDEX: usize = 0;
/// Path index of the sidebar container.
pub const SIDEBAR_INDEX: usize = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a delta could not be applied. The tree is unchanged in every case.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    /// The delta path does not resolve.
    InvalidDeltaPath { path: Vec<usize>, reason: PathError },
    /// Rows were sent to an element with no append semantics.
    UnsupportedAddRows {
        path: Vec<usize>,
        element_type: &'static str,
    },
    /// Rows do not fit the target's schema.
    RowAppendTypeMismatch {
        path: Vec<usize>,
        source: DataFrameError,
    },
}

impl TreeError {
    /// The delta path the failed delta targeted.
    #[must_use]
    pub fn path(&self) -> &[usize] {
        match self {
            Self::InvalidDeltaPath { path, .. }
            | Self::UnsupportedAddRows { path, .. }
            | Self::RowAppendTypeMismatch { path, .. } => path,
        }
    }
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDeltaPath { path, reason } => {
                write!(f, "invalid delta path {path:?}: {reason}")
            }
            Self::UnsupportedAddRows { path, element_type } => {
                write!(f, "cannot add rows to {element_type} element at {path:?}")
            }
            Self::RowAppendTypeMismatch { path, source } => {
                write!(f, "row append at {path:?} rejected: {source}")
            }
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RowAppendTypeMismatch { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AppRoot
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of the whole output tree.
///
/// Cloning is two reference-count bumps.
#[derive(Clone, Debug)]
pub struct AppRoot {
    main: Arc<BlockNode>,
    sidebar: Arc<BlockNode>,
}

impl Default for AppRoot {
    fn default() -> Self {
        Self::empty("")
    }
}

impl AppRoot {
    /// A fresh root. A non-empty `placeholder` becomes a single text element
    /// in main, stamped with the empty run id so the first finished run prunes it.
    #[must_use]
    pub fn empty(placeholder: &str) -> Self {
        let main_children = if placeholder.is_empty() {
            Vec::new()
        } else {
            vec![AppNode::from(ElementNode::new(
                Element::text(placeholder),
                ForwardMsgMetadata::default(),
                ScriptRunId::none(),
            ))]
        };

        Self {
            main: Arc::new(BlockNode::new(
                Block::vertical(),
                main_children,
                ScriptRunId::none(),
            )),
            sidebar: Arc::new(BlockNode::empty(Block::vertical(), ScriptRunId::none())),
        }
    }

    #[must_use]
    pub fn main(&self) -> &Arc<BlockNode> {
        &self.main
    }

    #[must_use]
    pub fn sidebar(&self) -> &Arc<BlockNode> {
        &self.sidebar
    }

    fn container(&self, index: usize) -> Option<&Arc<BlockNode>> {
        match index {
            MAIN_INDEX => Some(&self.main),
            SIDEBAR_INDEX => Some(&self.sidebar),
            _ => None,
        }
    }

    /// Node at a full delta path (container index first).
    #[must_use]
    pub fn get_in(&self, path: &[usize]) -> Option<&AppNode> {
        let (&container, rest) = path.split_first()?;
        self.container(container)?.get_in(rest)
    }

    /// Apply one delta produced by run `run_id` at `metadata.delta_path`.
    ///
    /// On success the returned root shares every subtree off the path with
    /// `self`. On error nothing is built and `self` remains the current tree.
    pub fn apply_delta(
        &self,
        run_id: &ScriptRunId,
        delta: &Delta,
        metadata: &ForwardMsgMetadata,
    ) -> Result<AppRoot, TreeError> {
        let path = metadata.delta_path.as_slice();
        let invalid = |reason| TreeError::InvalidDeltaPath {
            path: path.to_vec(),
            reason,
        };

        let (&container_index, rest) = path.split_first().ok_or(invalid(PathError::TooShort))?;
        if rest.is_empty() {
            return Err(invalid(PathError::TooShort));
        }
        let container = self.container(container_index).ok_or(invalid(
            PathError::OutOfBounds {
                depth: 0,
                index: container_index,
                len: 2,
            },
        ))?;

        let node = match delta {
            Delta::NewElement(element) => AppNode::from(ElementNode::new(
                element.clone(),
                metadata.clone(),
                run_id.clone(),
            )),
            Delta::AddBlock(block) => {
                // A same-kind block at the target keeps its children so widgets
                // inside it survive the rerun until pruning decides otherwise.
                let inherited = container
                    .get_in(rest)
                    .and_then(AppNode::as_block)
                    .filter(|existing| existing.block().kind.same_kind(&block.kind))
                    .map(|existing| existing.children().to_vec())
                    .unwrap_or_default();
                AppNode::from(BlockNode::new(block.clone(), inherited, run_id.clone()))
            }
            Delta::AddRows(rows) => Self::rows_added(container, rest, path, rows, run_id)?,
        };

        let rebuilt = container
            .set_in(rest, node, run_id)
            .map_err(|reason| invalid(shift_depth(reason)))?;

        dv_core::trace!(
            delta = delta.name(),
            path = ?path,
            run = %run_id,
            "applied delta"
        );

        let rebuilt = Arc::new(rebuilt);
        Ok(if container_index == MAIN_INDEX {
            Self {
                main: rebuilt,
                sidebar: Arc::clone(&self.sidebar),
            }
        } else {
            Self {
                main: Arc::clone(&self.main),
                sidebar: rebuilt,
            }
        })
    }

    fn rows_added(
        container: &BlockNode,
        rest: &[usize],
        path: &[usize],
        rows: &NamedDataSet,
        run_id: &ScriptRunId,
    ) -> Result<AppNode, TreeError> {
        let target = container
            .get_in(rest)
            .and_then(AppNode::as_element)
            .ok_or_else(|| TreeError::InvalidDeltaPath {
                path: path.to_vec(),
                reason: PathError::NoElement,
            })?;

        match target.with_rows_added(rows, run_id) {
            Ok(grown) => Ok(grown.into()),
            Err(AddRowsError::Unsupported { element_type }) => {
                Err(TreeError::UnsupportedAddRows {
                    path: path.to_vec(),
                    element_type,
                })
            }
            Err(AddRowsError::Mismatch(source)) => Err(TreeError::RowAppendTypeMismatch {
                path: path.to_vec(),
                source,
            }),
        }
    }

    /// Drop every node not produced by `current`.
    ///
    /// Main and sidebar always survive, even when emptied. Subtrees with
    /// nothing to prune come back pointer-equal to the ones in `self`.
    #[must_use]
    pub fn clear_stale_nodes(&self, current: &ScriptRunId) -> AppRoot {
        let prune = |container: &Arc<BlockNode>| {
            container
                .prune_children(current, true)
                .unwrap_or_else(|| Arc::clone(container))
        };
        let pruned = Self {
            main: prune(&self.main),
            sidebar: prune(&self.sidebar),
        };
        dv_core::debug!(
            run = %current,
            main = pruned.main.len(),
            sidebar = pruned.sidebar.len(),
            "cleared stale nodes"
        );
        pruned
    }

    /// Every leaf element, depth-first, main before sidebar.
    #[must_use]
    pub fn elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.main.collect_elements(&mut out);
        self.sidebar.collect_elements(&mut out);
        out
    }

    /// Every widget descriptor in the tree.
    #[must_use]
    pub fn widgets(&self) -> Vec<&WidgetElement> {
        self.elements()
            .into_iter()
            .filter_map(Element::as_widget)
            .collect()
    }

    /// `(form_id, clear_on_submit)` for every form block in the tree.
    #[must_use]
    pub fn forms(&self) -> Vec<(&str, bool)> {
        let mut blocks = Vec::new();
        self.main.collect_blocks(&mut blocks);
        self.sidebar.collect_blocks(&mut blocks);
        blocks.into_iter().filter_map(Block::as_form).collect()
    }

    /// Number of submit buttons per form id. Forms without one are absent.
    #[must_use]
    pub fn submit_button_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for widget in self.widgets() {
            if widget.kind.is_submit_button()
                && let Some(form_id) = widget.form()
            {
                *counts.entry(form_id.to_owned()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Whether both roots share the same containers.
    #[must_use]
    pub fn ptr_eq(&self, other: &AppRoot) -> bool {
        Arc::ptr_eq(&self.main, &other.main) && Arc::ptr_eq(&self.sidebar, &other.sidebar)
    }
}

/// Depths reported by a container skip the container index itself.
fn shift_depth(reason: PathError) -> PathError {
    match reason {
        PathError::OutOfBounds { depth, index, len } => PathError::OutOfBounds {
            depth: depth + 1,
            index,
            len,
        },
        PathError::NotABlock { depth } => PathError::NotABlock { depth: depth + 1 },
        other => other,
    }
}
