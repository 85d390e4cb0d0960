#![forbid(unsafe_code)]

//! Tree nodes.
//!
//! Nodes are immutable and shared through [`Arc`]. A mutation rebuilds only
//! the blocks on the path from the root to the changed node; every other
//! subtree is carried over by pointer, so `Arc::ptr_eq` on an untouched
//! sibling holds across snapshots and renderers can skip it.
//!
//! Every node records the [`ScriptRunId`] that last touched it. A block's run
//! id is refreshed whenever anything beneath it changes.

use std::fmt;
use std::sync::Arc;

use dv_core::{AddRowsError, Block, Element, ForwardMsgMetadata, NamedDataSet, ScriptRunId};

/// Why a delta path could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// The path does not reach below the top-level containers.
    TooShort,
    /// The index at position `depth` of the path exceeds the number of children.
    OutOfBounds { depth: usize, index: usize, len: usize },
    /// The path continues below the element addressed at position `depth`.
    NotABlock { depth: usize },
    /// The path does not address an existing element.
    NoElement,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "path must have at least two indices"),
            Self::OutOfBounds { depth, index, len } => {
                write!(f, "index {index} at depth {depth} out of bounds (len {len})")
            }
            Self::NotABlock { depth } => write!(f, "node at depth {depth} is not a block"),
            Self::NoElement => write!(f, "no element at path"),
        }
    }
}

/// A node in the tree: a leaf element or a layout block.
#[derive(Clone, Debug)]
pub enum AppNode {
    Element(Arc<ElementNode>),
    Block(Arc<BlockNode>),
}

impl AppNode {
    #[must_use]
    pub fn script_run_id(&self) -> &ScriptRunId {
        match self {
            Self::Element(node) => &node.script_run_id,
            Self::Block(node) => &node.script_run_id,
        }
    }

    #[must_use]
    pub fn as_element(&self) -> Option<&Arc<ElementNode>> {
        match self {
            Self::Element(node) => Some(node),
            Self::Block(_) => None,
        }
    }

    #[must_use]
    pub fn as_block(&self) -> Option<&Arc<BlockNode>> {
        match self {
            Self::Block(node) => Some(node),
            Self::Element(_) => None,
        }
    }

    /// Reference equality: both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &AppNode) -> bool {
        match (self, other) {
            (Self::Element(a), Self::Element(b)) => Arc::ptr_eq(a, b),
            (Self::Block(a), Self::Block(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Drop this subtree if it was not produced by `run`, pruning stale
    /// descendants otherwise. Unchanged subtrees come back pointer-equal.
    #[must_use]
    pub fn clear_stale(&self, run: &ScriptRunId) -> Option<AppNode> {
        match self {
            Self::Element(node) => (node.script_run_id == *run).then(|| self.clone()),
            Self::Block(node) => {
                if node.script_run_id != *run {
                    return None;
                }
                node.prune_children(run, false).map(AppNode::Block)
            }
        }
    }

    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a Element>) {
        match self {
            Self::Element(node) => out.push(&node.element),
            Self::Block(node) => node.collect_elements(out),
        }
    }

    fn collect_blocks<'a>(&'a self, out: &mut Vec<&'a Block>) {
        if let Self::Block(node) = self {
            out.push(&node.block);
            for child in &node.children {
                child.collect_blocks(out);
            }
        }
    }
}

impl From<ElementNode> for AppNode {
    fn from(node: ElementNode) -> Self {
        Self::Element(Arc::new(node))
    }
}

impl From<BlockNode> for AppNode {
    fn from(node: BlockNode) -> Self {
        Self::Block(Arc::new(node))
    }
}

/// A leaf holding one element descriptor.
#[derive(Clone, Debug)]
pub struct ElementNode {
    element: Element,
    metadata: ForwardMsgMetadata,
    script_run_id: ScriptRunId,
}

impl ElementNode {
    #[must_use]
    pub fn new(element: Element, metadata: ForwardMsgMetadata, script_run_id: ScriptRunId) -> Self {
        Self {
            element,
            metadata,
            script_run_id,
        }
    }

    #[must_use]
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Metadata of the message that created this element.
    #[must_use]
    pub fn metadata(&self) -> &ForwardMsgMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn script_run_id(&self) -> &ScriptRunId {
        &self.script_run_id
    }

    /// A new node with `rows` appended, stamped with `run`.
    pub fn with_rows_added(
        &self,
        rows: &NamedDataSet,
        run: &ScriptRunId,
    ) -> Result<ElementNode, AddRowsError> {
        Ok(ElementNode {
            element: self.element.with_rows_added(rows)?,
            metadata: self.metadata.clone(),
            script_run_id: run.clone(),
        })
    }
}

/// An internal node: ordered children plus a layout descriptor.
#[derive(Clone, Debug)]
pub struct BlockNode {
    children: Vec<AppNode>,
    block: Block,
    script_run_id: ScriptRunId,
}

impl BlockNode {
    #[must_use]
    pub fn new(block: Block, children: Vec<AppNode>, script_run_id: ScriptRunId) -> Self {
        Self {
            children,
            block,
            script_run_id,
        }
    }

    #[must_use]
    pub fn empty(block: Block, script_run_id: ScriptRunId) -> Self {
        Self::new(block, Vec::new(), script_run_id)
    }

    #[must_use]
    pub fn children(&self) -> &[AppNode] {
        &self.children
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.block
    }

    #[must_use]
    pub fn script_run_id(&self) -> &ScriptRunId {
        &self.script_run_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Node at `path`, relative to this block.
    #[must_use]
    pub fn get_in(&self, path: &[usize]) -> Option<&AppNode> {
        let (&index, rest) = path.split_first()?;
        let child = self.children.get(index)?;
        if rest.is_empty() {
            return Some(child);
        }
        child.as_block()?.get_in(rest)
    }

    /// Copy of this block with `node` placed at `path`.
    ///
    /// The last index may equal the child count, which appends. Every block
    /// rebuilt along the way is stamped with `run`; all other children are
    /// shared with `self`.
    pub fn set_in(
        &self,
        path: &[usize],
        node: AppNode,
        run: &ScriptRunId,
    ) -> Result<BlockNode, PathError> {
        self.set_in_at(path, node, run, 0)
    }

    fn set_in_at(
        &self,
        path: &[usize],
        node: AppNode,
        run: &ScriptRunId,
        depth: usize,
    ) -> Result<BlockNode, PathError> {
        let Some((&index, rest)) = path.split_first() else {
            return Err(PathError::TooShort);
        };
        let len = self.children.len();
        let mut children = self.children.clone();

        if rest.is_empty() {
            match index.cmp(&len) {
                std::cmp::Ordering::Less => children[index] = node,
                std::cmp::Ordering::Equal => children.push(node),
                std::cmp::Ordering::Greater => {
                    return Err(PathError::OutOfBounds { depth, index, len });
                }
            }
        } else {
            let child = self
                .children
                .get(index)
                .ok_or(PathError::OutOfBounds { depth, index, len })?;
            let block = child.as_block().ok_or(PathError::NotABlock { depth })?;
            children[index] = AppNode::Block(Arc::new(block.set_in_at(rest, node, run, depth + 1)?));
        }

        Ok(BlockNode {
            children,
            block: self.block.clone(),
            script_run_id: run.clone(),
        })
    }

    /// Prune stale children. Returns `self` (pointer-equal) when nothing was
    /// dropped, and `None` when the block ends up empty and may be removed.
    pub(crate) fn prune_children(
        self: &Arc<Self>,
        run: &ScriptRunId,
        protected: bool,
    ) -> Option<Arc<BlockNode>> {
        let mut changed = false;
        let mut kept = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match child.clear_stale(run) {
                Some(pruned) => {
                    changed |= !pruned.ptr_eq(child);
                    kept.push(pruned);
                }
                None => changed = true,
            }
        }

        if kept.is_empty() && !protected && !self.block.allow_empty {
            return None;
        }
        if !changed {
            return Some(Arc::clone(self));
        }
        Some(Arc::new(BlockNode {
            children: kept,
            block: self.block.clone(),
            script_run_id: self.script_run_id.clone(),
        }))
    }

    pub(crate) fn collect_elements<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            child.collect_elements(out);
        }
    }

    pub(crate) fn collect_blocks<'a>(&'a self, out: &mut Vec<&'a Block>) {
        for child in &self.children {
            child.collect_blocks(out);
        }
    }
}
