//! Single tree-mutation instructions.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::element::{Element, NamedDataSet};

/// One server-to-client mutation targeting a single tree path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Delta {
    /// Replace (or append) the node at the path with a leaf element.
    NewElement(Element),
    /// Replace (or append) the node at the path with a layout block.
    AddBlock(Block),
    /// Append rows to the element at the path.
    AddRows(NamedDataSet),
}

impl Delta {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewElement(_) => "new_element",
            Self::AddBlock(_) => "add_block",
            Self::AddRows(_) => "add_rows",
        }
    }
}
