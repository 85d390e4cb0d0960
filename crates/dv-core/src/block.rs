//! Layout container descriptors.

use std::mem;

use serde::{Deserialize, Serialize};

/// Layout role of a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Vertical {
        #[serde(default)]
        border: bool,
    },
    Horizontal {
        #[serde(default)]
        gap: String,
    },
    Column {
        weight: f64,
    },
    Expandable {
        label: String,
        #[serde(default)]
        expanded: bool,
    },
    Form {
        form_id: String,
        #[serde(default)]
        clear_on_submit: bool,
    },
    TabContainer,
    Tab {
        label: String,
    },
    ChatMessage {
        name: String,
    },
}

impl BlockKind {
    /// Whether `self` and `other` are the same kind of block, ignoring parameters.
    #[must_use]
    pub fn same_kind(&self, other: &BlockKind) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// A block descriptor as sent in an add-block delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub kind: BlockKind,
    /// Keep this block even when pruning leaves it without children.
    #[serde(default)]
    pub allow_empty: bool,
}

impl Block {
    #[must_use]
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            allow_empty: false,
        }
    }

    /// A plain vertical container, the layout of the two top-level roots.
    #[must_use]
    pub fn vertical() -> Self {
        Self::new(BlockKind::Vertical { border: false })
    }

    #[must_use]
    pub fn form(form_id: impl Into<String>, clear_on_submit: bool) -> Self {
        Self::new(BlockKind::Form {
            form_id: form_id.into(),
            clear_on_submit,
        })
    }

    #[must_use]
    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// `(form_id, clear_on_submit)` when this block is a form.
    #[must_use]
    pub fn as_form(&self) -> Option<(&str, bool)> {
        match &self.kind {
            BlockKind::Form {
                form_id,
                clear_on_submit,
            } => Some((form_id.as_str(), *clear_on_submit)),
            _ => None,
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::vertical()
    }
}
