#![forbid(unsafe_code)]

//! Form bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use dv_core::WidgetValue;

/// Snapshot of form status for the UI (e.g. to enable a submit button or
/// warn about a form without one).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormsData {
    /// Forms holding values not yet submitted.
    pub forms_with_pending_changes: BTreeSet<String>,
    /// Submit buttons per form, as last reported from the tree.
    pub submit_button_count: BTreeMap<String, usize>,
}

impl FormsData {
    #[must_use]
    pub fn has_pending_changes(&self, form_id: &str) -> bool {
        self.forms_with_pending_changes.contains(form_id)
    }

    #[must_use]
    pub fn has_submit_button(&self, form_id: &str) -> bool {
        self.submit_button_count
            .get(form_id)
            .is_some_and(|count| *count > 0)
    }
}

/// One registered form.
#[derive(Clone, Debug, Default)]
pub(crate) struct FormState {
    pub(crate) clear_on_submit: bool,
    /// Buffered values, keyed by widget id.
    pub(crate) pending: BTreeMap<String, WidgetValue>,
    /// `(element_id, key)` pairs dropped from element state on a clearing submit.
    pub(crate) element_state_to_clear: BTreeSet<(String, String)>,
}

impl FormState {
    pub(crate) fn new(clear_on_submit: bool) -> Self {
        Self {
            clear_on_submit,
            ..Self::default()
        }
    }
}
