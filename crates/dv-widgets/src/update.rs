#![forbid(unsafe_code)]

//! Outbox entries produced by the widget manager.

use serde::{Deserialize, Serialize};

use dv_core::{BackMsg, RerunRequest, WidgetStates};

/// Who wrote a widget value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSource {
    /// `true` for user interaction, `false` for server-driven writes.
    pub from_ui: bool,
}

impl WidgetSource {
    pub const UI: Self = Self { from_ui: true };
    pub const SERVER: Self = Self { from_ui: false };
}

/// Why an update was emitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UpdateReason {
    /// A widget outside any form changed.
    WidgetChanged { widget_id: String },
    /// A trigger widget fired.
    TriggerFired { widget_id: String },
    /// A form's buffered values were committed.
    FormSubmitted { form_id: String },
    /// A clear-on-submit form reset its widgets to their defaults.
    FormCleared { form_id: String },
}

/// One notification for the session: the committed widget values at the
/// time of the change, and whether the server should run the script.
#[derive(Clone, Debug, PartialEq)]
pub struct WidgetStateUpdate {
    pub reason: UpdateReason,
    /// Who made the change. A batch mixing sources reports [`WidgetSource::UI`].
    pub source: WidgetSource,
    pub widget_states: WidgetStates,
    pub rerun: bool,
}

impl WidgetStateUpdate {
    /// The upstream message for this update.
    #[must_use]
    pub fn into_back_msg(self, page_script_hash: &str) -> BackMsg {
        if self.rerun {
            BackMsg::RerunScript {
                request: RerunRequest {
                    widget_states: self.widget_states,
                    page_script_hash: page_script_hash.to_owned(),
                },
            }
        } else {
            BackMsg::UpdateWidgets {
                widget_states: self.widget_states,
            }
        }
    }
}
