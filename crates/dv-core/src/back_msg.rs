//! Client-to-server messages produced by the session core.

use serde::{Deserialize, Serialize};

use crate::widget::WidgetStates;

/// Request for another script run with the given widget values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RerunRequest {
    pub widget_states: WidgetStates,
    #[serde(default)]
    pub page_script_hash: String,
}

/// One upstream message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackMsg {
    /// Send widget values and ask the server to run the script again.
    RerunScript { request: RerunRequest },
    /// Synchronize widget values without requesting a run.
    UpdateWidgets { widget_states: WidgetStates },
}

impl BackMsg {
    /// Widget values carried by this message.
    #[must_use]
    pub fn widget_states(&self) -> &WidgetStates {
        match self {
            Self::RerunScript { request } => &request.widget_states,
            Self::UpdateWidgets { widget_states } => widget_states,
        }
    }

    #[must_use]
    pub fn requests_rerun(&self) -> bool {
        matches!(self, Self::RerunScript { .. })
    }
}
