#![forbid(unsafe_code)]

//! Widget state for the Deltaview session core.
//!
//! [`WidgetStateManager`] is the single owner of widget values in a session.
//! Values of widgets outside forms are committed and reported at once; values
//! of widgets inside a form wait in the form until it is submitted.
//!
//! ```
//! use dv_core::{WidgetElement, WidgetKind, WidgetValue};
//! use dv_widgets::{WidgetSource, WidgetStateManager};
//!
//! let mut widgets = WidgetStateManager::new();
//! widgets.register_form("f", false);
//! widgets
//!     .register_widget(&WidgetElement::new("agree", WidgetKind::Checkbox { default: false }).in_form("f"))
//!     .unwrap();
//!
//! widgets.set_value("agree", WidgetValue::Bool(true), WidgetSource::UI, None).unwrap();
//! assert!(widgets.take_updates().is_empty());
//!
//! widgets.submit_form("f", None).unwrap();
//! assert_eq!(widgets.take_updates().len(), 1);
//! ```

pub mod forms;
pub mod manager;
pub mod update;

pub use forms::FormsData;
pub use manager::{WidgetError, WidgetStateManager};
pub use update::{UpdateReason, WidgetSource, WidgetStateUpdate};
