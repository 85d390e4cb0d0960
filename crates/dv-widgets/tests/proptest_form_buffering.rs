//! Property-based tests for form buffering.
//!
//! 1. Any number of writes to a form widget, from the UI or the server, emit
//!    nothing before submit.
//! 2. Submit emits exactly one rerun update carrying the last written value.
//! 3. Writes to widgets outside forms emit one update each, whoever wrote
//!    them, or one per batch.

use dv_core::{WidgetElement, WidgetKind, WidgetValue};
use dv_widgets::{WidgetSource, WidgetStateManager};
use proptest::prelude::*;

fn slider(id: &str) -> WidgetElement {
    WidgetElement::new(
        id,
        WidgetKind::NumberInput {
            default: Some(0.0),
            numeric: dv_core::NumericKind::Int,
        },
    )
}

proptest! {
    #[test]
    fn form_submit_notifies_once_with_last_value(
        writes in prop::collection::vec((any::<i64>(), any::<bool>()), 1..16),
    ) {
        let mut mgr = WidgetStateManager::new();
        mgr.register_form("f", false);
        mgr.register_widget(&slider("n").in_form("f")).unwrap();

        for &(v, from_ui) in &writes {
            mgr.set_value("n", WidgetValue::Int(v), WidgetSource { from_ui }, None).unwrap();
        }
        prop_assert!(mgr.take_updates().is_empty());

        mgr.submit_form("f", None).unwrap();
        let updates = mgr.take_updates();
        prop_assert_eq!(updates.len(), 1);
        prop_assert!(updates[0].rerun);
        let last = writes.last().map(|&(v, _)| WidgetValue::Int(v));
        prop_assert_eq!(updates[0].widget_states.get("n").cloned(), last);
    }

    #[test]
    fn free_widgets_notify_per_write_or_per_batch(
        values in prop::collection::vec(any::<i64>(), 1..16),
        from_ui in any::<bool>(),
    ) {
        let mut mgr = WidgetStateManager::new();
        mgr.register_widget(&slider("n")).unwrap();

        for v in &values {
            mgr.set_value("n", WidgetValue::Int(*v), WidgetSource { from_ui }, None).unwrap();
        }
        let updates = mgr.take_updates();
        prop_assert_eq!(updates.len(), values.len());
        prop_assert!(updates.iter().all(|u| u.source.from_ui == from_ui));

        mgr.batch(|mgr| {
            for v in &values {
                mgr.set_value("n", WidgetValue::Int(*v), WidgetSource::UI, None).unwrap();
            }
        });
        prop_assert_eq!(mgr.take_updates().len(), 1);
    }
}
