//! Property-based invariant tests for the delta tree.
//!
//! 1. Replacing a child keeps every sibling pointer-equal.
//! 2. A delta into one container leaves the other container pointer-equal.
//! 3. Stale pruning keeps exactly the nodes stamped with the current run.
//! 4. Main and sidebar survive pruning, however much is dropped.
//! 5. Pruning is idempotent and the second pass is pointer-equal.
//! 6. An out-of-bounds delta fails and the old root is still intact.

use dv_core::{Delta, Element, ForwardMsgMetadata, ScriptRunId};
use dv_tree::{AppNode, AppRoot, TreeError};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

fn runs() -> [ScriptRunId; 2] {
    [ScriptRunId::new("old"), ScriptRunId::new("new")]
}

/// Build a flat tree: each entry is `(container, run index)`, appended in order.
fn build(entries: &[(usize, usize)]) -> AppRoot {
    let runs = runs();
    let mut root = AppRoot::empty("");
    for (n, &(container, run)) in entries.iter().enumerate() {
        let len = if container == 0 {
            root.main().len()
        } else {
            root.sidebar().len()
        };
        root = root
            .apply_delta(
                &runs[run],
                &Delta::NewElement(Element::text(format!("e{n}"))),
                &ForwardMsgMetadata::at(vec![container, len]),
            )
            .expect("append is always valid");
    }
    root
}

fn entries_strategy() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..2, 0usize..2), 1..24)
}

fn children_ptr_eq(a: &[AppNode], b: &[AppNode], skip: Option<usize>) -> bool {
    a.iter()
        .zip(b)
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .all(|(_, (x, y))| x.ptr_eq(y))
}

// ═════════════════════════════════════════════════════════════════════════
// 1–2. Structural sharing
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn replace_shares_untouched_nodes(entries in entries_strategy(), pick in any::<prop::sample::Index>()) {
        let root = build(&entries);
        let container = entries[0].0;
        let block = if container == 0 { root.main() } else { root.sidebar() };
        let index = pick.index(block.len());

        let next = root
            .apply_delta(
                &ScriptRunId::new("next"),
                &Delta::NewElement(Element::text("replaced")),
                &ForwardMsgMetadata::at(vec![container, index]),
            )
            .unwrap();

        let (old_block, new_block, other_old, other_new) = if container == 0 {
            (root.main(), next.main(), root.sidebar(), next.sidebar())
        } else {
            (root.sidebar(), next.sidebar(), root.main(), next.main())
        };
        prop_assert_eq!(old_block.len(), new_block.len());
        prop_assert!(children_ptr_eq(old_block.children(), new_block.children(), Some(index)));
        prop_assert!(!old_block.children()[index].ptr_eq(&new_block.children()[index]));
        prop_assert!(std::sync::Arc::ptr_eq(other_old, other_new));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3–5. Stale pruning
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn pruning_keeps_exactly_current_run(entries in entries_strategy()) {
        let [_, current] = runs();
        let root = build(&entries);
        let pruned = root.clear_stale_nodes(&current);

        let expected_main = entries.iter().filter(|(c, r)| *c == 0 && *r == 1).count();
        let expected_sidebar = entries.iter().filter(|(c, r)| *c == 1 && *r == 1).count();
        prop_assert_eq!(pruned.main().len(), expected_main);
        prop_assert_eq!(pruned.sidebar().len(), expected_sidebar);

        for child in pruned.main().children().iter().chain(pruned.sidebar().children()) {
            prop_assert_eq!(child.script_run_id(), &current);
        }
    }

    #[test]
    fn pruning_for_unknown_run_empties_but_keeps_containers(entries in entries_strategy()) {
        let pruned = build(&entries).clear_stale_nodes(&ScriptRunId::new("unseen"));
        prop_assert!(pruned.main().is_empty());
        prop_assert!(pruned.sidebar().is_empty());
        prop_assert!(pruned.elements().is_empty());
    }

    #[test]
    fn pruning_is_idempotent(entries in entries_strategy()) {
        let [_, current] = runs();
        let once = build(&entries).clear_stale_nodes(&current);
        let twice = once.clear_stale_nodes(&current);
        prop_assert!(twice.ptr_eq(&once));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Failed deltas
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn out_of_bounds_delta_is_rejected(entries in entries_strategy(), gap in 1usize..8) {
        let root = build(&entries);
        let before = root.elements().len();
        let index = root.main().len() + gap;

        let err = root
            .apply_delta(
                &ScriptRunId::new("next"),
                &Delta::NewElement(Element::text("nope")),
                &ForwardMsgMetadata::at(vec![0, index]),
            )
            .unwrap_err();

        let is_invalid_path = matches!(err, TreeError::InvalidDeltaPath { .. });
        prop_assert!(is_invalid_path);
        prop_assert_eq!(root.elements().len(), before);
    }
}
