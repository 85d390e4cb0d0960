#![forbid(unsafe_code)]

//! Widget state manager.
//!
//! Holds the committed value of every widget, buffers values of widgets
//! inside forms until the form is submitted, and keeps a per-element scratch
//! space for UI-only state.
//!
//! # Notifications
//!
//! The manager never calls out. Every change that the server must hear about
//! is pushed to an outbox as a [`WidgetStateUpdate`], which the owner drains
//! with [`WidgetStateManager::take_updates`]. Within
//! [`WidgetStateManager::batch`], immediate notifications collapse into one.
//!
//! # Invariants
//!
//! - A stored value always matches its widget's declared value type.
//! - Buffered form values are never serialized until submit.
//! - Every write that is not buffered emits exactly one update, or joins the
//!   enclosing batch's update.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use dv_core::{
    WidgetElement, WidgetState, WidgetStates, WidgetValue, WidgetValueType, is_valid_form_id,
};

use crate::forms::{FormState, FormsData};
use crate::update::{UpdateReason, WidgetSource, WidgetStateUpdate};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from widget operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetError {
    /// The value's type differs from the widget's declared type.
    ValueTypeMismatch {
        widget_id: String,
        expected: WidgetValueType,
        found: WidgetValueType,
    },
    /// No form with this id was registered.
    UnknownFormId { form_id: String },
}

impl fmt::Display for WidgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueTypeMismatch {
                widget_id,
                expected,
                found,
            } => write!(f, "widget {widget_id:?} holds {expected}, got {found}"),
            Self::UnknownFormId { form_id } => write!(f, "unknown form id {form_id:?}"),
        }
    }
}

impl std::error::Error for WidgetError {}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct WidgetRecord {
    form_id: Option<String>,
    value_type: WidgetValueType,
    default: Option<WidgetValue>,
}

/// Session-scoped widget values, forms, and element state.
#[derive(Debug, Default)]
pub struct WidgetStateManager {
    committed: BTreeMap<String, WidgetValue>,
    widgets: BTreeMap<String, WidgetRecord>,
    forms: BTreeMap<String, FormState>,
    submit_button_count: BTreeMap<String, usize>,
    element_state: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    outbox: Vec<WidgetStateUpdate>,
    batch_depth: u32,
    batched: Option<(UpdateReason, WidgetSource)>,
    fired_triggers: Vec<String>,
}

impl WidgetStateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Record a widget seen in the tree.
    ///
    /// The declared default is committed if the widget holds no value of the
    /// right type. A server `set_value` overrides the committed value and any
    /// buffered form value. Registration never notifies.
    pub fn register_widget(&mut self, element: &WidgetElement) -> Result<(), WidgetError> {
        let value_type = element.kind.value_type();
        let record = WidgetRecord {
            form_id: element.form().map(str::to_owned),
            value_type,
            default: element.kind.default_value(),
        };

        if let Some(value) = &element.set_value {
            check_type(&element.id, value_type, value)?;
        }

        let stale = self
            .committed
            .get(&element.id)
            .is_some_and(|v| v.value_type() != value_type);
        if stale {
            self.committed.remove(&element.id);
        }

        match &element.set_value {
            Some(value) => {
                self.committed.insert(element.id.clone(), value.clone());
                self.drop_buffered(&element.id);
                dv_core::debug!(widget = %element.id, "server override committed");
            }
            None => {
                if !self.committed.contains_key(&element.id)
                    && let Some(default) = &record.default
                {
                    self.committed.insert(element.id.clone(), default.clone());
                }
            }
        }

        self.widgets.insert(element.id.clone(), record);
        Ok(())
    }

    /// Register a form, or update its clear-on-submit flag. Buffered values
    /// of an already registered form are kept.
    pub fn register_form(&mut self, form_id: &str, clear_on_submit: bool) {
        self.forms
            .entry(form_id.to_owned())
            .and_modify(|form| form.clear_on_submit = clear_on_submit)
            .or_insert_with(|| FormState::new(clear_on_submit));
    }

    #[must_use]
    pub fn is_form_registered(&self, form_id: &str) -> bool {
        self.forms.contains_key(form_id)
    }

    /// Replace the per-form submit button counts.
    pub fn set_submit_button_counts(&mut self, counts: BTreeMap<String, usize>) {
        self.submit_button_count = counts;
    }

    #[must_use]
    pub fn forms_data(&self) -> FormsData {
        FormsData {
            forms_with_pending_changes: self
                .forms
                .iter()
                .filter(|(_, form)| !form.pending.is_empty())
                .map(|(id, _)| id.clone())
                .collect(),
            submit_button_count: self.submit_button_count.clone(),
        }
    }

    /// Forget widgets not in `active`. Their committed values, buffered
    /// values, and element state go with them.
    pub fn retain_widgets(&mut self, active: &BTreeSet<String>) {
        self.committed.retain(|id, _| active.contains(id));
        self.widgets.retain(|id, _| active.contains(id));
        self.element_state.retain(|id, _| active.contains(id));
        for form in self.forms.values_mut() {
            form.pending.retain(|id, _| active.contains(id));
        }
    }

    /// Unregister forms not in `active`, with their buffered values and
    /// submit button counts.
    pub fn retain_forms(&mut self, active: &BTreeSet<String>) {
        let before = self.forms.len();
        self.forms.retain(|id, _| active.contains(id));
        self.submit_button_count.retain(|id, _| active.contains(id));
        let dropped = before - self.forms.len();
        if dropped > 0 {
            dv_core::debug!(dropped, remaining = self.forms.len(), "forms unregistered");
        }
    }

    // ── Values ──────────────────────────────────────────────────────────

    /// Store a widget value.
    ///
    /// Widgets inside a form (`form_id`, or the form the widget was registered
    /// with) buffer the value until [`submit_form`](Self::submit_form),
    /// whoever wrote it. Other widgets commit at once and request a rerun; the
    /// update records `source` so the owner can tell user input from
    /// server-driven writes.
    pub fn set_value(
        &mut self,
        widget_id: &str,
        value: WidgetValue,
        source: WidgetSource,
        form_id: Option<&str>,
    ) -> Result<(), WidgetError> {
        if let Some(record) = self.widgets.get(widget_id) {
            check_type(widget_id, record.value_type, &value)?;
        }

        let form_id = form_id
            .filter(|id| is_valid_form_id(id))
            .map(str::to_owned)
            .or_else(|| self.widgets.get(widget_id).and_then(|r| r.form_id.clone()));

        match form_id {
            Some(form_id) => {
                let form = self
                    .forms
                    .get_mut(&form_id)
                    .ok_or(WidgetError::UnknownFormId { form_id })?;
                form.pending.insert(widget_id.to_owned(), value);
                dv_core::trace!(
                    widget = widget_id,
                    from_ui = source.from_ui,
                    "buffered form value"
                );
            }
            None => {
                self.committed.insert(widget_id.to_owned(), value);
                self.notify(
                    UpdateReason::WidgetChanged {
                        widget_id: widget_id.to_owned(),
                    },
                    source,
                );
            }
        }
        Ok(())
    }

    /// Current value: a buffered form value if one exists, else the committed one.
    #[must_use]
    pub fn get_value(&self, widget_id: &str) -> Option<&WidgetValue> {
        self.buffered(widget_id)
            .or_else(|| self.committed.get(widget_id))
    }

    /// Fire a button: it reads `true` for exactly one rerun request, then
    /// reverts to `false` without notifying.
    pub fn set_trigger_value(
        &mut self,
        widget_id: &str,
        source: WidgetSource,
    ) -> Result<(), WidgetError> {
        self.fire_trigger(widget_id, WidgetValue::Trigger(true), source)
    }

    /// Fire a chat input with `text`; reverts to no value after the rerun request.
    pub fn set_string_trigger_value(
        &mut self,
        widget_id: &str,
        text: impl Into<String>,
        source: WidgetSource,
    ) -> Result<(), WidgetError> {
        self.fire_trigger(
            widget_id,
            WidgetValue::StringTrigger(Some(text.into())),
            source,
        )
    }

    fn fire_trigger(
        &mut self,
        widget_id: &str,
        value: WidgetValue,
        source: WidgetSource,
    ) -> Result<(), WidgetError> {
        if let Some(record) = self.widgets.get(widget_id) {
            check_type(widget_id, record.value_type, &value)?;
        }
        self.committed.insert(widget_id.to_owned(), value);
        self.fired_triggers.push(widget_id.to_owned());
        self.notify(
            UpdateReason::TriggerFired {
                widget_id: widget_id.to_owned(),
            },
            source,
        );
        Ok(())
    }

    // ── Forms ───────────────────────────────────────────────────────────

    /// Commit a form's buffered values and request one rerun.
    ///
    /// `submit_button` fires that button's trigger for the same rerun. For a
    /// clear-on-submit form every member widget is then reset to its declared
    /// default and a second update (no rerun) syncs the reset values.
    pub fn submit_form(
        &mut self,
        form_id: &str,
        submit_button: Option<&str>,
    ) -> Result<(), WidgetError> {
        let form = self
            .forms
            .get_mut(form_id)
            .ok_or_else(|| WidgetError::UnknownFormId {
                form_id: form_id.to_owned(),
            })?;
        let pending = std::mem::take(&mut form.pending);
        let clear_on_submit = form.clear_on_submit;
        let committed_count = pending.len();
        self.committed.extend(pending);

        if let Some(button) = submit_button {
            self.committed
                .insert(button.to_owned(), WidgetValue::Trigger(true));
            self.fired_triggers.push(button.to_owned());
        }

        // The submit snapshot already covers anything batched so far.
        self.batched = None;
        self.emit(
            UpdateReason::FormSubmitted {
                form_id: form_id.to_owned(),
            },
            WidgetSource::UI,
            true,
        );
        dv_core::debug!(form = form_id, committed = committed_count, "form submitted");

        if clear_on_submit {
            self.clear_form(form_id);
        }
        Ok(())
    }

    fn clear_form(&mut self, form_id: &str) {
        let members: Vec<(String, Option<WidgetValue>)> = self
            .widgets
            .iter()
            .filter(|(_, record)| record.form_id.as_deref() == Some(form_id))
            .map(|(id, record)| (id.clone(), record.default.clone()))
            .collect();

        for (widget_id, default) in members {
            match default {
                Some(value) => {
                    self.committed.insert(widget_id, value);
                }
                None => {
                    self.committed.remove(&widget_id);
                }
            }
        }

        let to_clear = self
            .forms
            .get(form_id)
            .map(|form| form.element_state_to_clear.clone())
            .unwrap_or_default();
        for (element_id, key) in to_clear {
            self.delete_element_state(&element_id, &key);
        }

        self.emit(
            UpdateReason::FormCleared {
                form_id: form_id.to_owned(),
            },
            WidgetSource::UI,
            false,
        );
    }

    // ── Element state ───────────────────────────────────────────────────

    pub fn set_element_state(
        &mut self,
        element_id: &str,
        key: &str,
        value: serde_json::Value,
    ) {
        self.element_state
            .entry(element_id.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    #[must_use]
    pub fn get_element_state(&self, element_id: &str, key: &str) -> Option<&serde_json::Value> {
        self.element_state.get(element_id)?.get(key)
    }

    pub fn delete_element_state(&mut self, element_id: &str, key: &str) -> Option<serde_json::Value> {
        let entries = self.element_state.get_mut(element_id)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.element_state.remove(element_id);
        }
        removed
    }

    /// Opt `(element_id, key)` into clearing when `form_id` is submitted with
    /// clear-on-submit.
    pub fn clear_element_state_on_submit(
        &mut self,
        form_id: &str,
        element_id: &str,
        key: &str,
    ) -> Result<(), WidgetError> {
        let form = self
            .forms
            .get_mut(form_id)
            .ok_or_else(|| WidgetError::UnknownFormId {
                form_id: form_id.to_owned(),
            })?;
        form.element_state_to_clear
            .insert((element_id.to_owned(), key.to_owned()));
        Ok(())
    }

    // ── Outbox ──────────────────────────────────────────────────────────

    /// Run `f` as one event-handling tick: every immediate notification
    /// inside it collapses into a single update emitted at the end.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        if self.batch_depth == 0
            && let Some((reason, source)) = self.batched.take()
        {
            self.emit(reason, source, true);
        }
        result
    }

    /// Drain pending notifications, oldest first.
    pub fn take_updates(&mut self) -> Vec<WidgetStateUpdate> {
        std::mem::take(&mut self.outbox)
    }

    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Committed values, sorted by widget id. Buffered form values are excluded.
    #[must_use]
    pub fn widget_states(&self) -> WidgetStates {
        WidgetStates {
            widgets: self
                .committed
                .iter()
                .map(|(id, value)| WidgetState {
                    id: id.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    /// Forget everything. Called when the session ends.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn notify(&mut self, reason: UpdateReason, source: WidgetSource) {
        if self.batch_depth > 0 {
            let (_, batched_source) = self.batched.get_or_insert((reason, source));
            batched_source.from_ui |= source.from_ui;
            return;
        }
        self.emit(reason, source, true);
    }

    fn emit(&mut self, reason: UpdateReason, source: WidgetSource, rerun: bool) {
        self.outbox.push(WidgetStateUpdate {
            reason,
            source,
            widget_states: self.widget_states(),
            rerun,
        });
        for widget_id in std::mem::take(&mut self.fired_triggers) {
            self.reset_trigger(&widget_id);
        }
    }

    fn reset_trigger(&mut self, widget_id: &str) {
        if let Some(value) = self.committed.get_mut(widget_id)
            && let Some(reset) = value.trigger_reset()
        {
            *value = reset;
        }
    }

    fn buffered(&self, widget_id: &str) -> Option<&WidgetValue> {
        self.forms
            .values()
            .find_map(|form| form.pending.get(widget_id))
    }

    fn drop_buffered(&mut self, widget_id: &str) {
        for form in self.forms.values_mut() {
            form.pending.remove(widget_id);
        }
    }
}

fn check_type(
    widget_id: &str,
    expected: WidgetValueType,
    value: &WidgetValue,
) -> Result<(), WidgetError> {
    let found = value.value_type();
    if found == expected {
        Ok(())
    } else {
        Err(WidgetError::ValueTypeMismatch {
            widget_id: widget_id.to_owned(),
            expected,
            found,
        })
    }
}
