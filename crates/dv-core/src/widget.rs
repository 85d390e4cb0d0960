//! Widget descriptors and widget values.
//!
//! A [`WidgetElement`] is what the server sends inside a delta: identity, form
//! membership, and a [`WidgetKind`] that carries the declared default. A
//! [`WidgetValue`] is what the client stores and sends back in
//! [`WidgetStates`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared value type of a widget. A stored value must match it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetValueType {
    Bool,
    Int,
    Double,
    String,
    StringArray,
    IntArray,
    DoubleArray,
    Json,
    Bytes,
    Trigger,
    StringTrigger,
    FileUploader,
}

impl fmt::Display for WidgetValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::String => "string",
            Self::StringArray => "string_array",
            Self::IntArray => "int_array",
            Self::DoubleArray => "double_array",
            Self::Json => "json",
            Self::Bytes => "bytes",
            Self::Trigger => "trigger",
            Self::StringTrigger => "string_trigger",
            Self::FileUploader => "file_uploader",
        };
        f.write_str(name)
    }
}

/// Metadata of one uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFileInfo {
    pub file_id: String,
    pub name: String,
    pub size: u64,
}

/// Value of a file uploader widget.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploaderState {
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFileInfo>,
}

/// A widget value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WidgetValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    StringArray(Vec<String>),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    /// JSON document stored as its serialized text.
    Json(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Fires `true` for exactly one run, then reverts to `false`.
    Trigger(bool),
    /// Like [`WidgetValue::Trigger`] but carries a string payload (chat input).
    StringTrigger(Option<String>),
    FileUploader(FileUploaderState),
}

impl WidgetValue {
    #[must_use]
    pub fn value_type(&self) -> WidgetValueType {
        match self {
            Self::Bool(_) => WidgetValueType::Bool,
            Self::Int(_) => WidgetValueType::Int,
            Self::Double(_) => WidgetValueType::Double,
            Self::String(_) => WidgetValueType::String,
            Self::StringArray(_) => WidgetValueType::StringArray,
            Self::IntArray(_) => WidgetValueType::IntArray,
            Self::DoubleArray(_) => WidgetValueType::DoubleArray,
            Self::Json(_) => WidgetValueType::Json,
            Self::Bytes(_) => WidgetValueType::Bytes,
            Self::Trigger(_) => WidgetValueType::Trigger,
            Self::StringTrigger(_) => WidgetValueType::StringTrigger,
            Self::FileUploader(_) => WidgetValueType::FileUploader,
        }
    }

    /// The value a fired trigger reverts to, or `None` for non-trigger values.
    #[must_use]
    pub fn trigger_reset(&self) -> Option<Self> {
        match self {
            Self::Trigger(_) => Some(Self::Trigger(false)),
            Self::StringTrigger(_) => Some(Self::StringTrigger(None)),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Whether a slider/number input holds integers or floats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    #[default]
    Int,
    Float,
}

/// Widget type plus its declared default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetKind {
    Button,
    FormSubmitButton,
    Checkbox {
        #[serde(default)]
        default: bool,
    },
    Radio {
        options: Vec<String>,
        default: Option<i64>,
    },
    Selectbox {
        options: Vec<String>,
        default: Option<i64>,
    },
    Multiselect {
        options: Vec<String>,
        #[serde(default)]
        default: Vec<i64>,
    },
    Slider {
        min: f64,
        max: f64,
        step: f64,
        default: Vec<f64>,
        #[serde(default)]
        numeric: NumericKind,
    },
    NumberInput {
        default: Option<f64>,
        #[serde(default)]
        numeric: NumericKind,
    },
    TextInput {
        default: Option<String>,
        #[serde(default)]
        max_chars: u32,
    },
    TextArea {
        default: Option<String>,
    },
    DateInput {
        #[serde(default)]
        default: Vec<String>,
    },
    ColorPicker {
        default: String,
    },
    FileUploader {
        #[serde(default)]
        multiple_files: bool,
    },
    ChatInput {
        #[serde(default)]
        placeholder: String,
    },
}

impl WidgetKind {
    #[must_use]
    pub fn value_type(&self) -> WidgetValueType {
        match self {
            Self::Button | Self::FormSubmitButton => WidgetValueType::Trigger,
            Self::Checkbox { .. } => WidgetValueType::Bool,
            Self::Radio { .. } | Self::Selectbox { .. } => WidgetValueType::Int,
            Self::Multiselect { .. } => WidgetValueType::IntArray,
            Self::Slider { .. } => WidgetValueType::DoubleArray,
            Self::NumberInput {
                numeric: NumericKind::Int,
                ..
            } => WidgetValueType::Int,
            Self::NumberInput { .. } => WidgetValueType::Double,
            Self::TextInput { .. } | Self::TextArea { .. } | Self::ColorPicker { .. } => {
                WidgetValueType::String
            }
            Self::DateInput { .. } => WidgetValueType::StringArray,
            Self::FileUploader { .. } => WidgetValueType::FileUploader,
            Self::ChatInput { .. } => WidgetValueType::StringTrigger,
        }
    }

    /// The value the widget holds before any interaction.
    ///
    /// `None` means "no value" (e.g. a selectbox with no default selection);
    /// nothing is sent for that widget until the user picks something.
    #[must_use]
    pub fn default_value(&self) -> Option<WidgetValue> {
        match self {
            Self::Button | Self::FormSubmitButton => Some(WidgetValue::Trigger(false)),
            Self::Checkbox { default } => Some(WidgetValue::Bool(*default)),
            Self::Radio { default, .. } | Self::Selectbox { default, .. } => {
                default.map(WidgetValue::Int)
            }
            Self::Multiselect { default, .. } => Some(WidgetValue::IntArray(default.clone())),
            Self::Slider { default, .. } => Some(WidgetValue::DoubleArray(default.clone())),
            Self::NumberInput {
                default,
                numeric: NumericKind::Int,
            } => default.map(|v| WidgetValue::Int(v.round() as i64)),
            Self::NumberInput { default, .. } => default.map(WidgetValue::Double),
            Self::TextInput { default, .. } | Self::TextArea { default } => {
                default.clone().map(WidgetValue::String)
            }
            Self::DateInput { default } => Some(WidgetValue::StringArray(default.clone())),
            Self::ColorPicker { default } => Some(WidgetValue::String(default.clone())),
            Self::FileUploader { .. } => {
                Some(WidgetValue::FileUploader(FileUploaderState::default()))
            }
            Self::ChatInput { .. } => Some(WidgetValue::StringTrigger(None)),
        }
    }

    #[must_use]
    pub fn is_submit_button(&self) -> bool {
        matches!(self, Self::FormSubmitButton)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::FormSubmitButton => "form_submit_button",
            Self::Checkbox { .. } => "checkbox",
            Self::Radio { .. } => "radio",
            Self::Selectbox { .. } => "selectbox",
            Self::Multiselect { .. } => "multiselect",
            Self::Slider { .. } => "slider",
            Self::NumberInput { .. } => "number_input",
            Self::TextInput { .. } => "text_input",
            Self::TextArea { .. } => "text_area",
            Self::DateInput { .. } => "date_input",
            Self::ColorPicker { .. } => "color_picker",
            Self::FileUploader { .. } => "file_uploader",
            Self::ChatInput { .. } => "chat_input",
        }
    }
}

/// A widget as described by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidgetElement {
    pub id: String,
    /// Owning form id; empty when the widget is not inside a form.
    #[serde(default)]
    pub form_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub kind: WidgetKind,
    /// Server-pushed value that overrides whatever the client holds.
    #[serde(default)]
    pub set_value: Option<WidgetValue>,
}

impl WidgetElement {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: WidgetKind) -> Self {
        Self {
            id: id.into(),
            form_id: String::new(),
            label: String::new(),
            kind,
            set_value: None,
        }
    }

    #[must_use]
    pub fn in_form(mut self, form_id: impl Into<String>) -> Self {
        self.form_id = form_id.into();
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_set_value(mut self, value: WidgetValue) -> Self {
        self.set_value = Some(value);
        self
    }

    /// Owning form id, or `None` when the widget is not in a form.
    #[must_use]
    pub fn form(&self) -> Option<&str> {
        crate::ids::is_valid_form_id(&self.form_id).then_some(self.form_id.as_str())
    }
}

/// One serialized widget value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidgetState {
    pub id: String,
    #[serde(flatten)]
    pub value: WidgetValue,
}

/// Serialized widget values sent upstream, ordered by widget id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetStates {
    #[serde(default)]
    pub widgets: Vec<WidgetState>,
}

impl WidgetStates {
    #[must_use]
    pub fn get(&self, widget_id: &str) -> Option<&WidgetValue> {
        self.widgets
            .iter()
            .find(|w| w.id == widget_id)
            .map(|w| &w.value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_declared_types() {
        let kinds = [
            WidgetKind::Button,
            WidgetKind::Checkbox { default: true },
            WidgetKind::Multiselect {
                options: vec!["a".into()],
                default: vec![0],
            },
            WidgetKind::Slider {
                min: 0.0,
                max: 1.0,
                step: 0.1,
                default: vec![0.5],
                numeric: NumericKind::Float,
            },
            WidgetKind::NumberInput {
                default: Some(3.0),
                numeric: NumericKind::Int,
            },
            WidgetKind::FileUploader {
                multiple_files: false,
            },
            WidgetKind::ChatInput {
                placeholder: String::new(),
            },
        ];
        for kind in kinds {
            let default = kind.default_value().unwrap();
            assert_eq!(default.value_type(), kind.value_type(), "{}", kind.name());
        }
    }

    #[test]
    fn int_number_input_rounds_fractional_default() {
        let kind = WidgetKind::NumberInput {
            default: Some(2.6),
            numeric: NumericKind::Int,
        };
        assert_eq!(kind.default_value(), Some(WidgetValue::Int(3)));
        let kind = WidgetKind::NumberInput {
            default: Some(-2.5),
            numeric: NumericKind::Int,
        };
        assert_eq!(kind.default_value(), Some(WidgetValue::Int(-3)));
    }

    #[test]
    fn selectbox_without_default_has_no_value() {
        let kind = WidgetKind::Selectbox {
            options: vec!["x".into()],
            default: None,
        };
        assert_eq!(kind.default_value(), None);
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let state = WidgetState {
            id: "w".into(),
            value: WidgetValue::Bytes(b"hello".to_vec()),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "w", "type": "bytes", "value": "aGVsbG8="})
        );
        let back: WidgetState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn widget_element_form_membership() {
        let w = WidgetElement::new("cb", WidgetKind::Checkbox { default: false });
        assert_eq!(w.form(), None);
        assert_eq!(w.in_form("f").form(), Some("f"));
    }

    #[test]
    fn trigger_reset_only_for_triggers() {
        assert_eq!(
            WidgetValue::Trigger(true).trigger_reset(),
            Some(WidgetValue::Trigger(false))
        );
        assert_eq!(WidgetValue::Bool(true).trigger_reset(), None);
    }
}
