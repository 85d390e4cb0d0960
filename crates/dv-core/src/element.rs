//! Leaf element descriptors.

use serde::{Deserialize, Serialize};

use crate::dataframe::{DataFrame, DataFrameError};
use crate::widget::WidgetElement;

/// Severity of an [`Element::Alert`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFormat {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Rows to append to an existing element, optionally targeting a named dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedDataSet {
    #[serde(default)]
    pub name: Option<String>,
    pub data: DataFrame,
}

impl NamedDataSet {
    #[must_use]
    pub fn unnamed(data: DataFrame) -> Self {
        Self { name: None, data }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, data: DataFrame) -> Self {
        Self {
            name: Some(name.into()),
            data,
        }
    }
}

/// Every leaf the server can place in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Empty,
    Text {
        body: String,
    },
    Markdown {
        body: String,
        #[serde(default)]
        allow_html: bool,
    },
    Alert {
        body: String,
        #[serde(default)]
        format: AlertFormat,
    },
    Exception {
        type_name: String,
        message: String,
        #[serde(default)]
        stack_trace: Vec<String>,
    },
    Json {
        body: serde_json::Value,
        #[serde(default)]
        expanded: bool,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: String,
    },
    Audio {
        url: String,
        #[serde(default)]
        start_time: u32,
    },
    Video {
        url: String,
        #[serde(default)]
        start_time: u32,
    },
    Table {
        data: DataFrame,
    },
    DataFrame {
        data: DataFrame,
    },
    Chart {
        spec: serde_json::Value,
        #[serde(default)]
        data: Option<DataFrame>,
        #[serde(default)]
        datasets: Vec<NamedDataSet>,
    },
    Widget(WidgetElement),
}

/// Why rows could not be appended to an element.
#[derive(Debug, Clone, PartialEq)]
pub enum AddRowsError {
    /// The element type has no incremental-append semantics.
    Unsupported { element_type: &'static str },
    /// The rows do not fit the existing schema.
    Mismatch(DataFrameError),
}

impl Element {
    /// Short type tag, matching the serialized `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text { .. } => "text",
            Self::Markdown { .. } => "markdown",
            Self::Alert { .. } => "alert",
            Self::Exception { .. } => "exception",
            Self::Json { .. } => "json",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Table { .. } => "table",
            Self::DataFrame { .. } => "data_frame",
            Self::Chart { .. } => "chart",
            Self::Widget(_) => "widget",
        }
    }

    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    #[must_use]
    pub fn as_widget(&self) -> Option<&WidgetElement> {
        match self {
            Self::Widget(widget) => Some(widget),
            _ => None,
        }
    }

    #[must_use]
    pub fn supports_add_rows(&self) -> bool {
        matches!(
            self,
            Self::Table { .. } | Self::DataFrame { .. } | Self::Chart { .. }
        )
    }

    /// Build a copy of this element with `rows` appended.
    ///
    /// Charts route a named dataset to the dataset of that name, falling back
    /// to the primary `data`; unnamed rows go to `data`, falling back to the
    /// first dataset. `self` is untouched on every path.
    pub fn with_rows_added(&self, rows: &NamedDataSet) -> Result<Element, AddRowsError> {
        match self {
            Self::Table { data } => Ok(Self::Table {
                data: data.append(&rows.data).map_err(AddRowsError::Mismatch)?,
            }),
            Self::DataFrame { data } => Ok(Self::DataFrame {
                data: data.append(&rows.data).map_err(AddRowsError::Mismatch)?,
            }),
            Self::Chart {
                spec,
                data,
                datasets,
            } => {
                let mut data = data.clone();
                let mut datasets = datasets.clone();
                let named = rows
                    .name
                    .as_deref()
                    .and_then(|name| datasets.iter().position(|d| d.name.as_deref() == Some(name)));

                let use_primary =
                    data.is_some() || rows.name.is_some() || datasets.is_empty();
                let target = match named {
                    Some(index) => &mut datasets[index].data,
                    None if use_primary => data.get_or_insert_with(DataFrame::default),
                    None => &mut datasets[0].data,
                };
                *target = target.append(&rows.data).map_err(AddRowsError::Mismatch)?;

                Ok(Self::Chart {
                    spec: spec.clone(),
                    data,
                    datasets,
                })
            }
            other => Err(AddRowsError::Unsupported {
                element_type: other.type_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::{CellValue, Column, ColumnType};
    use pretty_assertions::assert_eq;

    fn frame(values: &[i64]) -> DataFrame {
        DataFrame::new(vec![Column::new(
            "v",
            ColumnType::Int64,
            values.iter().copied().map(CellValue::Int).collect(),
        )])
    }

    #[test]
    fn text_has_no_append_semantics() {
        let err = Element::text("hi")
            .with_rows_added(&NamedDataSet::unnamed(frame(&[1])))
            .unwrap_err();
        assert_eq!(
            err,
            AddRowsError::Unsupported {
                element_type: "text"
            }
        );
    }

    #[test]
    fn table_append_returns_new_element() {
        let table = Element::Table { data: frame(&[1]) };
        let grown = table
            .with_rows_added(&NamedDataSet::unnamed(frame(&[2, 3])))
            .unwrap();

        let Element::Table { data } = grown else {
            panic!("expected table");
        };
        assert_eq!(data.num_rows(), 3);
        assert_eq!(table, Element::Table { data: frame(&[1]) });
    }

    #[test]
    fn chart_named_dataset_routes_by_name() {
        let chart = Element::Chart {
            spec: serde_json::json!({"mark": "line"}),
            data: None,
            datasets: vec![
                NamedDataSet::named("a", frame(&[1])),
                NamedDataSet::named("b", frame(&[10])),
            ],
        };
        let grown = chart
            .with_rows_added(&NamedDataSet::named("b", frame(&[11])))
            .unwrap();

        let Element::Chart { datasets, .. } = grown else {
            panic!("expected chart");
        };
        assert_eq!(datasets[0].data.num_rows(), 1);
        assert_eq!(datasets[1].data.num_rows(), 2);
    }

    #[test]
    fn chart_unnamed_rows_fall_back_to_first_dataset() {
        let chart = Element::Chart {
            spec: serde_json::Value::Null,
            data: None,
            datasets: vec![NamedDataSet::named("a", frame(&[1]))],
        };
        let grown = chart
            .with_rows_added(&NamedDataSet::unnamed(frame(&[2])))
            .unwrap();
        let Element::Chart { datasets, data, .. } = grown else {
            panic!("expected chart");
        };
        assert_eq!(data, None);
        assert_eq!(datasets[0].data.num_rows(), 2);
    }

    #[test]
    fn serialized_type_tag_matches_type_name() {
        let elements = [
            Element::text("x"),
            Element::Table {
                data: DataFrame::default(),
            },
            Element::DataFrame {
                data: DataFrame::default(),
            },
        ];
        for element in elements {
            let json = serde_json::to_value(&element).unwrap();
            assert_eq!(json["type"], element.type_name());
        }
    }
}
