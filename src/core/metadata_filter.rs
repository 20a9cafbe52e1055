// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Metadata filtering for search results
//!
//! A filter is a JSON object whose keys must all be satisfied by a chunk's
//! metadata. Per key:
//!
//! - `date_range: {"start"?: "YYYY-MM-DD", "end"?: "YYYY-MM-DD"}` bounds the
//!   chunk's `date` field, both ends inclusive, compared as strings
//! - a list value matches when the chunk's value equals any element
//! - any other value must be equal
//!
//! A key absent from the chunk's metadata fails the filter.

use crate::core::types::{fields, Metadata};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const DATE_RANGE_KEY: &str = "date_range";

/// Errors that can occur during filter parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid filter syntax: {0}")]
    InvalidSyntax(String),

    #[error("Type mismatch for '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// Inclusive lexicographic bounds on the `date` field.
    DateRange {
        start: Option<String>,
        end: Option<String>,
    },

    /// Chunk value must equal one of `values`.
    AnyOf { field: String, values: Vec<JsonValue> },

    /// Chunk value must equal `value`.
    Equals { field: String, value: JsonValue },
}

impl FieldFilter {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            FieldFilter::DateRange { start, end } => {
                let date = match metadata.get(fields::DATE).and_then(JsonValue::as_str) {
                    Some(date) => date,
                    None => return false,
                };
                let after_start = start.as_deref().map_or(true, |s| date >= s);
                let before_end = end.as_deref().map_or(true, |e| date <= e);
                after_start && before_end
            }

            FieldFilter::AnyOf { field, values } => metadata
                .get(field)
                .map_or(false, |value| values.contains(value)),

            FieldFilter::Equals { field, value } => {
                metadata.get(field).map_or(false, |v| v == value)
            }
        }
    }
}

/// Conjunction of per-key filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    filters: Vec<FieldFilter>,
}

impl FilterSpec {
    pub fn new(filters: Vec<FieldFilter>) -> Self {
        Self { filters }
    }

    /// Parse a filter from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use clinical_vector_store::core::metadata_filter::FilterSpec;
    ///
    /// let filter = FilterSpec::from_json(&json!({
    ///     "note_type": ["progress_note", "discharge_summary"],
    ///     "date_range": {"start": "2023-01-01", "end": "2023-12-31"}
    /// })).unwrap();
    /// assert_eq!(filter.len(), 2);
    ///
    /// assert!(FilterSpec::from_json(&json!("progress_note")).is_err());
    /// ```
    pub fn from_json(value: &JsonValue) -> Result<Self, FilterError> {
        let map = match value {
            JsonValue::Object(map) => map,
            other => {
                return Err(FilterError::InvalidSyntax(format!(
                    "Filter must be a JSON object, got {}",
                    json_type(other)
                )))
            }
        };

        let mut filters = Vec::with_capacity(map.len());
        for (field, field_value) in map {
            filters.push(Self::parse_field_filter(field, field_value)?);
        }
        Ok(Self { filters })
    }

    fn parse_field_filter(field: &str, value: &JsonValue) -> Result<FieldFilter, FilterError> {
        if field == DATE_RANGE_KEY {
            return Self::parse_date_range(value);
        }

        match value {
            JsonValue::Array(values) => Ok(FieldFilter::AnyOf {
                field: field.to_string(),
                values: values.clone(),
            }),
            _ => Ok(FieldFilter::Equals {
                field: field.to_string(),
                value: value.clone(),
            }),
        }
    }

    fn parse_date_range(value: &JsonValue) -> Result<FieldFilter, FilterError> {
        let bounds = match value {
            JsonValue::Object(bounds) => bounds,
            other => {
                return Err(FilterError::TypeMismatch {
                    field: DATE_RANGE_KEY.to_string(),
                    expected: "object".to_string(),
                    actual: json_type(other).to_string(),
                })
            }
        };

        if let Some(key) = bounds.keys().find(|k| !matches!(k.as_str(), "start" | "end")) {
            return Err(FilterError::InvalidSyntax(format!(
                "Unknown date_range bound '{}', expected 'start' or 'end'",
                key
            )));
        }

        let bound = |name: &str| -> Result<Option<String>, FilterError> {
            match bounds.get(name) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(JsonValue::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(FilterError::TypeMismatch {
                    field: format!("{}.{}", DATE_RANGE_KEY, name),
                    expected: "string".to_string(),
                    actual: json_type(other).to_string(),
                }),
            }
        };

        Ok(FieldFilter::DateRange {
            start: bound("start")?,
            end: bound("end")?,
        })
    }

    /// Check if metadata satisfies every key of this filter
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use clinical_vector_store::core::metadata_filter::FilterSpec;
    ///
    /// let filter = FilterSpec::from_json(&json!({"department": "Cardiology"})).unwrap();
    /// let metadata = json!({"department": "Cardiology", "date": "2023-05-15"});
    /// assert!(filter.matches(metadata.as_object().unwrap()));
    /// ```
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.filters.iter().all(|f| f.matches(metadata))
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }
}

/// Free-function form of [`FilterSpec::matches`].
pub fn matches(metadata: &Metadata, filter: &FilterSpec) -> bool {
    filter.matches(metadata)
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
