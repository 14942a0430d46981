use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;

/// Column names understood by storage for projection, filtering and
/// ordering.
pub mod columns {
    pub const TRACE_ID: &str = "trace_id";
    pub const SPAN_ID: &str = "span_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const LOG_ID: &str = "log_id";
    pub const WORKSPACE_ID: &str = "space_id";
    pub const SPAN_NAME: &str = "span_name";
    pub const SPAN_TYPE: &str = "span_type";
    pub const METHOD: &str = "method";
    pub const CALL_TYPE: &str = "call_type";
    pub const OBJECT_STORAGE: &str = "object_storage";
    pub const START_TIME: &str = "start_time";
    pub const DURATION: &str = "duration";
    pub const STATUS_CODE: &str = "status_code";
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const LOGIC_DELETE_TIME: &str = "logic_delete_date";
    pub const TAGS: &str = "tags";
    pub const SYSTEM_TAGS: &str = "system_tags";
}

/// Tag maps partitioned by value type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tags {
    pub bool: BTreeMap<String, bool>,
    pub string: BTreeMap<String, String>,
    pub long: BTreeMap<String, i64>,
    pub double: BTreeMap<String, f64>,
    pub byte: BTreeMap<String, String>,
}

impl Tags {
    pub fn is_empty(&self) -> bool {
        self.bool.is_empty()
            && self.string.is_empty()
            && self.long.is_empty()
            && self.double.is_empty()
            && self.byte.is_empty()
    }
}

/// A single recorded unit of work. Times and durations are microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub log_id: String,
    pub workspace_id: String,
    pub span_name: String,
    pub span_type: String,
    pub method: String,
    pub call_type: String,
    pub object_storage: String,
    pub start_time: i64,
    pub duration: i64,
    pub status_code: i32,
    pub input: String,
    pub output: String,
    pub logic_delete_time: i64,
    pub tags: Tags,
    pub system_tags: Tags,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Span {
    /// Identity key of the row: `(trace_id, span_id)`.
    pub fn identity(&self) -> (&str, &str) {
        (&self.trace_id, &self.span_id)
    }

    /// Keyset ordering key: `(start_time, span_id)`.
    pub fn order_key(&self) -> (i64, &str) {
        (self.start_time, &self.span_id)
    }

    /// Attaches every annotation belonging to this span, keeping the order in
    /// which they are given.
    pub fn add_annotations<'a>(&mut self, annotations: impl IntoIterator<Item = &'a Annotation>) {
        self.annotations.extend(
            annotations
                .into_iter()
                .filter(|a| a.span_id == self.span_id)
                .cloned(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_annotations_only_takes_own() {
        let mut span = Span {
            span_id: "s1".into(),
            ..Default::default()
        };
        let annotations = vec![
            Annotation {
                id: "a1".into(),
                span_id: "s1".into(),
                ..Default::default()
            },
            Annotation {
                id: "a2".into(),
                span_id: "s2".into(),
                ..Default::default()
            },
        ];
        span.add_annotations(&annotations);
        assert_eq!(span.annotations.len(), 1);
        assert_eq!(span.annotations[0].id, "a1");
    }

    #[test]
    fn test_span_deserializes_with_missing_fields() {
        let span: Span =
            serde_json::from_str(r#"{"trace_id":"t","span_id":"s","start_time":5,"tags":{"long":{"n":1}}}"#)
                .unwrap();
        assert_eq!(span.identity(), ("t", "s"));
        assert_eq!(span.order_key(), (5, "s"));
        assert_eq!(span.tags.long["n"], 1);
        assert!(span.system_tags.is_empty());
    }
}
