use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    AutoEvaluate,
    ManualEvaluationSet,
    #[default]
    ManualFeedback,
    CozeFeedback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    #[default]
    Normal,
    Inactive,
    Deleted,
}

/// Typed annotation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnnotationValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Default for AnnotationValue {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl AnnotationValue {
    /// Renders the value the way filter predicates compare it.
    pub fn to_filter_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Long(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
        }
    }
}

/// A note or label attached to a span, stored apart from the span row.
/// Times are microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotation {
    pub id: String,
    pub span_id: String,
    pub trace_id: String,
    pub workspace_id: String,
    pub start_time: i64,
    pub annotation_type: AnnotationType,
    pub key: String,
    pub value: AnnotationValue,
    pub reasoning: String,
    pub status: AnnotationStatus,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    pub is_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_wire_shape() {
        let json = serde_json::to_string(&AnnotationValue::Long(3)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":3}"#);
        let back: AnnotationValue = serde_json::from_str(r#"{"type":"bool","value":true}"#).unwrap();
        assert_eq!(back, AnnotationValue::Bool(true));
        assert_eq!(back.to_filter_string(), "true");
    }

    #[test]
    fn test_annotation_defaults() {
        let a: Annotation = serde_json::from_str(r#"{"id":"a","span_id":"s"}"#).unwrap();
        assert_eq!(a.status, AnnotationStatus::Normal);
        assert_eq!(a.annotation_type, AnnotationType::ManualFeedback);
        assert_eq!(a.value, AnnotationValue::String(String::new()));
    }
}
