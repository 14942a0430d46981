//! Opaque keyset cursors for `(start_time desc, span_id desc)` scans.
//!
//! Wire format: standard base64 of `{"StartTime":<µs>,"SpanID":"<id>"}`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use tracekeep_core::error::RepoError;
use tracekeep_core::filter::{FieldType, FilterField, FilterFields, QueryType};
use tracekeep_core::span::{Span, columns};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageToken {
    #[serde(rename = "StartTime")]
    pub start_time: i64,
    #[serde(rename = "SpanID")]
    pub span_id: String,
}

impl PageToken {
    pub fn after(span: &Span) -> Self {
        Self {
            start_time: span.start_time,
            span_id: span.span_id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        // A struct of an integer and a string always serializes.
        let json = serde_json::to_vec(self).unwrap_or_default();
        B64.encode(json)
    }

    /// Decodes a token produced by [`PageToken::encode`]. An empty string
    /// means "first page" and yields `None`.
    pub fn decode(token: &str) -> Result<Option<Self>, RepoError> {
        if token.is_empty() {
            return Ok(None);
        }
        let raw = B64
            .decode(token)
            .map_err(|e| RepoError::invalid_param(format!("fail to decode page token {token}: {e}")))?;
        let parsed = serde_json::from_slice(&raw).map_err(|e| {
            RepoError::invalid_param(format!(
                "fail to unmarshal page token {}: {e}",
                String::from_utf8_lossy(&raw)
            ))
        })?;
        Ok(Some(parsed))
    }

    /// `start_time < t OR (start_time == t AND span_id < s)`.
    pub fn constraint(&self) -> FilterFields {
        let time = self.start_time.to_string();
        FilterFields::or(vec![
            FilterField::leaf(columns::START_TIME, FieldType::Long, QueryType::Lt, [time.clone()]),
            FilterField::branch(FilterFields::and(vec![
                FilterField::leaf(columns::START_TIME, FieldType::Long, QueryType::Eq, [time]),
                FilterField::leaf(
                    columns::SPAN_ID,
                    FieldType::String,
                    QueryType::Lt,
                    [self.span_id.clone()],
                ),
            ])),
        ])
    }

    /// Restricts `existing` to rows strictly after this cursor.
    pub fn inject(&self, existing: Option<FilterFields>) -> FilterFields {
        match existing {
            Some(filter) => FilterFields::merge(self.constraint(), filter),
            None => self.constraint(),
        }
    }

    /// Whether `self` lies strictly after `previous` in descending scan order.
    pub(crate) fn advances_past(&self, previous: &PageToken) -> bool {
        (self.start_time, self.span_id.as_str()) < (previous.start_time, previous.span_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use tracekeep_core::filter::QueryAndOr;

    use super::*;

    #[test]
    fn test_round_trip() {
        for (start_time, span_id) in [(0, ""), (1_700_000_000_000_000, "abc"), (-5, "ünïcode")] {
            let token = PageToken {
                start_time,
                span_id: span_id.to_string(),
            };
            assert_eq!(PageToken::decode(&token.encode()).unwrap(), Some(token));
        }
    }

    #[test]
    fn test_wire_format() {
        let token = PageToken {
            start_time: 42,
            span_id: "s1".into(),
        };
        let raw = B64.decode(token.encode()).unwrap();
        assert_eq!(raw, br#"{"StartTime":42,"SpanID":"s1"}"#);
    }

    #[test]
    fn test_empty_is_first_page() {
        assert_eq!(PageToken::decode("").unwrap(), None);
    }

    #[test]
    fn test_malformed_tokens_are_invalid_param() {
        let not_json = B64.encode("hello");
        let wrong_shape = B64.encode(r#"{"invalid":"json"}"#);
        let missing_span = B64.encode(r#"{"StartTime":1}"#);
        for token in ["not-base64!", not_json.as_str(), wrong_shape.as_str(), missing_span.as_str()] {
            let err = PageToken::decode(token).unwrap_err();
            assert!(matches!(err, RepoError::InvalidParam(_)), "{token}");
        }
    }

    #[test]
    fn test_inject_without_existing_is_bare_constraint() {
        let token = PageToken {
            start_time: 10,
            span_id: "s5".into(),
        };
        let filter = token.inject(None);
        assert_eq!(filter.query_and_or, QueryAndOr::Or);
        assert_eq!(
            filter.filter_fields[0],
            FilterField::leaf("start_time", FieldType::Long, QueryType::Lt, ["10"])
        );
        let FilterField::Branch(tie) = &filter.filter_fields[1] else {
            panic!("expected tie-break branch");
        };
        assert_eq!(tie.query_and_or, QueryAndOr::And);
        assert_eq!(
            tie.filter_fields,
            vec![
                FilterField::leaf("start_time", FieldType::Long, QueryType::Eq, ["10"]),
                FilterField::leaf("span_id", FieldType::String, QueryType::Lt, ["s5"]),
            ]
        );
    }

    #[test]
    fn test_inject_ands_with_existing() {
        let token = PageToken {
            start_time: 10,
            span_id: "s5".into(),
        };
        let existing = FilterFields::and(vec![FilterField::equals("span_type", "llm")]);
        let filter = token.inject(Some(existing.clone()));
        assert_eq!(filter, FilterFields::merge(token.constraint(), existing));
    }

    #[test]
    fn test_advances_past() {
        let prev = PageToken {
            start_time: 10,
            span_id: "b".into(),
        };
        let older = PageToken {
            start_time: 9,
            span_id: "z".into(),
        };
        let tie = PageToken {
            start_time: 10,
            span_id: "a".into(),
        };
        assert!(older.advances_past(&prev));
        assert!(tie.advances_past(&prev));
        assert!(!prev.advances_past(&prev));
    }
}
