//! Boolean filter trees handed to storage for physical query translation.
//!
//! A [`FilterFields`] node combines an ordered list of [`FilterField`]s with
//! `and` or `or`. Each field is either a predicate leaf or a nested branch,
//! so a tree can express `a AND (b OR (c AND d))`. Trees are plain data: the
//! repository only builds and merges them, evaluation belongs to storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAndOr {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Match,
    NotMatch,
    Exist,
    NotExist,
    AlwaysTrue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Long,
    Double,
    Bool,
}

/// A predicate over a single field. Values are string-encoded and parsed by
/// storage according to `field_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field_name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub values: Vec<String>,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Leaf(FieldPredicate),
    Branch(FilterFields),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default)]
    pub query_and_or: QueryAndOr,
    #[serde(default)]
    pub filter_fields: Vec<FilterField>,
}

impl FilterField {
    pub fn leaf(
        field_name: impl Into<String>,
        field_type: FieldType,
        query_type: QueryType,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Leaf(FieldPredicate {
            field_name: field_name.into(),
            field_type,
            values: values.into_iter().map(Into::into).collect(),
            query_type,
        })
    }

    /// `field == value` on a string column.
    pub fn equals(field_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::leaf(field_name, FieldType::String, QueryType::Eq, [value.into()])
    }

    /// `field IN (values)` on a string column.
    pub fn one_of(
        field_name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::leaf(field_name, FieldType::String, QueryType::In, values)
    }

    pub fn branch(filter: FilterFields) -> Self {
        Self::Branch(filter)
    }
}

impl FilterFields {
    pub fn and(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: QueryAndOr::And,
            filter_fields,
        }
    }

    pub fn or(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: QueryAndOr::Or,
            filter_fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filter_fields.is_empty()
    }

    /// Combines two trees as sibling branches under a new `and` root.
    pub fn merge(a: FilterFields, b: FilterFields) -> FilterFields {
        FilterFields::and(vec![FilterField::Branch(a), FilterField::Branch(b)])
    }

    /// Visits every leaf predicate, depth first.
    pub fn predicates(&self) -> Vec<&FieldPredicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a FieldPredicate>) {
        for field in &self.filter_fields {
            match field {
                FilterField::Leaf(predicate) => out.push(predicate),
                FilterField::Branch(sub) => sub.collect_predicates(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_wraps_both_as_branches() {
        let a = FilterFields::and(vec![FilterField::equals("trace_id", "t1")]);
        let b = FilterFields::or(vec![FilterField::one_of("span_id", ["s1", "s2"])]);
        let merged = FilterFields::merge(a.clone(), b.clone());
        assert_eq!(merged.query_and_or, QueryAndOr::And);
        assert_eq!(
            merged.filter_fields,
            vec![FilterField::Branch(a), FilterField::Branch(b)]
        );
    }

    #[test]
    fn test_predicates_walks_nested_branches() {
        let tree = FilterFields::and(vec![
            FilterField::equals("trace_id", "t1"),
            FilterField::branch(FilterFields::or(vec![
                FilterField::equals("span_type", "llm"),
                FilterField::branch(FilterFields::and(vec![FilterField::equals("method", "m")])),
            ])),
        ]);
        let names: Vec<_> = tree.predicates().iter().map(|p| p.field_name.as_str()).collect();
        assert_eq!(names, ["trace_id", "span_type", "method"]);
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "query_and_or": "or",
            "filter_fields": [
                {"leaf": {"field_name": "status_code", "field_type": "long", "values": ["0"], "query_type": "not_eq"}},
                {"branch": {"filter_fields": []}}
            ]
        }"#;
        let tree: FilterFields = serde_json::from_str(json).unwrap();
        assert_eq!(tree.query_and_or, QueryAndOr::Or);
        assert_eq!(
            tree.filter_fields[0],
            FilterField::leaf("status_code", FieldType::Long, QueryType::NotEq, ["0"])
        );
        assert_eq!(tree.filter_fields[1], FilterField::Branch(FilterFields::default()));
    }
}
