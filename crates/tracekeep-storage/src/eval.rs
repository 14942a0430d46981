//! In-process evaluation of filter trees, projection and result ordering,
//! shared by the fjall and in-memory stores.

use std::borrow::Cow;
use std::cmp::Ordering;

use tracekeep_core::annotation::Annotation;
use tracekeep_core::dao::QueryParam;
use tracekeep_core::error::StorageError;
use tracekeep_core::filter::{FieldPredicate, FieldType, FilterField, FilterFields, QueryAndOr, QueryType};
use tracekeep_core::span::{Span, Tags, columns};

/// Filter fields with this prefix address the value of the span's annotation
/// with the given key, e.g. `annotation.quality`.
pub const ANNOTATION_FIELD_PREFIX: &str = "annotation.";

/// A field read off a span row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue<'a> {
    Str(Cow<'a, str>),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl FieldValue<'_> {
    pub(crate) fn render(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Str(s) => s.parse().ok(),
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        }
    }

    fn is_present(&self) -> bool {
        !matches!(self, Self::Str(s) if s.is_empty())
    }
}

fn tag_value<'a>(tags: &'a Tags, name: &str) -> Option<FieldValue<'a>> {
    if let Some(v) = tags.string.get(name) {
        return Some(FieldValue::Str(Cow::Borrowed(v)));
    }
    if let Some(v) = tags.long.get(name) {
        return Some(FieldValue::Long(*v));
    }
    if let Some(v) = tags.double.get(name) {
        return Some(FieldValue::Double(*v));
    }
    if let Some(v) = tags.bool.get(name) {
        return Some(FieldValue::Bool(*v));
    }
    tags.byte.get(name).map(|v| FieldValue::Str(Cow::Borrowed(v)))
}

/// Reads a column, a user tag, a system tag or an annotation value, in that
/// order of precedence.
pub(crate) fn field_value<'a>(span: &'a Span, name: &str) -> Option<FieldValue<'a>> {
    let borrowed = |s: &'a String| Some(FieldValue::Str(Cow::Borrowed(s.as_str())));
    match name {
        columns::TRACE_ID => borrowed(&span.trace_id),
        columns::SPAN_ID => borrowed(&span.span_id),
        columns::PARENT_ID => borrowed(&span.parent_id),
        columns::LOG_ID => borrowed(&span.log_id),
        columns::WORKSPACE_ID => borrowed(&span.workspace_id),
        columns::SPAN_NAME => borrowed(&span.span_name),
        columns::SPAN_TYPE => borrowed(&span.span_type),
        columns::METHOD => borrowed(&span.method),
        columns::CALL_TYPE => borrowed(&span.call_type),
        columns::OBJECT_STORAGE => borrowed(&span.object_storage),
        columns::INPUT => borrowed(&span.input),
        columns::OUTPUT => borrowed(&span.output),
        columns::START_TIME => Some(FieldValue::Long(span.start_time)),
        columns::DURATION => Some(FieldValue::Long(span.duration)),
        columns::STATUS_CODE => Some(FieldValue::Long(span.status_code as i64)),
        columns::LOGIC_DELETE_TIME => Some(FieldValue::Long(span.logic_delete_time)),
        _ => {
            if let Some(key) = name.strip_prefix(ANNOTATION_FIELD_PREFIX) {
                return span
                    .annotations
                    .iter()
                    .find(|a| a.key == key && !a.is_deleted)
                    .map(|a| FieldValue::Str(Cow::Owned(a.value.to_filter_string())));
            }
            tag_value(&span.tags, name).or_else(|| tag_value(&span.system_tags, name))
        }
    }
}

/// A predicate operand after parsing by field type.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Str(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Scalar {
    fn parse(raw: &str, field_type: FieldType) -> Result<Self, StorageError> {
        let bad = || StorageError::InvalidQuery(format!("value {raw:?} is not a valid {field_type:?}"));
        Ok(match field_type {
            FieldType::String => Self::Str(raw.to_string()),
            FieldType::Long => Self::Long(raw.parse().map_err(|_| bad())?),
            FieldType::Double => Self::Double(raw.parse().map_err(|_| bad())?),
            FieldType::Bool => Self::Bool(raw.parse().map_err(|_| bad())?),
        })
    }

    /// Coerces a row value to the predicate's type; `None` when it cannot be
    /// represented.
    fn coerce(value: &FieldValue<'_>, field_type: FieldType) -> Option<Self> {
        match (field_type, value) {
            (FieldType::String, v) => Some(Self::Str(v.render())),
            (FieldType::Long, FieldValue::Long(v)) => Some(Self::Long(*v)),
            (FieldType::Long, FieldValue::Double(v)) => Some(Self::Long(*v as i64)),
            (FieldType::Long, FieldValue::Str(s)) => s.parse().ok().map(Self::Long),
            (FieldType::Double, v) => v.as_f64().map(Self::Double),
            (FieldType::Bool, FieldValue::Bool(v)) => Some(Self::Bool(*v)),
            (FieldType::Bool, FieldValue::Str(s)) => s.parse().ok().map(Self::Bool),
            (FieldType::Bool, FieldValue::Long(v)) => Some(Self::Bool(*v != 0)),
            _ => None,
        }
    }

    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn eval_predicate(span: &Span, predicate: &FieldPredicate) -> Result<bool, StorageError> {
    let value = field_value(span, &predicate.field_name).filter(FieldValue::is_present);
    let negated = matches!(
        predicate.query_type,
        QueryType::NotEq | QueryType::NotIn | QueryType::NotMatch | QueryType::NotExist
    );
    match predicate.query_type {
        QueryType::AlwaysTrue => return Ok(true),
        QueryType::Exist => return Ok(value.is_some()),
        QueryType::NotExist => return Ok(value.is_none()),
        _ => {}
    }
    let Some(value) = value else {
        return Ok(negated);
    };

    if matches!(predicate.query_type, QueryType::Match | QueryType::NotMatch) {
        let haystack = value.render();
        let found = predicate.values.iter().any(|needle| haystack.contains(needle.as_str()));
        return Ok(found != negated);
    }

    let operands = predicate
        .values
        .iter()
        .map(|raw| Scalar::parse(raw, predicate.field_type))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(row) = Scalar::coerce(&value, predicate.field_type) else {
        return Ok(negated);
    };
    let ordering_with = |operand: &Scalar| row.compare(operand);

    match predicate.query_type {
        QueryType::In | QueryType::NotIn => {
            let found = operands.iter().any(|op| ordering_with(op) == Some(Ordering::Equal));
            Ok(found != negated)
        }
        query_type => {
            let Some(operand) = operands.first() else {
                return Err(StorageError::InvalidQuery(format!(
                    "{query_type:?} on {} needs a value",
                    predicate.field_name
                )));
            };
            let Some(ord) = ordering_with(operand) else {
                return Ok(false);
            };
            Ok(match query_type {
                QueryType::Eq => ord == Ordering::Equal,
                QueryType::NotEq => ord != Ordering::Equal,
                QueryType::Gt => ord == Ordering::Greater,
                QueryType::Gte => ord != Ordering::Less,
                QueryType::Lt => ord == Ordering::Less,
                QueryType::Lte => ord != Ordering::Greater,
                other => {
                    return Err(StorageError::InvalidQuery(format!(
                        "{other:?} is not a comparison"
                    )));
                }
            })
        }
    }
}

/// Evaluates `filter` against one row. An empty group matches everything.
pub fn matches(span: &Span, filter: &FilterFields) -> Result<bool, StorageError> {
    if filter.is_empty() {
        return Ok(true);
    }
    for field in &filter.filter_fields {
        let hit = match field {
            FilterField::Leaf(predicate) => eval_predicate(span, predicate)?,
            FilterField::Branch(sub) => matches(span, sub)?,
        };
        match (filter.query_and_or, hit) {
            (QueryAndOr::And, false) => return Ok(false),
            (QueryAndOr::Or, true) => return Ok(true),
            _ => {}
        }
    }
    Ok(filter.query_and_or == QueryAndOr::And)
}

/// Whether evaluating `filter` requires the rows' annotations.
pub fn references_annotations(filter: Option<&FilterFields>) -> bool {
    filter.is_some_and(|f| {
        f.predicates()
            .iter()
            .any(|p| p.field_name.starts_with(ANNOTATION_FIELD_PREFIX))
    })
}

/// Checks a row against the time range and filter of a span query.
/// `annotations` is consulted only when the filter references them.
pub(crate) fn accept(
    mut span: Span,
    param: &QueryParam,
    annotations: &[Annotation],
) -> Result<Option<Span>, StorageError> {
    if span.start_time < param.start_time || span.start_time > param.end_time {
        return Ok(None);
    }
    let Some(filter) = &param.filters else {
        return Ok(Some(span));
    };
    if references_annotations(Some(filter)) {
        span.annotations.clear();
        span.add_annotations(annotations);
    }
    Ok(matches(&span, filter)?.then_some(span))
}

const PROJECTABLE: [&str; 16] = [
    columns::PARENT_ID,
    columns::LOG_ID,
    columns::WORKSPACE_ID,
    columns::SPAN_NAME,
    columns::SPAN_TYPE,
    columns::METHOD,
    columns::CALL_TYPE,
    columns::OBJECT_STORAGE,
    columns::START_TIME,
    columns::DURATION,
    columns::STATUS_CODE,
    columns::INPUT,
    columns::OUTPUT,
    columns::LOGIC_DELETE_TIME,
    columns::TAGS,
    columns::SYSTEM_TAGS,
];

fn clear_column(span: &mut Span, column: &str) {
    match column {
        columns::PARENT_ID => span.parent_id.clear(),
        columns::LOG_ID => span.log_id.clear(),
        columns::WORKSPACE_ID => span.workspace_id.clear(),
        columns::SPAN_NAME => span.span_name.clear(),
        columns::SPAN_TYPE => span.span_type.clear(),
        columns::METHOD => span.method.clear(),
        columns::CALL_TYPE => span.call_type.clear(),
        columns::OBJECT_STORAGE => span.object_storage.clear(),
        columns::START_TIME => span.start_time = 0,
        columns::DURATION => span.duration = 0,
        columns::STATUS_CODE => span.status_code = 0,
        columns::INPUT => span.input.clear(),
        columns::OUTPUT => span.output.clear(),
        columns::LOGIC_DELETE_TIME => span.logic_delete_time = 0,
        columns::TAGS => span.tags = Tags::default(),
        columns::SYSTEM_TAGS => span.system_tags = Tags::default(),
        _ => {}
    }
}

/// Keeps only the selected columns (all of them when `select` is empty),
/// then clears the omitted ones. Identity columns are always kept.
pub fn project(span: &mut Span, select: &[String], omit: &[String]) {
    if !select.is_empty() {
        for column in PROJECTABLE {
            if !select.iter().any(|c| c == column) {
                clear_column(span, column);
            }
        }
    }
    for column in omit {
        clear_column(span, column);
    }
}

/// Orders, truncates and projects the rows gathered for a span query.
pub(crate) fn finish_query(mut rows: Vec<Span>, param: &QueryParam) -> Vec<Span> {
    if param.order_by_start_time {
        rows.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
    } else {
        rows.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    }
    if let Some(limit) = param.limit {
        rows.truncate(limit);
    }
    for row in &mut rows {
        row.annotations.clear();
        project(row, &param.select_columns, &param.omit_columns);
    }
    rows
}
