//! Request and response types of the repository operations. Request times
//! are milliseconds since the UNIX epoch.

use serde::{Deserialize, Serialize};
use tracekeep_core::annotation::Annotation;
use tracekeep_core::filter::FilterFields;
use tracekeep_core::metrics::{Aggregation, Granularity, GroupBy, MetricRow};
use tracekeep_core::span::Span;
use tracekeep_core::ttl::Ttl;

#[derive(Debug, Clone)]
pub struct InsertSpansParam {
    pub workspace_id: i64,
    pub tenant: String,
    pub ttl: Ttl,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone)]
pub struct InsertAnnotationsParam {
    pub workspace_id: i64,
    pub tenant: String,
    pub ttl: Ttl,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSpansParam {
    pub workspace_id: i64,
    pub tenants: Vec<String>,
    pub start_at: i64,
    pub end_at: i64,
    pub filters: Option<FilterFields>,
    pub limit: usize,
    pub desc_by_start_time: bool,
    pub page_token: String,
    pub select_columns: Vec<String>,
    pub omit_columns: Vec<String>,
    pub not_query_annotation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListSpansResult {
    pub spans: Vec<Span>,
    pub page_token: String,
    pub has_more: bool,
}

/// Outcome of a quota-driven listing, with the scan parameters actually used.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatedListing {
    pub result: ListSpansResult,
    pub effective_request: ListSpansParam,
}

#[derive(Debug, Clone, Default)]
pub struct GetTraceParam {
    pub workspace_id: i64,
    pub tenants: Vec<String>,
    /// Takes precedence over `log_id` when set.
    pub trace_id: String,
    pub log_id: String,
    pub span_ids: Vec<String>,
    pub filters: Option<FilterFields>,
    pub start_at: i64,
    pub end_at: i64,
    pub limit: Option<usize>,
    pub select_columns: Vec<String>,
    pub omit_columns: Vec<String>,
    pub not_query_annotation: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListAnnotationsParam {
    pub workspace_id: i64,
    pub tenants: Vec<String>,
    pub span_id: String,
    pub trace_id: String,
    pub start_at: i64,
    pub end_at: i64,
    pub desc_by_updated_at: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetAnnotationParam {
    pub workspace_id: i64,
    pub tenants: Vec<String>,
    pub id: String,
    pub start_at: i64,
    pub end_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GetMetricsParam {
    pub workspace_id: i64,
    pub tenants: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub group_bys: Vec<GroupBy>,
    pub filters: Option<FilterFields>,
    pub start_at: i64,
    pub end_at: i64,
    pub granularity: Option<Granularity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GetMetricsResult {
    pub data: Vec<MetricRow>,
}

pub(crate) fn millis_to_micros(ms: i64) -> i64 {
    ms.saturating_mul(1000)
}
