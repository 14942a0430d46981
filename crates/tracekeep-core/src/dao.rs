//! Contracts for the physical span and annotation stores.
//!
//! A DAO receives fully resolved table names; tenant routing happens before
//! it is called. Every method takes the request's [`RequestContext`] and must
//! surface cancellation as [`StorageError::Interrupted`].

use std::collections::HashMap;

use crate::annotation::Annotation;
use crate::context::RequestContext;
use crate::error::StorageError;
use crate::filter::FilterFields;
use crate::metrics::{Aggregation, Granularity, GroupBy, MetricRow};
use crate::span::Span;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryKind {
    #[default]
    ListSpans,
    GetTrace,
}

/// One bounded span query. Times are microseconds, both ends inclusive.
#[derive(Debug, Clone, Default)]
pub struct QueryParam {
    pub kind: QueryKind,
    pub tables: Vec<String>,
    /// Span table to annotation table, for filters over annotation fields.
    pub anno_table_map: HashMap<String, String>,
    pub start_time: i64,
    pub end_time: i64,
    pub filters: Option<FilterFields>,
    /// `None` returns every matching row.
    pub limit: Option<usize>,
    /// Order by `(start_time, span_id)` descending when set.
    pub order_by_start_time: bool,
    pub select_columns: Vec<String>,
    pub omit_columns: Vec<String>,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub tables: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub group_bys: Vec<GroupBy>,
    pub filters: Option<FilterFields>,
    pub start_time: i64,
    pub end_time: i64,
    pub granularity: Option<Granularity>,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListAnnotationsQuery {
    pub tables: Vec<String>,
    pub span_ids: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub desc_by_updated_at: bool,
    pub limit: usize,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GetAnnotationQuery {
    pub tables: Vec<String>,
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub limit: usize,
    pub extra: HashMap<String, String>,
}

pub trait SpansDao: Send + Sync {
    fn insert(&self, ctx: &RequestContext, table: &str, spans: &[Span]) -> Result<(), StorageError>;

    fn get(&self, ctx: &RequestContext, param: &QueryParam) -> Result<Vec<Span>, StorageError>;

    fn get_metrics(
        &self,
        ctx: &RequestContext,
        param: &MetricsQuery,
    ) -> Result<Vec<MetricRow>, StorageError>;
}

pub trait AnnotationDao: Send + Sync {
    fn insert(
        &self,
        ctx: &RequestContext,
        table: &str,
        annotations: &[Annotation],
    ) -> Result<(), StorageError>;

    fn list(
        &self,
        ctx: &RequestContext,
        param: &ListAnnotationsQuery,
    ) -> Result<Vec<Annotation>, StorageError>;

    fn get(
        &self,
        ctx: &RequestContext,
        param: &GetAnnotationQuery,
    ) -> Result<Option<Annotation>, StorageError>;
}
