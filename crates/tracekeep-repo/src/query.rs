use std::time::Instant;

use tracekeep_core::context::RequestContext;
use tracekeep_core::dao::{AnnotationDao, ListAnnotationsQuery, QueryKind, QueryParam, SpansDao};
use tracekeep_core::error::RepoError;
use tracekeep_core::filter::FilterFields;
use tracekeep_core::span::Span;
use tracekeep_core::storage::Storage;
use tracing::info;

use crate::dedup::{uniq_annotations, uniq_by};
use crate::tables::QueryTables;

/// Annotations fetched per span in a join.
const ANNOTATIONS_PER_SPAN: usize = 100;
/// Upper bound on annotations fetched by one join.
const MAX_JOINED_ANNOTATIONS: usize = 10_000;

/// Everything a single physical span query needs besides the filter.
/// Times are microseconds.
#[derive(Debug, Clone)]
pub(crate) struct ScanPlan<'a> {
    pub kind: QueryKind,
    pub tables: &'a QueryTables,
    pub storage: &'a Storage,
    pub start_time: i64,
    pub end_time: i64,
    pub order_desc: bool,
    pub select_columns: &'a [String],
    pub omit_columns: &'a [String],
}

/// Issues one bounded query against the span DAO.
pub(crate) struct SpanQueryExecutor<'a> {
    dao: &'a dyn SpansDao,
}

impl<'a> SpanQueryExecutor<'a> {
    pub fn new(dao: &'a dyn SpansDao) -> Self {
        Self { dao }
    }

    pub fn query(
        &self,
        ctx: &RequestContext,
        plan: &ScanPlan<'_>,
        filters: Option<FilterFields>,
        limit: Option<usize>,
    ) -> Result<Vec<Span>, RepoError> {
        ctx.check()?;
        let param = QueryParam {
            kind: plan.kind,
            tables: plan.tables.span_tables.clone(),
            anno_table_map: plan.tables.anno_table_map.clone(),
            start_time: plan.start_time,
            end_time: plan.end_time,
            filters,
            limit,
            order_by_start_time: plan.order_desc,
            select_columns: plan.select_columns.to_vec(),
            omit_columns: plan.omit_columns.to_vec(),
            extra: plan.storage.config.clone(),
        };
        let st = Instant::now();
        let spans = self
            .dao
            .get(ctx, &param)
            .map_err(|e| RepoError::upstream("query spans", e))?;
        info!(
            tables = ?param.tables,
            count = spans.len(),
            cost_ms = st.elapsed().as_millis() as u64,
            "query spans successfully"
        );
        Ok(spans)
    }

    /// Fetches one page of `limit` rows plus one overflow row, which tells the
    /// caller whether more rows exist without a second round trip.
    pub fn query_page(
        &self,
        ctx: &RequestContext,
        plan: &ScanPlan<'_>,
        filters: Option<FilterFields>,
        limit: usize,
    ) -> Result<Vec<Span>, RepoError> {
        self.query(ctx, plan, filters, Some(limit.saturating_add(1)))
    }
}

/// Attaches annotations to a batch of spans with one bounded follow-up query.
pub(crate) struct AnnotationJoiner<'a> {
    dao: &'a dyn AnnotationDao,
}

impl<'a> AnnotationJoiner<'a> {
    pub fn new(dao: &'a dyn AnnotationDao) -> Self {
        Self { dao }
    }

    pub fn join(
        &self,
        ctx: &RequestContext,
        plan: &ScanPlan<'_>,
        spans: &mut [Span],
    ) -> Result<(), RepoError> {
        let span_ids = uniq_by(
            spans.iter().map(|s| s.span_id.clone()).collect(),
            |id: &String| id.clone(),
        );
        if span_ids.is_empty() {
            return Ok(());
        }
        ctx.check()?;
        let param = ListAnnotationsQuery {
            tables: plan.tables.anno_tables.clone(),
            limit: join_limit(span_ids.len()),
            span_ids,
            start_time: plan.start_time,
            end_time: plan.end_time,
            desc_by_updated_at: false,
            extra: plan.storage.config.clone(),
        };
        let st = Instant::now();
        let annotations = self
            .dao
            .list(ctx, &param)
            .map_err(|e| RepoError::upstream("list annotations", e))?;
        info!(
            count = annotations.len(),
            cost_ms = st.elapsed().as_millis() as u64,
            "get annotations successfully"
        );
        let annotations = uniq_annotations(annotations);
        for span in spans.iter_mut() {
            span.add_annotations(&annotations);
        }
        Ok(())
    }
}

fn join_limit(span_count: usize) -> usize {
    span_count
        .saturating_mul(ANNOTATIONS_PER_SPAN)
        .min(MAX_JOINED_ANNOTATIONS)
}
