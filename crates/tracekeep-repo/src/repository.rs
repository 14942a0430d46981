use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracekeep_core::annotation::Annotation;
use tracekeep_core::config::TenantConfigProvider;
use tracekeep_core::context::RequestContext;
use tracekeep_core::dao::{AnnotationDao, GetAnnotationQuery, ListAnnotationsQuery, MetricsQuery, QueryKind, SpansDao};
use tracekeep_core::error::{RepoError, TableKind};
use tracekeep_core::filter::{FilterField, FilterFields};
use tracekeep_core::span::{Span, columns};
use tracekeep_core::storage::{Storage, StorageKind, StorageProvider};
use tracing::{error, info, warn};

use crate::cursor::PageToken;
use crate::dedup::{uniq_annotations, uniq_spans};
use crate::paginate::{collect_pages, effective_request, keep_cursor_columns};
use crate::params::*;
use crate::query::{AnnotationJoiner, ScanPlan, SpanQueryExecutor};
use crate::tables::{QueryTables, TableResolver};

/// Annotation rows fetched when listing the annotations of one span.
const LIST_ANNOTATIONS_LIMIT: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a [`TraceRepository`], registering one DAO pair per storage
/// backend.
pub struct TraceRepositoryBuilder {
    config: Arc<dyn TenantConfigProvider>,
    storage: Arc<dyn StorageProvider>,
    span_daos: HashMap<StorageKind, Arc<dyn SpansDao>>,
    anno_daos: HashMap<StorageKind, Arc<dyn AnnotationDao>>,
}

impl TraceRepositoryBuilder {
    pub fn with_span_dao(mut self, kind: StorageKind, dao: Arc<dyn SpansDao>) -> Self {
        self.span_daos.insert(kind, dao);
        self
    }

    pub fn with_annotation_dao(mut self, kind: StorageKind, dao: Arc<dyn AnnotationDao>) -> Self {
        self.anno_daos.insert(kind, dao);
        self
    }

    pub fn with_daos(
        self,
        kind: StorageKind,
        spans: Arc<dyn SpansDao>,
        annotations: Arc<dyn AnnotationDao>,
    ) -> Self {
        self.with_span_dao(kind, spans).with_annotation_dao(kind, annotations)
    }

    /// Fails when the storage provider can route to a backend that has no
    /// DAO at all.
    pub fn build(self) -> Result<TraceRepository, RepoError> {
        for kind in self.storage.kinds() {
            if !self.span_daos.contains_key(&kind) && !self.anno_daos.contains_key(&kind) {
                return Err(RepoError::Internal(format!(
                    "storage backend {kind} has no registered dao"
                )));
            }
        }
        Ok(TraceRepository {
            config: self.config,
            storage: self.storage,
            span_daos: self.span_daos,
            anno_daos: self.anno_daos,
        })
    }
}

/// Multi-tenant span and annotation repository.
///
/// Each operation runs synchronously on the calling thread: validate the
/// request, resolve tenant tables, query the DAOs of the backend the storage
/// provider picks, optionally join annotations, dedup and paginate. The DAO
/// registry is fixed at build time, so the repository can be shared across
/// threads behind an `Arc`.
pub struct TraceRepository {
    config: Arc<dyn TenantConfigProvider>,
    storage: Arc<dyn StorageProvider>,
    span_daos: HashMap<StorageKind, Arc<dyn SpansDao>>,
    anno_daos: HashMap<StorageKind, Arc<dyn AnnotationDao>>,
}

impl TraceRepository {
    pub fn builder(
        config: Arc<dyn TenantConfigProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> TraceRepositoryBuilder {
        TraceRepositoryBuilder {
            config,
            storage,
            span_daos: HashMap::new(),
            anno_daos: HashMap::new(),
        }
    }

    fn resolver(&self) -> TableResolver<'_> {
        TableResolver::new(self.config.as_ref())
    }

    fn span_dao(&self, storage: &Storage) -> Result<&dyn SpansDao, RepoError> {
        self.span_daos
            .get(&storage.kind)
            .map(|dao| dao.as_ref())
            .ok_or_else(|| RepoError::invalid_param("invalid storage"))
    }

    fn annotation_dao(&self, storage: &Storage) -> Result<&dyn AnnotationDao, RepoError> {
        self.anno_daos
            .get(&storage.kind)
            .map(|dao| dao.as_ref())
            .ok_or_else(|| RepoError::invalid_param("invalid storage"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_spans(&self, ctx: &RequestContext, param: &InsertSpansParam) -> Result<(), RepoError> {
        let storage = self
            .storage
            .trace_storage(param.workspace_id, std::slice::from_ref(&param.tenant));
        let dao = self.span_dao(&storage)?;
        let table = self
            .resolver()
            .resolve_write_table(ctx, &param.tenant, param.ttl, TableKind::Span)?;

        let delete_at = now_micros().saturating_add(param.ttl.retention().as_micros() as i64);
        let spans: Vec<Span> = param
            .spans
            .iter()
            .cloned()
            .map(|mut span| {
                span.logic_delete_time = delete_at;
                span
            })
            .collect();

        ctx.check()?;
        dao.insert(ctx, &table, &spans).map_err(|e| {
            error!(table = %table, "fail to insert spans: {e}");
            RepoError::upstream("insert spans", e)
        })?;
        info!(table = %table, count = spans.len(), "insert spans successfully");
        Ok(())
    }

    pub fn insert_annotations(
        &self,
        ctx: &RequestContext,
        param: &InsertAnnotationsParam,
    ) -> Result<(), RepoError> {
        if let Some(bad) = param
            .annotations
            .iter()
            .find(|a| a.id.is_empty() || a.span_id.is_empty())
        {
            return Err(RepoError::invalid_param(format!(
                "annotation {:?} of span {:?} lacks an id or span id",
                bad.id, bad.span_id
            )));
        }
        let storage = self
            .storage
            .trace_storage(param.workspace_id, std::slice::from_ref(&param.tenant));
        let dao = self.annotation_dao(&storage)?;
        let table = self.resolver().resolve_write_table(
            ctx,
            &param.tenant,
            param.ttl,
            TableKind::Annotation,
        )?;

        ctx.check()?;
        dao.insert(ctx, &table, &param.annotations).map_err(|e| {
            error!(table = %table, "fail to insert annotations: {e}");
            RepoError::upstream("insert annotations", e)
        })?;
        info!(table = %table, count = param.annotations.len(), "insert annotations successfully");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Span reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns one page of at most `limit` spans. `page_token` resumes after
    /// the last row of a previous page.
    pub fn list_spans(
        &self,
        ctx: &RequestContext,
        req: &ListSpansParam,
    ) -> Result<ListSpansResult, RepoError> {
        if req.limit == 0 {
            return Err(RepoError::invalid_param("list spans needs a positive limit"));
        }
        let storage = self.storage.trace_storage(req.workspace_id, &req.tenants);
        let span_dao = self.span_dao(&storage)?;
        let anno_dao = self.annotation_dao(&storage)?;
        let page_token = PageToken::decode(&req.page_token)?;
        let filters = match page_token {
            Some(token) => Some(token.inject(req.filters.clone())),
            None => req.filters.clone(),
        };
        let tables = self.resolver().resolve_query_tables(ctx, &req.tenants)?;
        let mut scan = req.clone();
        keep_cursor_columns(&mut scan);
        let plan = list_plan(&scan, &tables, &storage);

        let mut spans = SpanQueryExecutor::new(span_dao).query_page(ctx, &plan, filters, req.limit)?;
        if tables.needs_annotation_join && !req.not_query_annotation {
            AnnotationJoiner::new(anno_dao).join(ctx, &plan, &mut spans)?;
        }

        let has_more = spans.len() > req.limit;
        spans.truncate(req.limit);
        let page_token = spans
            .last()
            .map(|last| PageToken::after(last).encode())
            .unwrap_or_default();
        Ok(ListSpansResult {
            spans: uniq_spans(spans),
            page_token,
            has_more,
        })
    }

    /// Lists every matching span by following page cursors until the source
    /// is exhausted. The scan is always descending by start time with the
    /// start time projected; the parameters actually used are returned in
    /// [`RepeatedListing::effective_request`].
    pub fn list_spans_repeat(
        &self,
        ctx: &RequestContext,
        req: Option<&ListSpansParam>,
    ) -> Result<RepeatedListing, RepoError> {
        let Some(req) = req else {
            return Err(RepoError::invalid_param("list spans request is required"));
        };
        if req.limit == 0 {
            return Err(RepoError::invalid_param("list spans repeat needs a positive limit"));
        }
        let effective = effective_request(req);

        let storage = self.storage.trace_storage(effective.workspace_id, &effective.tenants);
        let span_dao = self.span_dao(&storage)?;
        let anno_dao = self.annotation_dao(&storage)?;
        let start = PageToken::decode(&effective.page_token)?;
        let tables = self.resolver().resolve_query_tables(ctx, &effective.tenants)?;
        let plan = list_plan(&effective, &tables, &storage);
        let executor = SpanQueryExecutor::new(span_dao);
        let joiner = (tables.needs_annotation_join && !effective.not_query_annotation)
            .then(|| AnnotationJoiner::new(anno_dao));

        let st = Instant::now();
        let spans = collect_pages(ctx, effective.limit, effective.filters.clone(), start, |filters| {
            let mut page = executor.query_page(ctx, &plan, filters, effective.limit)?;
            if let Some(joiner) = &joiner {
                joiner.join(ctx, &plan, &mut page)?;
            }
            Ok(page)
        })?;
        info!(
            count = spans.len(),
            cost_ms = st.elapsed().as_millis() as u64,
            "list spans repeat successfully"
        );

        Ok(RepeatedListing {
            result: ListSpansResult {
                spans,
                page_token: String::new(),
                has_more: false,
            },
            effective_request: effective,
        })
    }

    /// Fetches every span of a trace, identified by trace id or, failing
    /// that, by log id.
    pub fn get_trace(&self, ctx: &RequestContext, req: &GetTraceParam) -> Result<Vec<Span>, RepoError> {
        let id_filter = if !req.trace_id.is_empty() {
            FilterField::equals(columns::TRACE_ID, req.trace_id.as_str())
        } else if !req.log_id.is_empty() {
            FilterField::equals(columns::LOG_ID, req.log_id.as_str())
        } else {
            return Err(RepoError::invalid_param("trace id or log id is required"));
        };
        let storage = self.storage.trace_storage(req.workspace_id, &req.tenants);
        let span_dao = self.span_dao(&storage)?;
        let anno_dao = self.annotation_dao(&storage)?;
        let tables = self.resolver().resolve_query_tables(ctx, &req.tenants)?;

        let mut fields = vec![id_filter];
        if !req.span_ids.is_empty() {
            fields.push(FilterField::one_of(columns::SPAN_ID, req.span_ids.iter().cloned()));
        }
        if let Some(sub) = &req.filters {
            fields.push(FilterField::branch(sub.clone()));
        }

        let plan = ScanPlan {
            kind: QueryKind::GetTrace,
            tables: &tables,
            storage: &storage,
            start_time: millis_to_micros(req.start_at),
            end_time: millis_to_micros(req.end_at),
            order_desc: false,
            select_columns: &req.select_columns,
            omit_columns: &req.omit_columns,
        };
        let mut spans = SpanQueryExecutor::new(span_dao).query(
            ctx,
            &plan,
            Some(FilterFields::and(fields)),
            req.limit,
        )?;
        info!(trace_id = %req.trace_id, count = spans.len(), "get trace successfully");
        if tables.needs_annotation_join && !req.not_query_annotation {
            AnnotationJoiner::new(anno_dao).join(ctx, &plan, &mut spans)?;
        }
        Ok(uniq_spans(spans))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Annotation reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Lists the annotations of one span. Tenants without annotation tables
    /// yield an empty list.
    pub fn list_annotations(
        &self,
        ctx: &RequestContext,
        param: &ListAnnotationsParam,
    ) -> Result<Vec<Annotation>, RepoError> {
        if param.span_id.is_empty() || param.trace_id.is_empty() || param.workspace_id <= 0 {
            return Err(RepoError::invalid_param(
                "span id, trace id and a positive workspace id are required",
            ));
        }
        let storage = self.storage.trace_storage(param.workspace_id, &param.tenants);
        let dao = self.annotation_dao(&storage)?;
        let tables = self.resolver().resolve_query_tables(ctx, &param.tenants)?;
        if tables.anno_tables.is_empty() {
            return Ok(Vec::new());
        }

        ctx.check()?;
        let st = Instant::now();
        let annotations = dao
            .list(
                ctx,
                &ListAnnotationsQuery {
                    tables: tables.anno_tables,
                    span_ids: vec![param.span_id.clone()],
                    start_time: millis_to_micros(param.start_at),
                    end_time: millis_to_micros(param.end_at),
                    desc_by_updated_at: param.desc_by_updated_at,
                    limit: LIST_ANNOTATIONS_LIMIT,
                    extra: storage.config.clone(),
                },
            )
            .map_err(|e| RepoError::upstream("list annotations", e))?;
        info!(
            count = annotations.len(),
            cost_ms = st.elapsed().as_millis() as u64,
            "get annotations successfully"
        );

        let workspace_id = param.workspace_id.to_string();
        let annotations = annotations
            .into_iter()
            .filter(|a| a.trace_id == param.trace_id && a.workspace_id == workspace_id)
            .collect();
        Ok(uniq_annotations(annotations))
    }

    /// Fetches one annotation by id. Tenants without annotation tables yield
    /// `None`.
    pub fn get_annotation(
        &self,
        ctx: &RequestContext,
        param: &GetAnnotationParam,
    ) -> Result<Option<Annotation>, RepoError> {
        if param.id.is_empty() {
            return Err(RepoError::invalid_param("annotation id is required"));
        }
        let storage = self.storage.trace_storage(param.workspace_id, &param.tenants);
        let dao = self.annotation_dao(&storage)?;
        let tables = self.resolver().resolve_query_tables(ctx, &param.tenants)?;
        if tables.anno_tables.is_empty() {
            return Ok(None);
        }

        ctx.check()?;
        let st = Instant::now();
        let annotation = dao
            .get(
                ctx,
                &GetAnnotationQuery {
                    tables: tables.anno_tables,
                    id: param.id.clone(),
                    start_time: millis_to_micros(param.start_at),
                    end_time: millis_to_micros(param.end_at),
                    limit: 2,
                    extra: storage.config.clone(),
                },
            )
            .map_err(|e| RepoError::upstream("get annotation", e))?;
        info!(
            found = annotation.is_some(),
            cost_ms = st.elapsed().as_millis() as u64,
            "get annotation successfully"
        );
        Ok(annotation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_metrics(
        &self,
        ctx: &RequestContext,
        param: &GetMetricsParam,
    ) -> Result<GetMetricsResult, RepoError> {
        let storage = self.storage.trace_storage(param.workspace_id, &param.tenants);
        let dao = self.span_dao(&storage)?;
        let tables = self.resolver().resolve_query_tables(ctx, &param.tenants)?;
        if tables.span_tables.is_empty() {
            warn!(tenants = ?param.tenants, "no span tables configured for metrics query");
        }

        ctx.check()?;
        let st = Instant::now();
        let data = dao
            .get_metrics(
                ctx,
                &MetricsQuery {
                    tables: tables.span_tables,
                    aggregations: param.aggregations.clone(),
                    group_bys: param.group_bys.clone(),
                    filters: param.filters.clone(),
                    start_time: millis_to_micros(param.start_at),
                    end_time: millis_to_micros(param.end_at),
                    granularity: param.granularity,
                    extra: storage.config.clone(),
                },
            )
            .map_err(|e| RepoError::upstream("get metrics", e))?;
        info!(
            rows = data.len(),
            cost_ms = st.elapsed().as_millis() as u64,
            "get metrics successfully"
        );
        Ok(GetMetricsResult { data })
    }
}

fn list_plan<'a>(req: &'a ListSpansParam, tables: &'a QueryTables, storage: &'a Storage) -> ScanPlan<'a> {
    ScanPlan {
        kind: QueryKind::ListSpans,
        tables,
        storage,
        start_time: millis_to_micros(req.start_at),
        end_time: millis_to_micros(req.end_at),
        order_desc: req.desc_by_start_time,
        select_columns: &req.select_columns,
        omit_columns: &req.omit_columns,
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
