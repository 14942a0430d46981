use std::collections::HashMap;
use std::sync::RwLock;

use tracekeep_core::annotation::Annotation;
use tracekeep_core::context::RequestContext;
use tracekeep_core::dao::{
    AnnotationDao, GetAnnotationQuery, ListAnnotationsQuery, MetricsQuery, QueryParam, SpansDao,
};
use tracekeep_core::error::StorageError;
use tracekeep_core::metrics::MetricRow;
use tracekeep_core::span::Span;
use tracing::debug;

use crate::eval::{accept, finish_query, matches, references_annotations};
use crate::metrics::aggregate;
use crate::{select_annotations, sort_annotations};

/// Append-only in-process tables. Nothing survives the process.
#[derive(Default)]
pub struct MemoryTraceStore {
    spans: RwLock<HashMap<String, Vec<Span>>>,
    annotations: RwLock<HashMap<String, Vec<Annotation>>>,
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Read("memory store lock poisoned".into())
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn annotations_of(&self, table: Option<&String>) -> Result<Vec<Annotation>, StorageError> {
        let Some(table) = table else {
            return Ok(Vec::new());
        };
        let guard = self.annotations.read().map_err(poisoned)?;
        Ok(guard.get(table).cloned().unwrap_or_default())
    }
}

impl SpansDao for MemoryTraceStore {
    fn insert(&self, ctx: &RequestContext, table: &str, spans: &[Span]) -> Result<(), StorageError> {
        ctx.check()?;
        let mut guard = self
            .spans
            .write()
            .map_err(|_| StorageError::Write("memory store lock poisoned".into()))?;
        guard.entry(table.to_string()).or_default().extend_from_slice(spans);
        Ok(())
    }

    fn get(&self, ctx: &RequestContext, param: &QueryParam) -> Result<Vec<Span>, StorageError> {
        ctx.check()?;
        let join = references_annotations(param.filters.as_ref());
        let mut rows = Vec::new();
        for table in &param.tables {
            let annotations = if join {
                self.annotations_of(param.anno_table_map.get(table))?
            } else {
                Vec::new()
            };
            let guard = self.spans.read().map_err(poisoned)?;
            let Some(stored) = guard.get(table) else {
                continue;
            };
            for span in stored {
                if let Some(span) = accept(span.clone(), param, &annotations)? {
                    rows.push(span);
                }
            }
            ctx.check()?;
        }
        debug!(tables = ?param.tables, matched = rows.len(), "memory span scan");
        Ok(finish_query(rows, param))
    }

    fn get_metrics(
        &self,
        ctx: &RequestContext,
        param: &MetricsQuery,
    ) -> Result<Vec<MetricRow>, StorageError> {
        ctx.check()?;
        let guard = self.spans.read().map_err(poisoned)?;
        let mut rows = Vec::new();
        for table in &param.tables {
            for span in guard.get(table).into_iter().flatten() {
                if span.start_time < param.start_time || span.start_time > param.end_time {
                    continue;
                }
                let keep = match &param.filters {
                    Some(filter) => matches(span, filter)?,
                    None => true,
                };
                if keep {
                    rows.push(span.clone());
                }
            }
        }
        Ok(aggregate(&rows, param))
    }
}

impl AnnotationDao for MemoryTraceStore {
    fn insert(
        &self,
        ctx: &RequestContext,
        table: &str,
        annotations: &[Annotation],
    ) -> Result<(), StorageError> {
        ctx.check()?;
        let mut guard = self
            .annotations
            .write()
            .map_err(|_| StorageError::Write("memory store lock poisoned".into()))?;
        guard
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(annotations);
        Ok(())
    }

    fn list(
        &self,
        ctx: &RequestContext,
        param: &ListAnnotationsQuery,
    ) -> Result<Vec<Annotation>, StorageError> {
        ctx.check()?;
        let guard = self.annotations.read().map_err(poisoned)?;
        let candidates = param
            .tables
            .iter()
            .filter_map(|t| guard.get(t))
            .flatten()
            .cloned();
        let mut rows = select_annotations(candidates, param);
        sort_annotations(&mut rows, param);
        Ok(rows)
    }

    fn get(
        &self,
        ctx: &RequestContext,
        param: &GetAnnotationQuery,
    ) -> Result<Option<Annotation>, StorageError> {
        ctx.check()?;
        let guard = self.annotations.read().map_err(poisoned)?;
        Ok(param
            .tables
            .iter()
            .filter_map(|t| guard.get(t))
            .flatten()
            .find(|a| {
                a.id == param.id
                    && !a.is_deleted
                    && a.start_time >= param.start_time
                    && a.start_time <= param.end_time
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use tracekeep_core::annotation::AnnotationValue;
    use tracekeep_core::dao::QueryKind;
    use tracekeep_core::filter::{FieldType, FilterField, FilterFields, QueryType};

    use super::*;

    fn span(trace: &str, id: &str, start: i64) -> Span {
        Span {
            trace_id: trace.into(),
            span_id: id.into(),
            start_time: start,
            ..Default::default()
        }
    }

    fn query(tables: &[&str]) -> QueryParam {
        QueryParam {
            kind: QueryKind::ListSpans,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            start_time: 0,
            end_time: i64::MAX,
            order_by_start_time: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_merges_tables_in_key_order() {
        let store = MemoryTraceStore::new();
        let ctx = RequestContext::new();
        SpansDao::insert(&store, &ctx, "a", &[span("t", "s1", 10), span("t", "s3", 30)]).unwrap();
        SpansDao::insert(&store, &ctx, "b", &[span("t", "s2", 20), span("t", "s0", 30)]).unwrap();

        let rows = SpansDao::get(&store, &ctx, &query(&["a", "b"])).unwrap();
        let ids: Vec<_> = rows.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, ["s3", "s0", "s2", "s1"]);

        let mut asc = query(&["a", "b", "missing"]);
        asc.order_by_start_time = false;
        asc.limit = Some(2);
        let rows = SpansDao::get(&store, &ctx, &asc).unwrap();
        let ids: Vec<_> = rows.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2"]);
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let store = MemoryTraceStore::new();
        let ctx = RequestContext::new();
        let rows: Vec<_> = (0..5).map(|i| span("t", &format!("s{i}"), i * 10)).collect();
        SpansDao::insert(&store, &ctx, "a", &rows).unwrap();
        let mut q = query(&["a"]);
        q.start_time = 10;
        q.end_time = 30;
        assert_eq!(SpansDao::get(&store, &ctx, &q).unwrap().len(), 3);
    }

    #[test]
    fn test_annotation_filter_uses_mapped_table() {
        let store = MemoryTraceStore::new();
        let ctx = RequestContext::new();
        SpansDao::insert(&store, &ctx, "spans", &[span("t", "s1", 1), span("t", "s2", 2)]).unwrap();
        let anno = Annotation {
            id: "a1".into(),
            span_id: "s2".into(),
            key: "verdict".into(),
            value: AnnotationValue::String("good".into()),
            ..Default::default()
        };
        AnnotationDao::insert(&store, &ctx, "annos", &[anno]).unwrap();

        let mut q = query(&["spans"]);
        q.anno_table_map.insert("spans".into(), "annos".into());
        q.filters = Some(FilterFields::and(vec![FilterField::leaf(
            "annotation.verdict",
            FieldType::String,
            QueryType::Eq,
            ["good"],
        )]));
        let rows = SpansDao::get(&store, &ctx, &q).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].span_id, "s2");
        assert!(rows[0].annotations.is_empty());
    }

    #[test]
    fn test_cancelled_context_interrupts() {
        let store = MemoryTraceStore::new();
        let ctx = RequestContext::new();
        ctx.cancel();
        let err = SpansDao::get(&store, &ctx, &query(&["a"])).unwrap_err();
        assert!(matches!(err, StorageError::Interrupted(_)));
    }

    #[test]
    fn test_annotation_list_and_get() {
        let store = MemoryTraceStore::new();
        let ctx = RequestContext::new();
        let annos: Vec<_> = (0..3)
            .map(|i| Annotation {
                id: format!("a{i}"),
                span_id: if i == 2 { "other".into() } else { "s1".into() },
                start_time: 100,
                updated_at: i,
                ..Default::default()
            })
            .collect();
        AnnotationDao::insert(&store, &ctx, "annos", &annos).unwrap();

        let listed = AnnotationDao::list(
            &store,
            &ctx,
            &ListAnnotationsQuery {
                tables: vec!["annos".into()],
                span_ids: vec!["s1".into()],
                start_time: 0,
                end_time: 1_000,
                desc_by_updated_at: true,
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a1", "a0"]);

        let got = AnnotationDao::get(
            &store,
            &ctx,
            &GetAnnotationQuery {
                tables: vec!["annos".into()],
                id: "a2".into(),
                start_time: 0,
                end_time: 1_000,
                limit: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(got.unwrap().span_id, "other");
    }
}
