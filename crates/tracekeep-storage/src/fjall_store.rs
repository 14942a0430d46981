use std::ops::Bound;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
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

/// Rows scanned between cancellation checks.
const CHECK_EVERY: usize = 1024;

/// Embedded store with one fjall partition per table.
///
/// Span partitions are keyed `{start_time (8B, order-preserving)}{trace_id}\0{span_id}`
/// so a time window is a single range scan. Annotation partitions are keyed
/// by annotation id; re-inserting an id replaces the row.
pub struct FjallTraceStore {
    keyspace: Keyspace,
}

impl FjallTraceStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let keyspace = Config::new(path)
            .open()
            .map_err(|e| StorageError::Open(e.to_string()))?;
        Ok(Self { keyspace })
    }

    fn partition(&self, table: &str) -> Result<PartitionHandle, StorageError> {
        check_table_name(table)?;
        self.keyspace
            .open_partition(table, PartitionCreateOptions::default())
            .map_err(|e| StorageError::Open(e.to_string()))
    }

    /// Reads never create tables.
    fn existing(&self, table: &str) -> Result<Option<PartitionHandle>, StorageError> {
        check_table_name(table)?;
        if !self.keyspace.partition_exists(table) {
            return Ok(None);
        }
        self.partition(table).map(Some)
    }

    fn scan_spans(
        &self,
        ctx: &RequestContext,
        table: &str,
        start_time: i64,
        end_time: i64,
        mut visit: impl FnMut(Span) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        if start_time > end_time {
            return Ok(());
        }
        let Some(partition) = self.existing(table)? else {
            return Ok(());
        };
        let lower = Bound::Included(encode_time(start_time).to_vec());
        let upper = match end_time.checked_add(1) {
            Some(next) => Bound::Excluded(encode_time(next).to_vec()),
            None => Bound::Unbounded,
        };
        for (i, entry) in partition.range((lower, upper)).enumerate() {
            if i % CHECK_EVERY == 0 {
                ctx.check()?;
            }
            let (_key, value) = entry.map_err(|e| StorageError::Read(e.to_string()))?;
            visit(decode(&value)?)?;
        }
        Ok(())
    }

    fn scan_annotations(&self, table: &str) -> Result<Vec<Annotation>, StorageError> {
        let Some(partition) = self.existing(table)? else {
            return Ok(Vec::new());
        };
        partition
            .iter()
            .map(|entry| {
                let (_key, value) = entry.map_err(|e| StorageError::Read(e.to_string()))?;
                decode(&value)
            })
            .collect()
    }

    pub fn persist(&self) -> Result<(), StorageError> {
        self.keyspace
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| StorageError::Write(e.to_string()))
    }
}

fn check_table_name(table: &str) -> Result<(), StorageError> {
    let valid = !table.is_empty()
        && table.len() <= 255
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '#' | '$'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidQuery(format!("invalid table name {table:?}")))
    }
}

/// Big-endian with the sign bit flipped, so byte order equals numeric order.
fn encode_time(micros: i64) -> [u8; 8] {
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn span_key(span: &Span) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + span.trace_id.len() + span.span_id.len());
    key.extend_from_slice(&encode_time(span.start_time));
    key.extend_from_slice(span.trace_id.as_bytes());
    key.push(0);
    key.extend_from_slice(span.span_id.as_bytes());
    key
}

fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(row).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl SpansDao for FjallTraceStore {
    fn insert(&self, ctx: &RequestContext, table: &str, spans: &[Span]) -> Result<(), StorageError> {
        ctx.check()?;
        let partition = self.partition(table)?;
        let mut batch = self.keyspace.batch();
        for span in spans {
            batch.insert(&partition, span_key(span), encode(span)?);
        }
        batch
            .commit()
            .map_err(|e| StorageError::Write(e.to_string()))?;
        debug!(table, rows = spans.len(), "spans written");
        Ok(())
    }

    fn get(&self, ctx: &RequestContext, param: &QueryParam) -> Result<Vec<Span>, StorageError> {
        ctx.check()?;
        let join = references_annotations(param.filters.as_ref());
        let mut rows = Vec::new();
        for table in &param.tables {
            let annotations = match param.anno_table_map.get(table) {
                Some(anno_table) if join => self.scan_annotations(anno_table)?,
                _ => Vec::new(),
            };
            self.scan_spans(ctx, table, param.start_time, param.end_time, |span| {
                if let Some(span) = accept(span, param, &annotations)? {
                    rows.push(span);
                }
                Ok(())
            })?;
        }
        debug!(tables = ?param.tables, matched = rows.len(), "fjall span scan");
        Ok(finish_query(rows, param))
    }

    fn get_metrics(
        &self,
        ctx: &RequestContext,
        param: &MetricsQuery,
    ) -> Result<Vec<MetricRow>, StorageError> {
        ctx.check()?;
        let mut rows = Vec::new();
        for table in &param.tables {
            self.scan_spans(ctx, table, param.start_time, param.end_time, |span| {
                let keep = match &param.filters {
                    Some(filter) => matches(&span, filter)?,
                    None => true,
                };
                if keep {
                    rows.push(span);
                }
                Ok(())
            })?;
        }
        Ok(aggregate(&rows, param))
    }
}

impl AnnotationDao for FjallTraceStore {
    fn insert(
        &self,
        ctx: &RequestContext,
        table: &str,
        annotations: &[Annotation],
    ) -> Result<(), StorageError> {
        ctx.check()?;
        let partition = self.partition(table)?;
        let mut batch = self.keyspace.batch();
        for annotation in annotations {
            batch.insert(&partition, annotation.id.as_bytes(), encode(annotation)?);
        }
        batch
            .commit()
            .map_err(|e| StorageError::Write(e.to_string()))?;
        Ok(())
    }

    fn list(
        &self,
        ctx: &RequestContext,
        param: &ListAnnotationsQuery,
    ) -> Result<Vec<Annotation>, StorageError> {
        ctx.check()?;
        let mut candidates = Vec::new();
        for table in &param.tables {
            candidates.extend(self.scan_annotations(table)?);
            ctx.check()?;
        }
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
        for table in &param.tables {
            let Some(partition) = self.existing(table)? else {
                continue;
            };
            let Some(value) = partition
                .get(param.id.as_bytes())
                .map_err(|e| StorageError::Read(e.to_string()))?
            else {
                continue;
            };
            let annotation: Annotation = decode(&value)?;
            if !annotation.is_deleted
                && annotation.start_time >= param.start_time
                && annotation.start_time <= param.end_time
            {
                return Ok(Some(annotation));
            }
        }
        Ok(None)
    }
}
