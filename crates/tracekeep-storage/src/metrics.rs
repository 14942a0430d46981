//! Aggregation of span rows into metric series.

use std::collections::BTreeMap;

use serde_json::{Number, Value};
use tracekeep_core::dao::MetricsQuery;
use tracekeep_core::metrics::{AggregateFn, Aggregation, MetricRow};
use tracekeep_core::span::Span;

use crate::eval::field_value;

pub(crate) const TIME_BUCKET: &str = "time_bucket";

#[derive(Debug, Default, Clone)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&self, function: AggregateFn) -> Value {
        let float = |v: f64| Number::from_f64(v).map_or(Value::Null, Value::Number);
        match function {
            AggregateFn::Count => Value::from(self.count),
            AggregateFn::Sum => float(self.sum),
            AggregateFn::Avg if self.count == 0 => Value::Null,
            AggregateFn::Avg => float(self.sum / self.count as f64),
            AggregateFn::Min => self.min.map_or(Value::Null, float),
            AggregateFn::Max => self.max.map_or(Value::Null, float),
        }
    }
}

type GroupKey = (Option<i64>, Vec<String>);

/// Folds `rows` into one output row per (time bucket, group-by values),
/// ordered by bucket then by group values.
pub(crate) fn aggregate(rows: &[Span], query: &MetricsQuery) -> Vec<MetricRow> {
    let bucket_width = query.granularity.map(|g| g.bucket_micros());
    let mut groups: BTreeMap<GroupKey, Vec<Accumulator>> = BTreeMap::new();

    for span in rows {
        let bucket = bucket_width.map(|w| span.start_time.div_euclid(w) * w);
        let values = query
            .group_bys
            .iter()
            .map(|g| field_value(span, &g.field).map(|v| v.render()).unwrap_or_default())
            .collect();
        let accs = groups
            .entry((bucket, values))
            .or_insert_with(|| vec![Accumulator::default(); query.aggregations.len()]);
        for (acc, aggregation) in accs.iter_mut().zip(&query.aggregations) {
            observe(acc, aggregation, span);
        }
    }

    groups
        .into_iter()
        .map(|((bucket, values), accs)| {
            let mut row = MetricRow::new();
            if let Some(start) = bucket {
                row.insert(TIME_BUCKET.to_string(), Value::from(start / 1_000));
            }
            for (group, value) in query.group_bys.iter().zip(values) {
                row.insert(group.alias.clone(), Value::String(value));
            }
            for (aggregation, acc) in query.aggregations.iter().zip(&accs) {
                row.insert(aggregation.alias.clone(), acc.finish(aggregation.function));
            }
            row
        })
        .collect()
}

fn observe(acc: &mut Accumulator, aggregation: &Aggregation, span: &Span) {
    let field = aggregation.field.as_deref();
    match (aggregation.function, field) {
        (AggregateFn::Count, None) => acc.observe(0.0),
        (_, None) => {}
        (function, Some(name)) => {
            let Some(value) = field_value(span, name) else {
                return;
            };
            if function == AggregateFn::Count {
                acc.observe(0.0);
            } else if let Some(v) = value.as_f64() {
                acc.observe(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracekeep_core::metrics::{Granularity, GroupBy};

    use super::*;

    const MINUTE: i64 = 60_000_000;

    fn span(id: &str, start: i64, span_type: &str, duration: i64) -> Span {
        Span {
            trace_id: "t".into(),
            span_id: id.into(),
            start_time: start,
            span_type: span_type.into(),
            duration,
            ..Default::default()
        }
    }

    fn agg(function: AggregateFn, field: Option<&str>, alias: &str) -> Aggregation {
        Aggregation {
            function,
            field: field.map(str::to_string),
            alias: alias.into(),
        }
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let rows = vec![
            span("a", 0, "llm", 100),
            span("b", 1, "llm", 300),
            span("c", 2, "tool", 50),
        ];
        let query = MetricsQuery {
            aggregations: vec![
                agg(AggregateFn::Count, None, "n"),
                agg(AggregateFn::Avg, Some("duration"), "avg_duration"),
                agg(AggregateFn::Max, Some("duration"), "max_duration"),
            ],
            group_bys: vec![GroupBy {
                field: "span_type".into(),
                alias: "type".into(),
            }],
            ..Default::default()
        };
        let out = aggregate(&rows, &query);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["type"], "llm");
        assert_eq!(out[0]["n"], 2);
        assert_eq!(out[0]["avg_duration"], 200.0);
        assert_eq!(out[0]["max_duration"], 300.0);
        assert_eq!(out[1]["type"], "tool");
        assert_eq!(out[1]["n"], 1);
        assert!(!out[0].contains_key(TIME_BUCKET));
    }

    #[test]
    fn test_time_buckets() {
        let rows = vec![
            span("a", 10, "llm", 1),
            span("b", MINUTE + 5, "llm", 1),
            span("c", MINUTE + 6, "llm", 1),
        ];
        let query = MetricsQuery {
            aggregations: vec![agg(AggregateFn::Sum, Some("duration"), "total")],
            granularity: Some(Granularity::OneMinute),
            ..Default::default()
        };
        let out = aggregate(&rows, &query);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][TIME_BUCKET], 0);
        assert_eq!(out[1][TIME_BUCKET], MINUTE / 1_000);
        assert_eq!(out[1]["total"], 2.0);
    }

    #[test]
    fn test_missing_field_yields_null() {
        let rows = vec![span("a", 0, "llm", 1)];
        let query = MetricsQuery {
            aggregations: vec![
                agg(AggregateFn::Min, Some("tokens"), "min_tokens"),
                agg(AggregateFn::Count, Some("tokens"), "with_tokens"),
            ],
            ..Default::default()
        };
        let out = aggregate(&rows, &query);
        assert_eq!(out[0]["min_tokens"], Value::Null);
        assert_eq!(out[0]["with_tokens"], 0);
    }
}
