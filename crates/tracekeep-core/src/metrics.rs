use serde::{Deserialize, Serialize};

/// One output row of a metrics query: group-by aliases, an optional
/// `time_bucket` (milliseconds) and aggregation aliases.
pub type MetricRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFn,
    /// Column the function reads. `count` ignores it.
    #[serde(default)]
    pub field: Option<String>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBy {
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "1week")]
    OneWeek,
}

impl Granularity {
    /// Bucket width in microseconds. Weekly series are bucketed by day.
    pub fn bucket_micros(&self) -> i64 {
        const MINUTE: i64 = 60 * 1_000_000;
        match self {
            Self::OneMinute => MINUTE,
            Self::OneHour => 60 * MINUTE,
            Self::OneDay | Self::OneWeek => 24 * 60 * MINUTE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_buckets_by_day() {
        assert_eq!(Granularity::OneWeek.bucket_micros(), Granularity::OneDay.bucket_micros());
        assert_eq!(Granularity::OneMinute.bucket_micros(), 60_000_000);
        let g: Granularity = serde_json::from_str("\"1hour\"").unwrap();
        assert_eq!(g, Granularity::OneHour);
    }
}
