//! Metrics query engine.
//!
//! Turns a declarative filter request into a single parameterized read over
//! the metrics store. Validation happens before any I/O; the only strings
//! ever interpolated into query text are tag keys that passed the
//! `[A-Za-z0-9_.-]{1,64}` check, and every value travels as a bound
//! parameter.

mod builder;
mod executor;

pub use builder::{BindValue, QueryPlan, build};
pub use executor::{MetricRow, QueryEcho, QueryResponse, execute, group_by_device};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;
pub const MAX_TAG_FILTERS: usize = 10;
pub const MAX_TAG_KEY_LEN: usize = 64;
/// Deadline for a single query execution. Exceeding it aborts only that
/// query, never unrelated concurrent ones.
pub const QUERY_DEADLINE: Duration = Duration::from_secs(30);

/// Filter request over stored metric samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub device_ids: Vec<Uuid>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metric_groups: Vec<String>,
    #[serde(default)]
    pub tag_filters: Vec<TagFilter>,
    /// Row limit; non-positive values take the default of 100.
    #[serde(default)]
    pub limit: i64,
    /// When set, keep only the most recent row per (device, metric group).
    #[serde(default)]
    pub latest: bool,
}

/// One predicate over the per-sample tag map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    /// Operator name as received on the wire: eq, in, like, exists,
    /// gt, lt, gte, lte.
    pub op: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Supported tag filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Eq,
    In,
    Like,
    Exists,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl TagOp {
    pub fn parse(op: &str) -> Option<TagOp> {
        match op {
            "eq" => Some(TagOp::Eq),
            "in" => Some(TagOp::In),
            "like" => Some(TagOp::Like),
            "exists" => Some(TagOp::Exists),
            "gt" => Some(TagOp::Gt),
            "lt" => Some(TagOp::Lt),
            "gte" => Some(TagOp::Gte),
            "lte" => Some(TagOp::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagOp::Eq => "eq",
            TagOp::In => "in",
            TagOp::Like => "like",
            TagOp::Exists => "exists",
            TagOp::Gt => "gt",
            TagOp::Lt => "lt",
            TagOp::Gte => "gte",
            TagOp::Lte => "lte",
        }
    }
}

impl fmt::Display for TagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query failure. Validation errors reject before any I/O; storage and data
/// errors surface from execution and are never auto-retried.
#[derive(Debug)]
pub enum QueryError {
    NoDevices,
    MissingTimeRange,
    InvalidTimeRange,
    LimitExceeded(i64),
    TooManyTagFilters(usize),
    InvalidTagKey { index: usize, key: String },
    UnsupportedOperator { index: usize, op: String },
    BadOperatorArity { index: usize, op: TagOp, got: usize },
    Storage(sqlx::Error),
    Timeout,
    Data(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::NoDevices => write!(f, "at least one device_id is required"),
            QueryError::MissingTimeRange => write!(f, "start and end times are required"),
            QueryError::InvalidTimeRange => write!(f, "end time must not precede start time"),
            QueryError::LimitExceeded(limit) => {
                write!(f, "limit {} exceeds maximum of {}", limit, MAX_LIMIT)
            }
            QueryError::TooManyTagFilters(n) => {
                write!(f, "{} tag filters exceed maximum of {}", n, MAX_TAG_FILTERS)
            }
            QueryError::InvalidTagKey { index, key } => write!(
                f,
                "invalid tag key '{}' at filter {}: alphanumeric, underscore, dash and dot only, max {} chars",
                key, index, MAX_TAG_KEY_LEN
            ),
            QueryError::UnsupportedOperator { index, op } => {
                write!(f, "unsupported operator '{}' at filter {}", op, index)
            }
            QueryError::BadOperatorArity { index, op, got } => {
                write!(f, "operator '{}' at filter {} got {} values", op, index, got)
            }
            QueryError::Storage(e) => write!(f, "query execution failed: {}", e),
            QueryError::Timeout => {
                write!(f, "query exceeded {}s deadline", QUERY_DEADLINE.as_secs())
            }
            QueryError::Data(reason) => write!(f, "malformed stored payload: {}", reason),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

/// Tag keys are the sole string interpolated into query text; this check is
/// the injection defense for them.
fn is_valid_tag_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_TAG_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
}

impl MetricsQuery {
    /// Validates the request and normalizes the limit. Rejects before any
    /// I/O with the offending field in the error.
    pub fn validate(&mut self) -> Result<(), QueryError> {
        if self.device_ids.is_empty() {
            return Err(QueryError::NoDevices);
        }

        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(QueryError::MissingTimeRange);
        };
        if end < start {
            return Err(QueryError::InvalidTimeRange);
        }

        if self.limit <= 0 {
            self.limit = DEFAULT_LIMIT;
        }
        if self.limit > MAX_LIMIT {
            return Err(QueryError::LimitExceeded(self.limit));
        }

        if self.tag_filters.len() > MAX_TAG_FILTERS {
            return Err(QueryError::TooManyTagFilters(self.tag_filters.len()));
        }

        for (index, filter) in self.tag_filters.iter().enumerate() {
            if !is_valid_tag_key(&filter.key) {
                return Err(QueryError::InvalidTagKey {
                    index,
                    key: filter.key.clone(),
                });
            }
            let Some(op) = TagOp::parse(&filter.op) else {
                return Err(QueryError::UnsupportedOperator {
                    index,
                    op: filter.op.clone(),
                });
            };
            let arity_ok = match op {
                TagOp::Eq | TagOp::Like | TagOp::Gt | TagOp::Lt | TagOp::Gte | TagOp::Lte => {
                    filter.values.len() == 1
                }
                TagOp::In => !filter.values.is_empty(),
                TagOp::Exists => filter.values.is_empty(),
            };
            if !arity_ok {
                return Err(QueryError::BadOperatorArity {
                    index,
                    op,
                    got: filter.values.len(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_query() -> MetricsQuery {
        MetricsQuery {
            device_ids: vec![Uuid::new_v4()],
            start: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            end: Some(Utc.timestamp_opt(1_700_003_600, 0).unwrap()),
            metric_groups: Vec::new(),
            tag_filters: Vec::new(),
            limit: 0,
            latest: false,
        }
    }

    fn filter(key: &str, op: &str, values: &[&str]) -> TagFilter {
        TagFilter {
            key: key.to_string(),
            op: op.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn empty_device_ids_rejected() {
        let mut q = base_query();
        q.device_ids.clear();
        assert!(matches!(q.validate(), Err(QueryError::NoDevices)));
    }

    #[test]
    fn missing_time_range_rejected() {
        let mut q = base_query();
        q.end = None;
        assert!(matches!(q.validate(), Err(QueryError::MissingTimeRange)));
    }

    #[test]
    fn end_before_start_rejected() {
        let mut q = base_query();
        std::mem::swap(&mut q.start, &mut q.end);
        assert!(matches!(q.validate(), Err(QueryError::InvalidTimeRange)));
    }

    #[test]
    fn equal_start_and_end_accepted() {
        let mut q = base_query();
        q.end = q.start;
        assert!(q.validate().is_ok());
    }

    #[test]
    fn zero_limit_defaults_to_100() {
        let mut q = base_query();
        q.limit = 0;
        q.validate().unwrap();
        assert_eq!(q.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn limit_over_maximum_rejected() {
        let mut q = base_query();
        q.limit = 1001;
        assert!(matches!(q.validate(), Err(QueryError::LimitExceeded(1001))));
    }

    #[test]
    fn too_many_tag_filters_rejected() {
        let mut q = base_query();
        q.tag_filters = (0..11).map(|i| filter(&format!("k{}", i), "exists", &[])).collect();
        assert!(matches!(q.validate(), Err(QueryError::TooManyTagFilters(11))));
    }

    #[test]
    fn invalid_tag_key_rejected() {
        let mut q = base_query();
        q.tag_filters = vec![filter("bad key!", "eq", &["x"])];
        assert!(matches!(
            q.validate(),
            Err(QueryError::InvalidTagKey { index: 0, .. })
        ));

        let mut q = base_query();
        q.tag_filters = vec![filter(&"a".repeat(65), "eq", &["x"])];
        assert!(matches!(q.validate(), Err(QueryError::InvalidTagKey { .. })));
    }

    #[test]
    fn eq_arity_enforced() {
        for values in [&[] as &[&str], &["a", "b"]] {
            let mut q = base_query();
            q.tag_filters = vec![filter("core", "eq", values)];
            assert!(matches!(
                q.validate(),
                Err(QueryError::BadOperatorArity { op: TagOp::Eq, .. })
            ));
        }

        let mut q = base_query();
        q.tag_filters = vec![filter("core", "eq", &["0"])];
        assert!(q.validate().is_ok());
    }

    #[test]
    fn in_requires_at_least_one_value() {
        let mut q = base_query();
        q.tag_filters = vec![filter("iface", "in", &[])];
        assert!(matches!(
            q.validate(),
            Err(QueryError::BadOperatorArity { op: TagOp::In, .. })
        ));
    }

    #[test]
    fn exists_requires_no_values() {
        let mut q = base_query();
        q.tag_filters = vec![filter("iface", "exists", &["x"])];
        assert!(matches!(
            q.validate(),
            Err(QueryError::BadOperatorArity { op: TagOp::Exists, .. })
        ));
    }

    #[test]
    fn unsupported_operator_rejected() {
        let mut q = base_query();
        q.tag_filters = vec![filter("iface", "regex", &["eth.*"])];
        assert!(matches!(
            q.validate(),
            Err(QueryError::UnsupportedOperator { index: 0, .. })
        ));
    }
}
