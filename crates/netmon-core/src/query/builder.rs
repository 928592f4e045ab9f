//! Deterministic construction of the parameterized metrics read.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::query::{MetricsQuery, QueryError, TagOp};

/// A value bound to one `$n` placeholder, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Uuids(Vec<Uuid>),
    Timestamp(DateTime<Utc>),
    Strings(Vec<String>),
    Str(String),
    Int(i64),
}

/// A built read: one SQL statement plus its bound parameters, alongside the
/// normalized request it was derived from.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<BindValue>,
    pub normalized: MetricsQuery,
}

const SELECT_COLUMNS: &str =
    "timestamp, metric_group, device_id, tags, val_used, val_total, extra_data";

/// Validates the request and builds the single parameterized read.
///
/// Conditions are AND-combined. Only tag keys that passed validation are
/// interpolated into the statement text; every value is a bound parameter.
pub fn build(query: &MetricsQuery) -> Result<QueryPlan, QueryError> {
    let mut query = query.clone();
    query.validate()?;
    let start = query.start.ok_or(QueryError::MissingTimeRange)?;
    let end = query.end.ok_or(QueryError::MissingTimeRange)?;

    let mut params: Vec<BindValue> = Vec::new();
    let mut conditions: Vec<String> = Vec::new();

    params.push(BindValue::Uuids(query.device_ids.clone()));
    conditions.push(format!("device_id = ANY(${})", params.len()));

    params.push(BindValue::Timestamp(start));
    conditions.push(format!("timestamp >= ${}", params.len()));
    params.push(BindValue::Timestamp(end));
    conditions.push(format!("timestamp <= ${}", params.len()));

    if !query.metric_groups.is_empty() {
        params.push(BindValue::Strings(query.metric_groups.clone()));
        conditions.push(format!("metric_group = ANY(${})", params.len()));
    }

    for (index, filter) in query.tag_filters.iter().enumerate() {
        // Validation already checked the operators; this guards plan reuse
        // with a hand-built request.
        let Some(op) = TagOp::parse(&filter.op) else {
            return Err(QueryError::UnsupportedOperator {
                index,
                op: filter.op.clone(),
            });
        };
        let condition = match op {
            TagOp::Eq => {
                params.push(BindValue::Str(filter.values[0].clone()));
                format!("tags->>'{}' = ${}", filter.key, params.len())
            }
            TagOp::In => {
                params.push(BindValue::Strings(filter.values.clone()));
                format!("tags->>'{}' = ANY(${})", filter.key, params.len())
            }
            TagOp::Like => {
                params.push(BindValue::Str(filter.values[0].clone()));
                format!("tags->>'{}' LIKE ${}", filter.key, params.len())
            }
            TagOp::Exists => format!("tags ? '{}'", filter.key),
            TagOp::Gt | TagOp::Lt | TagOp::Gte | TagOp::Lte => {
                let operator = match op {
                    TagOp::Gt => ">",
                    TagOp::Lt => "<",
                    TagOp::Gte => ">=",
                    _ => "<=",
                };
                params.push(BindValue::Str(filter.values[0].clone()));
                format!(
                    "(tags->>'{}')::numeric {} ${}::numeric",
                    filter.key,
                    operator,
                    params.len()
                )
            }
        };
        conditions.push(condition);
    }

    let select = if query.latest {
        format!(
            "SELECT DISTINCT ON (device_id, metric_group) {} FROM metrics",
            SELECT_COLUMNS
        )
    } else {
        format!("SELECT {} FROM metrics", SELECT_COLUMNS)
    };

    let order_by = if query.latest {
        "ORDER BY device_id, metric_group, timestamp DESC"
    } else {
        "ORDER BY timestamp DESC"
    };

    params.push(BindValue::Int(query.limit));
    let sql = format!(
        "{} WHERE {} {} LIMIT ${}",
        select,
        conditions.join(" AND "),
        order_by,
        params.len()
    );

    Ok(QueryPlan {
        sql,
        params,
        normalized: query,
    })
}
