//! Query execution: runs the built plan against the store, decodes rows and
//! groups them per device.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::{TagMap, tag_map_from_json};
use crate::query::{BindValue, MetricsQuery, QUERY_DEADLINE, QueryError, build};

/// One decoded metric result row.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub timestamp: DateTime<Utc>,
    pub metric_group: String,
    pub device_id: Uuid,
    pub tags: TagMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
}

/// The normalized request echoed back with the results.
#[derive(Debug, Clone, Serialize)]
pub struct QueryEcho {
    pub device_ids: Vec<Uuid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric_groups: Vec<String>,
    pub limit: i64,
    pub latest: bool,
}

/// Per-device grouped query results.
///
/// Every requested device id is present as a key, with an empty list when
/// it matched nothing or does not exist — callers never distinguish "no
/// data" from "unknown device" by absence.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub data: HashMap<String, Vec<MetricRow>>,
    pub count: usize,
    pub query: QueryEcho,
}

/// Validates, builds and runs the query under the execution deadline, then
/// decodes and groups the rows per device.
pub async fn execute(pool: &PgPool, query: MetricsQuery) -> Result<QueryResponse, QueryError> {
    let plan = build(&query)?;

    let mut prepared = sqlx::query(&plan.sql);
    for param in &plan.params {
        prepared = match param {
            BindValue::Uuids(v) => prepared.bind(v),
            BindValue::Timestamp(t) => prepared.bind(*t),
            BindValue::Strings(v) => prepared.bind(v),
            BindValue::Str(s) => prepared.bind(s),
            BindValue::Int(n) => prepared.bind(*n),
        };
    }

    let rows = tokio::time::timeout(QUERY_DEADLINE, prepared.fetch_all(pool))
        .await
        .map_err(|_| QueryError::Timeout)?
        .map_err(QueryError::Storage)?;

    let mut decoded = Vec::with_capacity(rows.len());
    for row in &rows {
        decoded.push(decode_row(row)?);
    }

    let normalized = plan.normalized;
    let count = decoded.len();
    let data = group_by_device(&normalized.device_ids, decoded);

    // Both were checked by validation inside `build`.
    let start = normalized.start.ok_or(QueryError::MissingTimeRange)?;
    let end = normalized.end.ok_or(QueryError::MissingTimeRange)?;

    Ok(QueryResponse {
        data,
        count,
        query: QueryEcho {
            device_ids: normalized.device_ids,
            start,
            end,
            metric_groups: normalized.metric_groups,
            limit: normalized.limit,
            latest: normalized.latest,
        },
    })
}

fn decode_row(row: &PgRow) -> Result<MetricRow, QueryError> {
    let tags_json: serde_json::Value = row.try_get("tags").map_err(decode_error)?;
    let tags = tag_map_from_json(tags_json).map_err(|e| QueryError::Data(e.to_string()))?;

    Ok(MetricRow {
        timestamp: row.try_get("timestamp").map_err(decode_error)?,
        metric_group: row.try_get("metric_group").map_err(decode_error)?,
        device_id: row.try_get("device_id").map_err(decode_error)?,
        tags,
        val_used: row.try_get("val_used").map_err(decode_error)?,
        val_total: row.try_get("val_total").map_err(decode_error)?,
        extra_data: row.try_get("extra_data").map_err(decode_error)?,
    })
}

fn decode_error(e: sqlx::Error) -> QueryError {
    match e {
        sqlx::Error::ColumnDecode { .. } => QueryError::Data(e.to_string()),
        other => QueryError::Storage(other),
    }
}

/// Groups rows by device id, seeding every requested id with an empty list.
pub fn group_by_device(
    device_ids: &[Uuid],
    rows: Vec<MetricRow>,
) -> HashMap<String, Vec<MetricRow>> {
    let mut grouped: HashMap<String, Vec<MetricRow>> = HashMap::with_capacity(device_ids.len());
    for id in device_ids {
        grouped.entry(id.to_string()).or_default();
    }
    for row in rows {
        grouped.entry(row.device_id.to_string()).or_default().push(row);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row_for(device_id: Uuid, seq: i64) -> MetricRow {
        MetricRow {
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            metric_group: "host.cpu".to_string(),
            device_id,
            tags: TagMap::new(),
            val_used: Some(seq as f64),
            val_total: None,
            extra_data: None,
        }
    }

    #[test]
    fn every_requested_device_appears_even_without_rows() {
        let device_a = Uuid::new_v4();
        let device_b = Uuid::new_v4();
        let rows = vec![row_for(device_a, 1), row_for(device_a, 2)];

        let grouped = group_by_device(&[device_a, device_b], rows);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&device_a.to_string()].len(), 2);
        assert_eq!(grouped[&device_b.to_string()].len(), 0);
    }

    #[test]
    fn rows_for_unrequested_devices_are_still_grouped() {
        // The store only returns rows matching the device filter, but the
        // grouping itself never loses data it was handed.
        let requested = Uuid::new_v4();
        let stray = Uuid::new_v4();
        let grouped = group_by_device(&[requested], vec![row_for(stray, 1)]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&stray.to_string()].len(), 1);
    }
}
