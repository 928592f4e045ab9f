//! Shared data model for the telemetry core.
//!
//! A `MetricSample` is the central entity of the platform: one timestamped
//! observation for a device/metric-group/tag combination. Samples are created
//! by pollers, consumed at most once by the ingestion pipeline, and never
//! mutated after creation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered tag map attached to a sample, e.g. `{"core": "0", "iface": "eth0"}`.
pub type TagMap = BTreeMap<String, TagValue>;

/// Scalar tag value.
///
/// Tags are a closed set of scalar kinds. Nested structures are rejected at
/// the ingress boundary and never reach the query layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => write!(f, "{}", s),
            TagValue::Num(n) => write!(f, "{}", n),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One timestamped metric observation for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Metric group name, e.g. `host.cpu`, `host.memory`.
    pub metric_group: String,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_total: Option<f64>,
}

impl MetricSample {
    /// Checks the sample invariants enforced at the intake boundary.
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.device_id.is_nil() {
            return Err(SampleError::NilDeviceId);
        }
        if self.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            return Err(SampleError::ZeroTimestamp);
        }
        if self.metric_group.is_empty() {
            return Err(SampleError::EmptyMetricGroup);
        }
        Ok(())
    }
}

/// Sample invariant violation, reported with the offending field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    NilDeviceId,
    ZeroTimestamp,
    EmptyMetricGroup,
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::NilDeviceId => write!(f, "device_id must be set"),
            SampleError::ZeroTimestamp => write!(f, "timestamp must be non-zero"),
            SampleError::EmptyMetricGroup => write!(f, "metric_group must be non-empty"),
        }
    }
}

impl std::error::Error for SampleError {}

/// Stored tag payload that does not fit the scalar tag model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPayloadError {
    NotAnObject,
    UnsupportedValue { key: String },
}

impl fmt::Display for TagPayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagPayloadError::NotAnObject => write!(f, "tag payload is not a JSON object"),
            TagPayloadError::UnsupportedValue { key } => {
                write!(f, "tag '{}' carries a non-scalar value", key)
            }
        }
    }
}

impl std::error::Error for TagPayloadError {}

/// Converts a stored JSON tag payload into a `TagMap`.
///
/// Null, array and object values are rejected: a malformed stored payload is
/// a data error for the caller, never silently skipped.
pub fn tag_map_from_json(value: serde_json::Value) -> Result<TagMap, TagPayloadError> {
    let serde_json::Value::Object(entries) = value else {
        return Err(TagPayloadError::NotAnObject);
    };

    let mut tags = TagMap::new();
    for (key, value) in entries {
        let tag = match value {
            serde_json::Value::String(s) => TagValue::Str(s),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => TagValue::Num(f),
                None => return Err(TagPayloadError::UnsupportedValue { key }),
            },
            serde_json::Value::Bool(b) => TagValue::Bool(b),
            _ => return Err(TagPayloadError::UnsupportedValue { key }),
        };
        tags.insert(key, tag);
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> MetricSample {
        MetricSample {
            device_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            metric_group: "host.cpu".to_string(),
            tags: TagMap::new(),
            val_used: Some(42.0),
            val_total: Some(100.0),
        }
    }

    #[test]
    fn valid_sample_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn nil_device_id_rejected() {
        let mut s = sample();
        s.device_id = Uuid::nil();
        assert_eq!(s.validate(), Err(SampleError::NilDeviceId));
    }

    #[test]
    fn zero_timestamp_rejected() {
        let mut s = sample();
        s.timestamp = DateTime::UNIX_EPOCH;
        assert_eq!(s.validate(), Err(SampleError::ZeroTimestamp));
    }

    #[test]
    fn empty_metric_group_rejected() {
        let mut s = sample();
        s.metric_group.clear();
        assert_eq!(s.validate(), Err(SampleError::EmptyMetricGroup));
    }

    #[test]
    fn tag_map_accepts_scalars() {
        let tags = tag_map_from_json(json!({"iface": "eth0", "core": 2, "up": true})).unwrap();
        assert_eq!(tags.get("iface"), Some(&TagValue::Str("eth0".to_string())));
        assert_eq!(tags.get("core"), Some(&TagValue::Num(2.0)));
        assert_eq!(tags.get("up"), Some(&TagValue::Bool(true)));
    }

    #[test]
    fn tag_map_rejects_nested_values() {
        let err = tag_map_from_json(json!({"mounts": ["/", "/var"]})).unwrap_err();
        assert_eq!(
            err,
            TagPayloadError::UnsupportedValue {
                key: "mounts".to_string()
            }
        );
    }

    #[test]
    fn tag_map_rejects_non_object_payload() {
        assert_eq!(
            tag_map_from_json(json!([1, 2, 3])),
            Err(TagPayloadError::NotAnObject)
        );
    }

    #[test]
    fn tag_values_roundtrip_through_json() {
        let mut tags = TagMap::new();
        tags.insert("iface".to_string(), TagValue::Str("eth0".to_string()));
        tags.insert("speed".to_string(), TagValue::Num(1000.0));
        tags.insert("up".to_string(), TagValue::Bool(false));

        let encoded = serde_json::to_string(&tags).unwrap();
        let decoded: TagMap = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, tags);
    }
}
