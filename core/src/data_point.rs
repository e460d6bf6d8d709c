use crate::{
    Error,
    Result,
};
use chrono::prelude::*;
use serde::Serialize;
use std::fmt;

/// The numeric value of a [`DataPoint`]. Serialized as a bare JSON number.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Integer(value.into())
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Integer(value.into())
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(value.into())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(value) => write!(f, "{value}"),
            MetricValue::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Metric names are the only identity the ingestion side has, they must not be empty.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    Ok(())
}

/// A single named observation. Immutable once created.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DataPoint {
    name: String,
    value: MetricValue,
    /// Whole seconds since the unix epoch.
    collected_at: i64,
    #[serde(skip_serializing_if = "is_blank")]
    instance: Option<String>,
}

impl DataPoint {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        collected_at: DateTime<Utc>,
        instance: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        // JSON has no representation for NaN or infinities.
        let value = value.into();
        if let MetricValue::Float(float) = value {
            if !float.is_finite() {
                return Err(Error::NonFiniteValue(float));
            }
        }

        Ok(Self {
            name,
            value,
            collected_at: collected_at.timestamp(),
            instance,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// Collection time in epoch seconds.
    pub fn collected_at(&self) -> i64 {
        self.collected_at
    }

    /// The instance tag, `None` if absent or blank.
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref().filter(|instance| !instance.trim().is_empty())
    }
}

fn is_blank(instance: &Option<String>) -> bool {
    instance.as_deref().map_or(true, |instance| instance.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jan_2nd_2012() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = DataPoint::new("", 123, Utc::now(), None).unwrap_err();
        assert!(matches!(err, Error::EmptyName));
    }

    #[test]
    fn serializes_all_fields() {
        let point = DataPoint::new("foo", 1923, jan_2nd_2012(), Some("i-349da92".to_string())).unwrap();

        let value = serde_json::to_value(&point).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "foo",
                "value": 1923,
                "collected_at": 1_325_462_400i64,
                "instance": "i-349da92",
            })
        );
    }

    #[test]
    fn blank_instance_is_omitted() {
        for instance in [None, Some(String::new()), Some("  ".to_string())] {
            let point = DataPoint::new("foo", 1, jan_2nd_2012(), instance).unwrap();
            assert_eq!(point.instance(), None);

            let value = serde_json::to_value(&point).unwrap();
            assert!(value.get("instance").is_none(), "unexpected instance in {value}");
        }
    }

    #[test]
    fn float_values_stay_floats() {
        let point = DataPoint::new("latency", 12.5, jan_2nd_2012(), None).unwrap();
        assert_eq!(point.value(), MetricValue::Float(12.5));

        let value = serde_json::to_value(&point).unwrap();
        assert_eq!(value["value"], json!(12.5));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = DataPoint::new("foo", value, jan_2nd_2012(), None).unwrap_err();
            assert!(matches!(err, Error::NonFiniteValue(_)));
        }
    }

    #[test]
    fn collected_at_truncates_to_seconds() {
        let collected_at = jan_2nd_2012() + chrono::Duration::milliseconds(999);
        let point = DataPoint::new("foo", 1, collected_at, None).unwrap();
        assert_eq!(point.collected_at(), 1_325_462_400);
    }
}
