use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Tags are the indexed dimensions of a Point, ordered by key.
pub type Tags = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PointError {
    #[error("point is missing a measurement name")]
    MeasurementRequired,
    #[error("point {0:?} has no fields")]
    FieldsRequired(String),
    #[error("point {measurement:?} field {field:?} has an unsupported non-finite value ({value})")]
    NonFiniteField {
        measurement: String,
        field: String,
        value: f64,
    },
    #[error("point {0:?} has an empty tag key or value")]
    EmptyTag(String),
    #[error("point {0:?} has an empty field key")]
    EmptyFieldKey(String),
}

/// FieldValue is one sampled value of a Point.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}
impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}
impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// Point is a single timestamped measurement sample:
/// a measurement name, indexed tags, one or more fields, and a timestamp.
///
/// Points are validated on construction and are immutable thereafter, so a
/// held Point is always writable to storage.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Point {
    measurement: String,
    tags: Tags,
    fields: BTreeMap<String, FieldValue>,
    time: DateTime<Utc>,
}

impl Point {
    /// Build a Point, validating the measurement, tags, and fields.
    ///
    /// Non-finite float fields (NaN, ±Inf) are rejected: they have no
    /// representation in storage and must be dropped at the edge.
    pub fn new(
        measurement: impl Into<String>,
        tags: Tags,
        fields: BTreeMap<String, FieldValue>,
        time: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        let measurement = measurement.into();

        if measurement.is_empty() {
            return Err(PointError::MeasurementRequired);
        }
        if fields.is_empty() {
            return Err(PointError::FieldsRequired(measurement));
        }
        for (key, value) in &tags {
            if key.is_empty() || value.is_empty() {
                return Err(PointError::EmptyTag(measurement));
            }
        }
        for (key, value) in &fields {
            if key.is_empty() {
                return Err(PointError::EmptyFieldKey(measurement));
            }
            if let FieldValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(PointError::NonFiniteField {
                        measurement,
                        field: key.clone(),
                        value: *f,
                    });
                }
            }
        }

        Ok(Self {
            measurement,
            tags,
            fields,
            time,
        })
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_414_141_414, 0).unwrap()
    }

    #[test]
    fn test_point_construction() {
        let tags = Tags::from([("host".to_string(), "h1".to_string())]);
        let fields = BTreeMap::from([("value".to_string(), FieldValue::Float(42.5))]);

        let point = Point::new("cpu_user", tags.clone(), fields.clone(), ts()).unwrap();
        insta::assert_json_snapshot!(point, @r###"
        {
          "measurement": "cpu_user",
          "tags": {
            "host": "h1"
          },
          "fields": {
            "value": 42.5
          },
          "time": "2014-10-24T09:03:34Z"
        }
        "###);

        // Missing measurement and missing fields are both rejected.
        assert_eq!(
            Point::new("", tags.clone(), fields.clone(), ts()),
            Err(PointError::MeasurementRequired),
        );
        assert_eq!(
            Point::new("cpu_user", tags.clone(), BTreeMap::new(), ts()),
            Err(PointError::FieldsRequired("cpu_user".to_string())),
        );
    }

    #[test]
    fn test_non_finite_fields_are_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let fields = BTreeMap::from([("value".to_string(), FieldValue::Float(bad))]);
            let err = Point::new("df_free", Tags::new(), fields, ts()).unwrap_err();
            assert!(matches!(err, PointError::NonFiniteField { .. }), "{err}");
        }
    }

    #[test]
    fn test_empty_tags_are_rejected() {
        let fields = BTreeMap::from([("value".to_string(), FieldValue::Float(1.0))]);
        let tags = Tags::from([("host".to_string(), "".to_string())]);
        assert_eq!(
            Point::new("m", tags, fields, ts()),
            Err(PointError::EmptyTag("m".to_string())),
        );
    }
}
