//! Scalar field types.
//!
//! A [`ScalarType`] converts one leaf value between its three forms and
//! validates it. The engine ships the common types; applications plug in
//! their own (emails, URLs, ...) by implementing the trait.

use std::fmt;

use bson::oid::ObjectId;
use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::error::{ConversionError, ValidationError};
use crate::value::Value;

/// Conversion and validation of a single scalar field.
///
/// Inbound conversion accepts the database form and the primitive form
/// (already lifted into BSON), so one method serves both directions.
pub trait ScalarType: fmt::Debug + Send + Sync {
    /// Type name used in error messages and schema signatures.
    fn name(&self) -> &str;

    /// Convert a database or primitive value to native form.
    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError>;

    /// Convert a native value to database form.
    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError>;

    /// Convert a native value to a JSON-safe primitive.
    fn to_primitive(&self, value: &Value) -> JsonValue;

    /// Check a native value against the type's constraints.
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let _ = value;
        Ok(())
    }
}

fn mismatch(expected: &str, value: &Value) -> ConversionError {
    ConversionError::new(format!(
        "expected {}, got {}",
        expected,
        value.type_name()
    ))
}

/// UTF-8 string with optional length bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringType {
    /// Minimum length in characters.
    pub min_length: Option<usize>,
    /// Maximum length in characters.
    pub max_length: Option<usize>,
}

impl StringType {
    /// Create an unbounded string type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum length.
    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Set the minimum length.
    pub fn with_min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }
}

impl ScalarType for StringType {
    fn name(&self) -> &str {
        "string"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        match raw {
            Bson::String(s) => Ok(Value::String(s.clone())),
            Bson::Int32(i) => Ok(Value::String(i.to_string())),
            Bson::Int64(i) => Ok(Value::String(i.to_string())),
            Bson::Double(f) => Ok(Value::String(f.to_string())),
            Bson::ObjectId(id) => Ok(Value::String(id.to_hex())),
            _ => Err(ConversionError::new("Couldn't interpret value as string.")),
        }
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        match value {
            Value::String(s) => Ok(Bson::String(s.clone())),
            other => Err(mismatch("string", other)),
        }
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        match value {
            Value::String(s) => JsonValue::String(s.clone()),
            _ => JsonValue::Null,
        }
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let s = match value {
            Value::String(s) => s,
            other => {
                return Err(ValidationError::new(
                    "",
                    format!("expected string, got {}", other.type_name()),
                ))
            }
        };
        let len = s.chars().count();
        if let Some(max) = self.max_length {
            if len > max {
                return Err(ValidationError::new(
                    "",
                    format!("String value is too long (max {}).", max),
                ));
            }
        }
        if let Some(min) = self.min_length {
            if len < min {
                return Err(ValidationError::new(
                    "",
                    format!("String value is too short (min {}).", min),
                ));
            }
        }
        Ok(())
    }
}

/// 64-bit integer with optional bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntType {
    /// Smallest accepted value.
    pub min_value: Option<i64>,
    /// Largest accepted value.
    pub max_value: Option<i64>,
}

impl IntType {
    /// Create an unbounded integer type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accepted range.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }
}

impl ScalarType for IntType {
    fn name(&self) -> &str {
        "int"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        match raw {
            Bson::Int32(i) => Ok(Value::Int(i64::from(*i))),
            Bson::Int64(i) => Ok(Value::Int(*i)),
            Bson::Double(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Ok(Value::Int(*f as i64))
            }
            Bson::Double(f) if f.fract() == 0.0 => {
                Err(ConversionError::new(format!("Value {} is out of int range", f)))
            }
            Bson::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ConversionError::new("Value is not int")),
            _ => Err(ConversionError::new("Value is not int")),
        }
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        match value {
            Value::Int(i) => Ok(Bson::Int64(*i)),
            other => Err(mismatch("int", other)),
        }
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        match value {
            Value::Int(i) => JsonValue::from(*i),
            _ => JsonValue::Null,
        }
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let i = value
            .as_i64()
            .ok_or_else(|| ValidationError::new("", "Value is not int"))?;
        if let Some(min) = self.min_value {
            if i < min {
                return Err(ValidationError::new(
                    "",
                    format!("Int value should be greater than or equal to {}.", min),
                ));
            }
        }
        if let Some(max) = self.max_value {
            if i > max {
                return Err(ValidationError::new(
                    "",
                    format!("Int value should be less than or equal to {}.", max),
                ));
            }
        }
        Ok(())
    }
}

/// 64-bit float.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatType;

impl ScalarType for FloatType {
    fn name(&self) -> &str {
        "float"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        match raw {
            Bson::Double(f) => Ok(Value::Float(*f)),
            Bson::Int32(i) => Ok(Value::Float(f64::from(*i))),
            Bson::Int64(i) => Ok(Value::Float(*i as f64)),
            Bson::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ConversionError::new("Value is not float")),
            _ => Err(ConversionError::new("Value is not float")),
        }
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        value
            .as_f64()
            .map(Bson::Double)
            .ok_or_else(|| mismatch("float", value))
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        value.as_f64().map(JsonValue::from).unwrap_or(JsonValue::Null)
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value.as_f64() {
            Some(f) if f.is_finite() => Ok(()),
            Some(_) => Err(ValidationError::new("", "Float value is not finite")),
            None => Err(ValidationError::new("", "Value is not float")),
        }
    }
}

/// Boolean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoolType;

impl ScalarType for BoolType {
    fn name(&self) -> &str {
        "bool"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        match raw {
            Bson::Boolean(b) => Ok(Value::Bool(*b)),
            Bson::Int32(0) | Bson::Int64(0) => Ok(Value::Bool(false)),
            Bson::Int32(1) | Bson::Int64(1) => Ok(Value::Bool(true)),
            Bson::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(ConversionError::new("Must be either true or false.")),
            },
            _ => Err(ConversionError::new("Must be either true or false.")),
        }
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        value
            .as_bool()
            .map(Bson::Boolean)
            .ok_or_else(|| mismatch("bool", value))
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        value.as_bool().map(JsonValue::Bool).unwrap_or(JsonValue::Null)
    }
}

/// UTC timestamp, stored as a database datetime with millisecond precision.
///
/// The primitive form is RFC 3339 text. Inbound text without an offset is
/// read as UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTimeType;

impl DateTimeType {
    fn parse(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

impl ScalarType for DateTimeType {
    fn name(&self) -> &str {
        "datetime"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        match raw {
            Bson::DateTime(dt) => Utc
                .timestamp_millis_opt(dt.timestamp_millis())
                .single()
                .map(Value::DateTime)
                .ok_or_else(|| ConversionError::new("datetime out of range")),
            Bson::String(s) => Self::parse(s)
                .map(|dt| Value::DateTime(dt.trunc_subsecs(3)))
                .ok_or_else(|| {
                    ConversionError::new(format!("Could not parse {}. Should be ISO8601.", s))
                }),
            _ => Err(ConversionError::new("Could not parse datetime. Should be ISO8601.")),
        }
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        value
            .as_datetime()
            .map(|dt| Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis())))
            .ok_or_else(|| mismatch("datetime", value))
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        value
            .as_datetime()
            .map(|dt| JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or(JsonValue::Null)
    }
}

/// Database key stored as a native object id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectIdType;

impl ObjectIdType {
    /// Coerce a database or primitive value to an object id.
    pub fn coerce(raw: &Bson) -> Result<ObjectId, ConversionError> {
        match raw {
            Bson::ObjectId(id) => Ok(*id),
            Bson::String(s) => ObjectId::parse_str(s.trim()).map_err(|_| {
                ConversionError::new(format!("Couldn't interpret value {:?} as ObjectId.", s))
            }),
            other => Err(ConversionError::new(format!(
                "Couldn't interpret value {} as ObjectId.",
                other
            ))),
        }
    }
}

impl ScalarType for ObjectIdType {
    fn name(&self) -> &str {
        "object_id"
    }

    fn to_native(&self, raw: &Bson) -> Result<Value, ConversionError> {
        Self::coerce(raw).map(Value::ObjectId)
    }

    fn to_database(&self, value: &Value) -> Result<Bson, ConversionError> {
        value
            .as_object_id()
            .map(Bson::ObjectId)
            .ok_or_else(|| mismatch("object id", value))
    }

    fn to_primitive(&self, value: &Value) -> JsonValue {
        value
            .as_object_id()
            .map(|id| JsonValue::String(id.to_hex()))
            .unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_type() {
        let t = StringType::new().with_max_length(3);
        assert_eq!(t.to_native(&Bson::Int32(5)).unwrap(), Value::from("5"));
        assert!(t.to_native(&Bson::Boolean(true)).is_err());
        assert!(t.validate(&Value::from("abcd")).is_err());
        assert!(t.validate(&Value::from("abc")).is_ok());
    }

    #[test]
    fn test_int_type() {
        let t = IntType::new().with_range(0, 150);
        assert_eq!(t.to_native(&Bson::String("42".into())).unwrap(), Value::Int(42));
        assert_eq!(t.to_native(&Bson::Double(3.0)).unwrap(), Value::Int(3));
        assert!(t.to_native(&Bson::Double(3.5)).is_err());
        assert!(t.to_native(&Bson::Double(1e19)).is_err());
        assert!(t.to_native(&Bson::Double(-1e19)).is_err());
        assert!(t.to_native(&Bson::Double(i64::MAX as f64)).is_err());
        assert_eq!(
            t.to_native(&Bson::Double(i64::MIN as f64)).unwrap(),
            Value::Int(i64::MIN)
        );
        assert!(t.to_native(&Bson::String("4x".into())).is_err());
        assert!(t.validate(&Value::Int(200)).is_err());
        assert_eq!(t.to_database(&Value::Int(7)).unwrap(), Bson::Int64(7));
        assert!(t.to_database(&Value::from("7")).is_err());
    }

    #[test]
    fn test_bool_and_float() {
        assert_eq!(BoolType.to_native(&Bson::String("True".into())).unwrap(), Value::Bool(true));
        assert_eq!(FloatType.to_native(&Bson::Int32(2)).unwrap(), Value::Float(2.0));
        assert!(FloatType.validate(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_datetime_forms() {
        let dt = Utc.with_ymd_and_hms(2013, 5, 6, 7, 8, 9).unwrap();
        let value = Value::DateTime(dt);

        let primitive = DateTimeType.to_primitive(&value);
        assert_eq!(primitive, JsonValue::String("2013-05-06T07:08:09.000Z".into()));

        let stored = DateTimeType.to_database(&value).unwrap();
        assert_eq!(DateTimeType.to_native(&stored).unwrap(), value);

        let naive = Bson::String("2013-05-06T07:08:09".into());
        assert_eq!(DateTimeType.to_native(&naive).unwrap(), value);
        assert!(DateTimeType.to_native(&Bson::String("yesterday".into())).is_err());

        let precise = Bson::String("2013-05-06T07:08:09.123456Z".into());
        let parsed = DateTimeType.to_native(&precise).unwrap();
        assert_eq!(parsed.as_datetime().map(|dt| dt.timestamp_subsec_micros()), Some(123_000));
    }

    #[test]
    fn test_object_id_type() {
        let id = ObjectId::new();
        let raw = Bson::String(id.to_hex());
        assert_eq!(ObjectIdType.to_native(&raw).unwrap(), Value::ObjectId(id));
        assert!(ObjectIdType::coerce(&Bson::String("nope".into())).is_err());
        assert_eq!(
            ObjectIdType.to_primitive(&Value::ObjectId(id)),
            JsonValue::String(id.to_hex())
        );
    }
}
