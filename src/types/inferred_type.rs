//! This module defines the type lattice used while inferring a schema from
//! heterogeneous JSON values, and its mapping onto Arrow data types.

use std::fmt;

use arrow::datatypes::{DataType as ArrowDataType, Field};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field metadata key marking a `Utf8` column whose values are JSON text.
pub const ENCODING_METADATA_KEY: &str = "jsontable.encoding";
/// Value of `ENCODING_METADATA_KEY` for JSON-encoded columns.
pub const JSON_ENCODING: &str = "json";

/// The type observed for a field across all sampled values.
///
/// Merging forms a small lattice: `Null` is the bottom, `Integer` widens to
/// `Float`, and any other disagreement collapses to `Variant`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferredType {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    /// An object or array value.
    Nested,
    /// Values of incompatible kinds were observed.
    Variant,
}

impl InferredType {
    /// Classifies a single parsed value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) => {
                if n.is_i64() {
                    Self::Integer
                } else if n.as_f64().is_some() {
                    // u64 beyond i64::MAX lands here too.
                    Self::Float
                } else {
                    // Outside the f64 range; only the JSON text survives.
                    Self::Variant
                }
            }
            Value::String(_) => Self::String,
            Value::Array(_) | Value::Object(_) => Self::Nested,
        }
    }

    /// Returns the most specific type that covers both `self` and `other`.
    pub fn merge(self, other: Self) -> Self {
        use InferredType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null, t) | (t, Null) => t,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Variant,
        }
    }

    /// Returns `true` if columns of this type store the JSON text of each value.
    pub fn is_json_encoded(&self) -> bool {
        matches!(self, Self::Nested | Self::Variant)
    }

    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Boolean => ArrowDataType::Boolean,
            Self::Integer => ArrowDataType::Int64,
            Self::Float => ArrowDataType::Float64,
            Self::Null | Self::String | Self::Nested | Self::Variant => ArrowDataType::Utf8,
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Arrow types a column may be declared as, either by inference or by a type hint.
pub fn is_supported_arrow_type(data_type: &ArrowDataType) -> bool {
    matches!(
        data_type,
        ArrowDataType::Boolean
            | ArrowDataType::Int8
            | ArrowDataType::Int16
            | ArrowDataType::Int32
            | ArrowDataType::Int64
            | ArrowDataType::UInt8
            | ArrowDataType::UInt16
            | ArrowDataType::UInt32
            | ArrowDataType::UInt64
            | ArrowDataType::Float32
            | ArrowDataType::Float64
            | ArrowDataType::Utf8
            | ArrowDataType::LargeUtf8
    )
}

/// Returns `true` if `field` carries the JSON-encoding marker.
pub fn is_json_encoded_field(field: &Field) -> bool {
    field
        .metadata()
        .get(ENCODING_METADATA_KEY)
        .is_some_and(|v| v == JSON_ENCODING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_of_value() {
        assert_eq!(InferredType::of_value(&json!(1)), InferredType::Integer);
        assert_eq!(InferredType::of_value(&json!(-1)), InferredType::Integer);
        assert_eq!(InferredType::of_value(&json!(1.5)), InferredType::Float);
        assert_eq!(InferredType::of_value(&json!(u64::MAX)), InferredType::Float);
        let huge: Value = serde_json::from_str("1e400").unwrap();
        assert_eq!(InferredType::of_value(&huge), InferredType::Variant);
        assert_eq!(InferredType::of_value(&json!({"a": 1})), InferredType::Nested);
        assert_eq!(InferredType::of_value(&json!(null)), InferredType::Null);
    }

    #[test]
    fn test_merge_lattice() {
        use InferredType::*;
        assert_eq!(Null.merge(Integer), Integer);
        assert_eq!(String.merge(Null), String);
        assert_eq!(Integer.merge(Float), Float);
        assert_eq!(Float.merge(Integer), Float);
        assert_eq!(Integer.merge(String), Variant);
        assert_eq!(Nested.merge(Nested), Nested);
        assert_eq!(Variant.merge(Null), Variant);
        assert_eq!(Boolean.merge(Integer), Variant);
    }

    #[test]
    fn test_arrow_mapping() {
        assert_eq!(InferredType::Integer.to_arrow_type(), ArrowDataType::Int64);
        assert_eq!(InferredType::Null.to_arrow_type(), ArrowDataType::Utf8);
        assert!(InferredType::Variant.is_json_encoded());
        assert!(!InferredType::String.is_json_encoded());
        assert!(is_supported_arrow_type(&ArrowDataType::UInt16));
        assert!(!is_supported_arrow_type(&ArrowDataType::Date32));
    }
}
