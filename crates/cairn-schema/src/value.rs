use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a scalar field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::UInt => write!(f, "uint"),
            Self::Float => write!(f, "float"),
            Self::Str => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

/// A scalar field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int(_) => ScalarType::Int,
            Self::UInt(_) => ScalarType::UInt,
            Self::Float(_) => ScalarType::Float,
            Self::Str(_) => ScalarType::Str,
            Self::Bytes(_) => ScalarType::Bytes,
        }
    }

    /// The zero value returned for unset scalar fields.
    pub fn default_for(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Bool => Self::Bool(false),
            ScalarType::Int => Self::Int(0),
            ScalarType::UInt => Self::UInt(0),
            ScalarType::Float => Self::Float(0.0),
            ScalarType::Str => Self::Str(String::new()),
            ScalarType::Bytes => Self::Bytes(Vec::new()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_the_matching_variant() {
        assert_eq!(Value::from(5i32), Value::Int(5));
        assert_eq!(Value::from(5u64), Value::UInt(5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).scalar_type(), ScalarType::Bool);
    }

    #[test]
    fn accessors_reject_other_variants() {
        assert_eq!(Value::Int(1).as_str(), None);
        assert_eq!(Value::Str("1".into()).as_int(), None);
    }

    #[test]
    fn defaults_match_their_type() {
        for ty in [
            ScalarType::Bool,
            ScalarType::Int,
            ScalarType::UInt,
            ScalarType::Float,
            ScalarType::Str,
            ScalarType::Bytes,
        ] {
            assert_eq!(Value::default_for(ty).scalar_type(), ty);
        }
    }
}
