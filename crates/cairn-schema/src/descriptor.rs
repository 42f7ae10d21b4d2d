use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builtin;
use crate::error::{SchemaError, SchemaResult};
use crate::tag::TypeTag;
use crate::value::{ScalarType, Value};

/// Shape of a declared field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar(ScalarType),
    RepeatedScalar(ScalarType),
    Composite(TypeTag),
    RepeatedComposite(TypeTag),
}

impl FieldKind {
    /// The record type of a composite field (single or repeated).
    pub fn composite_tag(&self) -> Option<&TypeTag> {
        match self {
            Self::Composite(tag) | Self::RepeatedComposite(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_repeated(&self) -> bool {
        matches!(self, Self::RepeatedScalar(_) | Self::RepeatedComposite(_))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => write!(f, "{ty}"),
            Self::RepeatedScalar(ty) => write!(f, "repeated {ty}"),
            Self::Composite(tag) => write!(f, "{tag}"),
            Self::RepeatedComposite(tag) => write!(f, "repeated {tag}"),
        }
    }
}

/// One declared field of a record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Required fields must be set for the record to count as initialized.
    pub required: bool,
}

impl FieldDescriptor {
    /// Returns `true` if this is a single or repeated link field.
    pub fn is_link(&self) -> bool {
        self.kind
            .composite_tag()
            .is_some_and(|tag| *tag == builtin::link::tag())
    }

    /// Check that `value` can be stored in this (scalar or repeated scalar) field.
    pub fn check_value(&self, value: &Value) -> SchemaResult<()> {
        let expected = match &self.kind {
            FieldKind::Scalar(ty) | FieldKind::RepeatedScalar(ty) => *ty,
            other => return Err(self.mismatch(other.to_string(), value.scalar_type())),
        };
        if value.scalar_type() != expected {
            return Err(self.mismatch(expected.to_string(), value.scalar_type()));
        }
        // JSON cannot encode NaN or infinity.
        if let Value::Float(v) = value {
            if !v.is_finite() {
                return Err(SchemaError::TypeMismatch {
                    field: self.name.clone(),
                    expected: "finite float".into(),
                    actual: v.to_string(),
                });
            }
        }
        Ok(())
    }

    fn mismatch(&self, expected: String, actual: ScalarType) -> SchemaError {
        SchemaError::TypeMismatch {
            field: self.name.clone(),
            expected,
            actual: actual.to_string(),
        }
    }
}

/// Reflection table for one record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub tag: TypeTag,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            fields: Vec::new(),
        }
    }

    /// Look up a declared field by name.
    pub fn field(&self, name: &str) -> SchemaResult<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| SchemaError::UnknownField {
                tag: self.tag.clone(),
                field: name.to_string(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind, required: bool) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    pub fn scalar(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.with_field(name, FieldKind::Scalar(ty), false)
    }

    pub fn required_scalar(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.with_field(name, FieldKind::Scalar(ty), true)
    }

    pub fn repeated_scalar(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.with_field(name, FieldKind::RepeatedScalar(ty), false)
    }

    pub fn composite(self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.with_field(name, FieldKind::Composite(tag), false)
    }

    pub fn repeated_composite(self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.with_field(name, FieldKind::RepeatedComposite(tag), false)
    }

    /// A single link to another object.
    pub fn link(self, name: impl Into<String>) -> Self {
        self.composite(name, builtin::link::tag())
    }

    /// A repeated field of links.
    pub fn repeated_link(self, name: impl Into<String>) -> Self {
        self.repeated_composite(name, builtin::link::tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> MessageDescriptor {
        MessageDescriptor::new(TypeTag::new("test", "Person"))
            .required_scalar("name", ScalarType::Str)
            .scalar("id", ScalarType::Int)
            .repeated_scalar("tags", ScalarType::Str)
            .link("manager")
            .repeated_link("reports")
    }

    #[test]
    fn field_lookup() {
        let desc = person();
        assert!(desc.field("name").unwrap().required);
        assert!(desc.has_field("tags"));
        assert!(matches!(
            desc.field("missing"),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn link_fields_are_recognized() {
        let desc = person();
        assert!(desc.field("manager").unwrap().is_link());
        assert!(desc.field("reports").unwrap().is_link());
        assert!(!desc.field("name").unwrap().is_link());
    }

    #[test]
    fn check_value_enforces_scalar_type() {
        let desc = person();
        assert!(desc.field("id").unwrap().check_value(&Value::Int(3)).is_ok());
        assert!(desc.field("tags").unwrap().check_value(&"x".into()).is_ok());
        let err = desc.field("id").unwrap().check_value(&"three".into()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::TypeMismatch {
                field: "id".into(),
                expected: "int".into(),
                actual: "string".into(),
            }
        );
    }

    #[test]
    fn check_value_rejects_non_finite_floats() {
        let field = FieldDescriptor {
            name: "weight".into(),
            kind: FieldKind::Scalar(ScalarType::Float),
            required: false,
        };
        assert!(field.check_value(&Value::Float(1.5)).is_ok());
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                field.check_value(&Value::Float(v)),
                Err(SchemaError::TypeMismatch { .. })
            ));
        }
    }

    #[test]
    fn check_value_rejects_composite_fields() {
        let desc = person();
        let err = desc.field("manager").unwrap().check_value(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn kind_display() {
        assert_eq!(FieldKind::RepeatedScalar(ScalarType::Int).to_string(), "repeated int");
        assert_eq!(
            FieldKind::Composite(TypeTag::new("a", "B")).to_string(),
            "a.B"
        );
    }
}
