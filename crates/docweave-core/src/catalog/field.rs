//! Field declarations.

use std::fmt;
use std::sync::Arc;

use super::relation::DeleteRule;
use super::types::{BoolType, DateTimeType, FloatType, IntType, ObjectIdType, ScalarType, StringType};
use crate::record::Record;
use crate::value::Value;

/// The record class a nested or referenced field points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClassTarget {
    /// The class being declared. Replaced by its key at registration.
    SelfClass,
    /// A registry key.
    Key(String),
}

impl ClassTarget {
    /// The registry key, once resolved.
    pub fn key(&self) -> Option<&str> {
        match self {
            ClassTarget::SelfClass => None,
            ClassTarget::Key(key) => Some(key),
        }
    }
}

impl From<&str> for ClassTarget {
    fn from(key: &str) -> Self {
        ClassTarget::Key(key.to_string())
    }
}

impl From<String> for ClassTarget {
    fn from(key: String) -> Self {
        ClassTarget::Key(key)
    }
}

/// Shape of a field's value.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// A leaf value handled by a scalar type.
    Scalar(Arc<dyn ScalarType>),
    /// A nested record stored as a sub-document.
    Embedded(ClassTarget),
    /// A key of a record of one class.
    Reference(ClassTarget),
    /// A key of a record of any registered class, stored with its class key.
    GenericReference,
    /// A list of values of the inner kind.
    List(Box<FieldKind>),
    /// A string-keyed map of values of the inner kind.
    Dict(Box<FieldKind>),
    /// Any value; embedded records are tagged with their class key.
    Dynamic,
}

impl FieldKind {
    /// Target of a typed reference, directly or as list elements.
    pub fn reference_target(&self) -> Option<&ClassTarget> {
        match self {
            FieldKind::Reference(target) => Some(target),
            FieldKind::List(inner) => match inner.as_ref() {
                FieldKind::Reference(target) => Some(target),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the field holds references, typed or generic, directly or in a list.
    pub fn is_reference(&self) -> bool {
        match self {
            FieldKind::Reference(_) | FieldKind::GenericReference => true,
            FieldKind::List(inner) => matches!(
                inner.as_ref(),
                FieldKind::Reference(_) | FieldKind::GenericReference
            ),
            _ => false,
        }
    }

    /// Whether the field is list-valued.
    pub fn is_list(&self) -> bool {
        matches!(self, FieldKind::List(_))
    }

    /// Replace self-class placeholders with `key`.
    pub(crate) fn resolve_self(&mut self, key: &str) {
        match self {
            FieldKind::Embedded(target) | FieldKind::Reference(target) => {
                if *target == ClassTarget::SelfClass {
                    *target = ClassTarget::Key(key.to_string());
                }
            }
            FieldKind::List(inner) | FieldKind::Dict(inner) => inner.resolve_self(key),
            FieldKind::Scalar(_) | FieldKind::GenericReference | FieldKind::Dynamic => {}
        }
    }

    /// Structural description used to compare registrations.
    pub(crate) fn describe(&self) -> String {
        match self {
            FieldKind::Scalar(t) => format!("{:?}", t),
            FieldKind::Embedded(target) => format!("embedded({:?})", target),
            FieldKind::Reference(target) => format!("reference({:?})", target),
            FieldKind::GenericReference => "generic_reference".to_string(),
            FieldKind::List(inner) => format!("list({})", inner.describe()),
            FieldKind::Dict(inner) => format!("dict({})", inner.describe()),
            FieldKind::Dynamic => "dynamic".to_string(),
        }
    }
}

/// Default value of a field.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Value(Value),
    /// A value computed when the record is created.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produce the default.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// A field declaration.
#[derive(Debug, Clone)]
pub struct Field {
    /// Value shape.
    pub kind: FieldKind,
    /// Whether a non-null value is needed to save.
    pub required: bool,
    /// Value assigned to new records.
    pub default: Option<DefaultValue>,
    /// Policy applied when the referenced record is removed.
    pub on_delete: DeleteRule,
}

impl Field {
    /// Create an optional field of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            on_delete: DeleteRule::DoNothing,
        }
    }

    /// A field handled by a custom scalar type.
    pub fn scalar(scalar: Arc<dyn ScalarType>) -> Self {
        Self::new(FieldKind::Scalar(scalar))
    }

    /// A string field.
    pub fn string() -> Self {
        Self::scalar(Arc::new(StringType::new()))
    }

    /// An integer field.
    pub fn int() -> Self {
        Self::scalar(Arc::new(IntType::new()))
    }

    /// A float field.
    pub fn float() -> Self {
        Self::scalar(Arc::new(FloatType))
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        Self::scalar(Arc::new(BoolType))
    }

    /// A UTC datetime field.
    pub fn datetime() -> Self {
        Self::scalar(Arc::new(DateTimeType))
    }

    /// An object id field.
    pub fn object_id() -> Self {
        Self::scalar(Arc::new(ObjectIdType))
    }

    /// A nested record of the given class.
    pub fn embedded(target: impl Into<ClassTarget>) -> Self {
        Self::new(FieldKind::Embedded(target.into()))
    }

    /// A reference to a record of the given class.
    pub fn reference(target: impl Into<ClassTarget>) -> Self {
        Self::new(FieldKind::Reference(target.into()))
    }

    /// A reference to a record of the class being declared.
    pub fn self_reference() -> Self {
        Self::new(FieldKind::Reference(ClassTarget::SelfClass))
    }

    /// A reference to a record of any registered class.
    pub fn generic_reference() -> Self {
        Self::new(FieldKind::GenericReference)
    }

    /// A list whose elements have the shape of `inner`.
    ///
    /// The delete rule of `inner` moves to the list field.
    pub fn list(inner: Field) -> Self {
        Self {
            on_delete: inner.on_delete,
            ..Self::new(FieldKind::List(Box::new(inner.kind)))
        }
    }

    /// A map whose values have the shape of `inner`.
    pub fn dict(inner: Field) -> Self {
        Self::new(FieldKind::Dict(Box::new(inner.kind)))
    }

    /// A field accepting any value.
    pub fn dynamic() -> Self {
        Self::new(FieldKind::Dynamic)
    }

    /// Require a non-null value.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a fixed default.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Set a default computed at record creation.
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Set the reverse delete rule.
    pub fn on_delete(mut self, rule: DeleteRule) -> Self {
        self.on_delete = rule;
        self
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{}{}{}",
            self.kind.describe(),
            if self.required { "!" } else { "" },
            match self.on_delete {
                DeleteRule::DoNothing => String::new(),
                rule => format!("@{}", rule.as_str()),
            }
        )
    }
}

/// A derived field, present in primitive output and never stored.
#[derive(Clone)]
pub struct ComputedField {
    /// Field name.
    pub name: String,
    compute: Arc<dyn Fn(&Record) -> Value + Send + Sync>,
}

impl ComputedField {
    /// Create a computed field.
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    /// Evaluate the field for a record.
    pub fn compute(&self, record: &Record) -> Value {
        (self.compute)(record)
    }
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_carries_delete_rule() {
        let field = Field::list(Field::reference("app.Record").on_delete(DeleteRule::Pull));
        assert_eq!(field.on_delete, DeleteRule::Pull);
        assert!(field.kind.is_list());
        assert_eq!(
            field.kind.reference_target(),
            Some(&ClassTarget::Key("app.Record".into()))
        );
    }

    #[test]
    fn test_resolve_self() {
        let mut kind = FieldKind::List(Box::new(FieldKind::Reference(ClassTarget::SelfClass)));
        kind.resolve_self("app.Topic");
        assert_eq!(kind.reference_target().and_then(|t| t.key()), Some("app.Topic"));
    }

    #[test]
    fn test_defaults() {
        let field = Field::string().default("No name");
        assert_eq!(
            field.default.as_ref().map(|d| d.produce()),
            Some(Value::from("No name"))
        );

        let field = Field::int().default_with(|| Value::Int(7)).required();
        assert!(field.required);
        assert_eq!(field.default.map(|d| d.produce()), Some(Value::Int(7)));
    }

    #[test]
    fn test_reference_kinds() {
        assert!(Field::generic_reference().kind.is_reference());
        assert!(Field::list(Field::generic_reference()).kind.is_reference());
        assert!(!Field::list(Field::string()).kind.is_reference());
        assert!(Field::generic_reference().kind.reference_target().is_none());
    }
}
