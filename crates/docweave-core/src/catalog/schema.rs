//! Schema declarations and the record classes built from them.

use super::field::{ComputedField, Field, FieldKind};
use super::index::IndexSpec;
use super::relation::DeleteRule;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::value::Value;

/// Whether records of a class live in their own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Top-level records with a collection and a primary key.
    Document,
    /// Records nested inside other records.
    Embedded,
}

/// A record class declaration.
///
/// Fields keep declaration order; redeclaring a name replaces the earlier
/// field in place.
#[derive(Debug, Clone)]
pub struct Schema {
    key: String,
    kind: SchemaKind,
    collection: Option<String>,
    fields: Vec<(String, Field)>,
    computed: Vec<ComputedField>,
    indexes: Vec<IndexSpec>,
}

impl Schema {
    /// Declare a top-level record class under a registry key such as `app.models.User`.
    pub fn document(key: impl Into<String>) -> Self {
        Self::new(key.into(), SchemaKind::Document)
    }

    /// Declare an embedded record class.
    pub fn embedded(key: impl Into<String>) -> Self {
        Self::new(key.into(), SchemaKind::Embedded)
    }

    fn new(key: String, kind: SchemaKind) -> Self {
        Self {
            key,
            kind,
            collection: None,
            fields: Vec::new(),
            computed: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Override the collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Declare a field.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
        self
    }

    /// Declare a computed field.
    pub fn computed<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.push_computed(ComputedField::new(name, compute));
        self
    }

    fn push_computed(&mut self, computed: ComputedField) {
        match self.computed.iter_mut().find(|c| c.name == computed.name) {
            Some(slot) => *slot = computed,
            None => self.computed.push(computed),
        }
    }

    /// Declare an index.
    pub fn index(mut self, index: IndexSpec) -> Self {
        if !self.indexes.contains(&index) {
            self.indexes.push(index);
        }
        self
    }

    /// Include the fields, computed fields and indexes of a base schema.
    ///
    /// Declarations made after this call override the base's.
    pub fn extends(mut self, base: &Schema) -> Self {
        for (name, field) in &base.fields {
            self = self.field(name.clone(), field.clone());
        }
        for computed in &base.computed {
            self.push_computed(computed.clone());
        }
        for index in &base.indexes {
            self = self.index(index.clone());
        }
        self
    }

    /// Registry key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Collection name derived from a class key: the last segment, lower-cased,
/// without its `Model` suffix.
pub fn default_collection_name(key: &str) -> String {
    let name = key.rsplit('.').next().unwrap_or(key);
    let name = name.strip_suffix("Model").filter(|n| !n.is_empty()).unwrap_or(name);
    name.to_lowercase()
}

/// A registered record class.
#[derive(Debug, Clone)]
pub struct RecordClass {
    key: String,
    kind: SchemaKind,
    collection: String,
    fields: Vec<(String, Field)>,
    computed: Vec<ComputedField>,
    indexes: Vec<IndexSpec>,
}

impl RecordClass {
    /// Build a class from its declaration.
    ///
    /// Self-class placeholders are patched to the class key, and delete
    /// rules are checked for placement.
    pub fn from_schema(schema: Schema) -> Result<Self> {
        let Schema {
            key,
            kind,
            collection,
            mut fields,
            computed,
            indexes,
        } = schema;

        if key.is_empty() {
            return Err(Error::Schema {
                class: key,
                message: "class key is empty".into(),
            });
        }

        for (name, field) in &mut fields {
            if name == "id" || name == "_id" || name == "_cls" {
                return Err(Error::Schema {
                    class: key.clone(),
                    message: format!("field name `{}` is reserved", name),
                });
            }
            field.kind.resolve_self(&key);
            check_delete_rule(&key, kind, name, field)?;
        }

        if let Some(clash) = computed
            .iter()
            .find(|c| fields.iter().any(|(n, _)| *n == c.name))
        {
            return Err(Error::Schema {
                class: key.clone(),
                message: format!("computed field `{}` shadows a stored field", clash.name),
            });
        }

        let collection = match kind {
            SchemaKind::Document => collection.unwrap_or_else(|| default_collection_name(&key)),
            SchemaKind::Embedded => String::new(),
        };

        Ok(Self {
            key,
            kind,
            collection,
            fields,
            computed,
            indexes,
        })
    }

    /// Registry key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Document or embedded.
    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Whether records of this class are nested in other records.
    pub fn is_embedded(&self) -> bool {
        self.kind == SchemaKind::Embedded
    }

    /// Collection name, empty for embedded classes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stored fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Look up a stored field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Computed fields.
    pub fn computed(&self) -> &[ComputedField] {
        &self.computed
    }

    /// Look up a computed field.
    pub fn computed_field(&self, name: &str) -> Option<&ComputedField> {
        self.computed.iter().find(|c| c.name == name)
    }

    /// Declared indexes.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Fields carrying a delete rule other than DO_NOTHING, with their target keys.
    pub(crate) fn delete_rules(&self) -> impl Iterator<Item = (&str, &str, DeleteRule)> {
        self.fields.iter().filter_map(|(name, field)| {
            let target = field.kind.reference_target()?.key()?;
            match field.on_delete {
                DeleteRule::DoNothing => None,
                rule => Some((name.as_str(), target, rule)),
            }
        })
    }

    /// Structural fingerprint used to accept repeated registrations.
    pub(crate) fn signature(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(n, f)| format!("{}:{}", n, f.describe()))
            .collect();
        let computed: Vec<&str> = self.computed.iter().map(|c| c.name.as_str()).collect();
        format!(
            "{:?}|{}|{}|{}|{:?}",
            self.kind,
            self.collection,
            fields.join(","),
            computed.join(","),
            self.indexes
        )
    }
}

fn check_delete_rule(class: &str, kind: SchemaKind, name: &str, field: &Field) -> Result<()> {
    let rule = field.on_delete;
    if rule == DeleteRule::DoNothing {
        return Ok(());
    }
    let fail = |message: String| Error::Schema {
        class: class.to_string(),
        message,
    };
    if kind == SchemaKind::Embedded {
        return Err(fail(format!(
            "delete rule {} on `{}`: embedded classes cannot carry delete rules",
            rule.as_str(),
            name
        )));
    }
    if field.kind.reference_target().is_none() {
        return Err(fail(format!(
            "delete rule {} on `{}` needs a typed reference field",
            rule.as_str(),
            name
        )));
    }
    if rule == DeleteRule::Pull && !matches!(field.kind, FieldKind::List(_)) {
        return Err(fail(format!(
            "delete rule PULL on `{}` needs a list of references",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClassTarget;

    #[test]
    fn test_default_collection_name() {
        assert_eq!(default_collection_name("example_app.models.SimpleModel"), "simple");
        assert_eq!(default_collection_name("app.RecordSeries"), "recordseries");
        assert_eq!(default_collection_name("Model"), "model");
        assert_eq!(default_collection_name("User"), "user");
    }

    #[test]
    fn test_schema_builder_and_override() {
        let base = Schema::document("app.Base")
            .field("title", Field::string().default("base"))
            .index(IndexSpec::new().asc("title"));
        let schema = Schema::document("app.Child")
            .extends(&base)
            .field("title", Field::string().default("child"))
            .field("age", Field::int());

        let class = RecordClass::from_schema(schema).unwrap();
        assert_eq!(class.collection(), "child");
        let names: Vec<&str> = class.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["title", "age"]);
        assert_eq!(
            class.field("title").and_then(|f| f.default.as_ref()).map(|d| d.produce()),
            Some(Value::from("child"))
        );
        assert_eq!(class.indexes().len(), 1);
    }

    #[test]
    fn test_self_reference_is_patched() {
        let class = RecordClass::from_schema(
            Schema::document("app.Topic").field("ancestor", Field::self_reference()),
        )
        .unwrap();
        assert_eq!(
            class.field("ancestor").and_then(|f| f.kind.reference_target()),
            Some(&ClassTarget::Key("app.Topic".into()))
        );
    }

    #[test]
    fn test_delete_rule_placement() {
        let pull_on_scalar = Schema::document("app.A")
            .field("b", Field::reference("app.B").on_delete(DeleteRule::Pull));
        assert!(matches!(
            RecordClass::from_schema(pull_on_scalar),
            Err(Error::Schema { .. })
        ));

        let rule_on_string =
            Schema::document("app.A").field("b", Field::string().on_delete(DeleteRule::Cascade));
        assert!(RecordClass::from_schema(rule_on_string).is_err());

        let rule_on_generic = Schema::document("app.A")
            .field("b", Field::generic_reference().on_delete(DeleteRule::Nullify));
        assert!(RecordClass::from_schema(rule_on_generic).is_err());

        let ok = Schema::document("app.A").field(
            "bs",
            Field::list(Field::reference("app.B").on_delete(DeleteRule::Pull)),
        );
        let class = RecordClass::from_schema(ok).unwrap();
        let rules: Vec<_> = class.delete_rules().collect();
        assert_eq!(rules, vec![("bs", "app.B", DeleteRule::Pull)]);
    }

    #[test]
    fn test_reserved_and_shadowed_names() {
        assert!(RecordClass::from_schema(Schema::document("app.A").field("id", Field::string())).is_err());

        let shadowed = Schema::document("app.A")
            .field("expired", Field::boolean())
            .computed("expired", |_| Value::Bool(true));
        assert!(RecordClass::from_schema(shadowed).is_err());
    }

    #[test]
    fn test_embedded_has_no_collection() {
        let class = RecordClass::from_schema(
            Schema::embedded("app.NestedModel").field("type_int", Field::int()),
        )
        .unwrap();
        assert!(class.is_embedded());
        assert_eq!(class.collection(), "");
    }
}
