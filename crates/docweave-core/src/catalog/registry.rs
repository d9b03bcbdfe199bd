//! Record class registry.
//!
//! Maps stable class keys to registered classes so references, generic
//! references and self-references resolve by name. The registry also keeps
//! each class's reverse delete-rule table: the rules other classes declared
//! on fields that point at it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::relation::{DeleteRule, ReverseRule};
use super::schema::RecordClass;
use crate::error::{Error, Result};

/// Registry of record classes and reverse delete rules.
#[derive(Debug, Default)]
pub struct Registry {
    classes: RwLock<HashMap<String, Arc<RecordClass>>>,
    /// owner key -> (referencing key, field) -> rule
    delete_rules: RwLock<HashMap<String, BTreeMap<(String, String), DeleteRule>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under its key.
    ///
    /// Registering a structurally identical class again returns the existing
    /// entry; a different class under a taken key is rejected.
    pub fn register(&self, class: RecordClass) -> Result<Arc<RecordClass>> {
        let mut classes = self.classes.write();
        if let Some(existing) = classes.get(class.key()) {
            if existing.signature() == class.signature() {
                return Ok(existing.clone());
            }
            return Err(Error::DuplicateRegistration(class.key().to_string()));
        }
        let class = Arc::new(class);
        classes.insert(class.key().to_string(), class.clone());
        tracing::debug!(
            class = %class.key(),
            collection = %class.collection(),
            fields = class.fields().count(),
            "registered record class"
        );
        Ok(class)
    }

    /// Look up a class by key.
    pub fn resolve(&self, key: &str) -> Result<Arc<RecordClass>> {
        self.classes
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(key.to_string()))
    }

    /// Whether a key is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.classes.read().contains_key(key)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.classes.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Record that `referencing.field` points at `owner` with `rule`.
    ///
    /// The owner does not need to be registered yet.
    pub fn register_delete_rule(
        &self,
        owner: &str,
        referencing: &str,
        field: &str,
        rule: DeleteRule,
    ) {
        self.delete_rules
            .write()
            .entry(owner.to_string())
            .or_default()
            .insert((referencing.to_string(), field.to_string()), rule);
    }

    /// Rules registered on `owner`, ordered by referencing class and field.
    pub fn delete_rules(&self, owner: &str) -> Vec<ReverseRule> {
        self.delete_rules
            .read()
            .get(owner)
            .map(|table| {
                table
                    .iter()
                    .map(|((class, field), rule)| ReverseRule::new(class.clone(), field.clone(), *rule))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Field, Schema};

    fn class(key: &str, field: Field) -> RecordClass {
        RecordClass::from_schema(Schema::document(key).field("title", field)).unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = Registry::new();
        registry.register(class("app.User", Field::string())).unwrap();

        assert!(registry.contains("app.User"));
        assert_eq!(registry.resolve("app.User").unwrap().collection(), "user");
        assert!(matches!(
            registry.resolve("app.Missing"),
            Err(Error::NotRegistered(ref k)) if k == "app.Missing"
        ));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = Registry::new();
        let first = registry.register(class("app.User", Field::string())).unwrap();
        let again = registry.register(class("app.User", Field::string())).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let clash = registry.register(class("app.User", Field::int()));
        assert!(matches!(clash, Err(Error::DuplicateRegistration(_))));
        assert_eq!(registry.keys(), vec!["app.User".to_string()]);
    }

    #[test]
    fn test_delete_rule_table() {
        let registry = Registry::new();
        registry.register_delete_rule("app.Event", "app.Record", "event", DeleteRule::Cascade);
        registry.register_delete_rule("app.Event", "app.Series", "main_event", DeleteRule::Deny);
        registry.register_delete_rule("app.Event", "app.Record", "event", DeleteRule::Nullify);

        let rules = registry.delete_rules("app.Event");
        assert_eq!(
            rules,
            vec![
                ReverseRule::new("app.Record", "event", DeleteRule::Nullify),
                ReverseRule::new("app.Series", "main_event", DeleteRule::Deny),
            ]
        );
        assert!(registry.delete_rules("app.User").is_empty());
    }
}
