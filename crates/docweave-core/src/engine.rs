//! Engine handle.
//!
//! An [`Engine`] owns the class registry, the hook bus and the
//! configuration. It is cheap to clone; records and managers carry a clone
//! so they can resolve classes by key.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::catalog::{RecordClass, Registry, Schema};
use crate::config::EngineConfig;
use crate::driver::Database;
use crate::error::Result;
use crate::query::Manager;
use crate::record::Record;
use crate::signals::HookBus;
use crate::transform;

struct EngineInner {
    registry: Registry,
    hooks: HookBus,
    config: EngineConfig,
}

/// Shared engine state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry: Registry::new(),
                hooks: HookBus::new(),
                config,
            }),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Class registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Lifecycle hook bus.
    pub fn hooks(&self) -> &HookBus {
        &self.inner.hooks
    }

    /// Register a class and the delete rules its fields declare.
    ///
    /// Rules are recorded on the referenced class, which may be registered
    /// later.
    pub fn register(&self, schema: Schema) -> Result<Model> {
        let class = self.inner.registry.register(RecordClass::from_schema(schema)?)?;
        for (field, target, rule) in class.delete_rules() {
            self.inner
                .registry
                .register_delete_rule(target, class.key(), field, rule);
            tracing::debug!(
                owner = %target,
                referencing = %class.key(),
                field = %field,
                rule = rule.as_str(),
                "registered delete rule"
            );
        }
        Ok(Model::new(self.clone(), class))
    }

    /// Look up a registered class.
    pub fn class(&self, key: &str) -> Result<Arc<RecordClass>> {
        self.inner.registry.resolve(key)
    }

    /// Unbound manager for a registered class.
    pub fn objects(&self, key: &str) -> Result<Manager> {
        Ok(Manager::new(self.clone(), self.class(key)?))
    }

    /// New record of a registered class, with defaults applied.
    pub fn new_record(&self, key: &str) -> Result<Record> {
        Ok(Record::new(self.clone(), self.class(key)?))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("classes", &self.inner.registry.keys())
            .field("hooks", &self.inner.hooks)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// A registered class together with its manager.
#[derive(Debug, Clone)]
pub struct Model {
    /// The registered class.
    pub class: Arc<RecordClass>,
    /// Unbound manager; bind it with [`Manager::set_db`].
    pub objects: Manager,
}

impl Model {
    fn new(engine: Engine, class: Arc<RecordClass>) -> Self {
        Self {
            objects: Manager::new(engine, class.clone()),
            class,
        }
    }

    /// Class key.
    pub fn key(&self) -> &str {
        self.class.key()
    }

    /// New record with defaults applied.
    pub fn new_record(&self) -> Record {
        Record::new(self.objects.engine().clone(), self.class.clone())
    }

    /// Build a record from primitive input.
    pub fn from_primitive(&self, input: &JsonValue) -> Result<Record> {
        transform::from_primitive(self.objects.engine(), &self.class, input)
    }

    /// Build a record from its database form.
    pub fn from_database(&self, doc: &bson::Document) -> Result<Record> {
        transform::to_native(self.objects.engine(), &self.class, doc, None)
    }

    /// Create the class's declared indexes.
    pub async fn ensure_indexes(&self, db: &Database) -> Result<Vec<String>> {
        self.objects.set_db(db.clone()).ensure_indexes().await
    }
}
