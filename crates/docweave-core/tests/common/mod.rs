//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use docweave_core::driver::memory::{OperationKind, ID_INDEX};
use docweave_core::{
    Database, Engine, EngineConfig, Field, IndexSpec, Manager, MemoryDatabase, Record, Schema,
    Value,
};

pub const SIMPLE: &str = "app.SimpleModel";
pub const USER: &str = "app.User";
pub const EVENT: &str = "app.Event";
pub const RECORD: &str = "app.Record";
pub const RECORD_SERIES: &str = "app.RecordSeries";
pub const NESTED: &str = "app.NestedModel";
pub const TRANSACTION: &str = "app.Transaction";
pub const PAGE: &str = "app.Page";
pub const BRAND: &str = "app.Brand";
pub const PLAN: &str = "app.Plan";
pub const TOPIC: &str = "app.Topic";
pub const FIELDS: &str = "app.SchematicsFieldsModel";

/// Register the example application's classes.
pub fn register_models(engine: &Engine) {
    let schemas = vec![
        Schema::document(SIMPLE)
            .field("title", Field::string().default("No name"))
            .field("secret", Field::string())
            .index(IndexSpec::new().asc("title")),
        Schema::document(USER)
            .field("name", Field::string())
            .field("age", Field::int()),
        Schema::document(EVENT)
            .field("title", Field::string())
            .field("user", Field::reference(USER))
            .index(IndexSpec::new().asc("title").asc("user.name")),
        Schema::document(RECORD)
            .field("title", Field::string())
            .field("event", Field::reference(EVENT))
            .field("simple", Field::reference(SIMPLE)),
        Schema::document(RECORD_SERIES)
            .field("title", Field::string())
            .field("records", Field::list(Field::reference(RECORD)))
            .field("simplies", Field::list(Field::reference(SIMPLE)))
            .field("main_event", Field::reference(EVENT)),
        Schema::embedded(NESTED)
            .field("type_string", Field::string())
            .field("type_int", Field::int()),
        Schema::document(TRANSACTION)
            .field("title", Field::string())
            .field("item", Field::generic_reference()),
        Schema::document(PAGE)
            .field("title", Field::string())
            .field("content", Field::dynamic()),
        Schema::document(BRAND)
            .field("title", Field::string())
            .field("menu", Field::list(Field::dynamic())),
        Schema::document(PLAN)
            .field("title", Field::string().default("default"))
            .field("ends_at", Field::datetime().default_with(|| Utc::now().into()))
            .computed("is_expired", |plan| match plan.get("ends_at").and_then(Value::as_datetime) {
                Some(ends_at) => Value::Bool(ends_at < Utc::now()),
                None => Value::Null,
            }),
        Schema::document(TOPIC)
            .field("title", Field::string().default("best"))
            .field("ancestor", Field::self_reference())
            .index(IndexSpec::new().asc("title").unique()),
        Schema::document(FIELDS)
            .collection("st")
            .field("type_string", Field::string())
            .field("type_int", Field::int())
            .field("type_float", Field::float())
            .field("type_boolean", Field::boolean())
            .field("type_datetime", Field::datetime())
            .field("type_list", Field::list(Field::string()))
            .field("type_dict", Field::dict(Field::int()))
            .field("type_list_of_dict", Field::list(Field::dict(Field::string())))
            .field("type_dict_of_list", Field::dict(Field::list(Field::int())))
            .field("type_model", Field::embedded(NESTED))
            .field("type_list_model", Field::list(Field::embedded(NESTED)))
            .field("type_ref_simplemodel", Field::reference(SIMPLE))
            .field("type_ref_usermodel", Field::reference(USER)),
    ];
    for schema in schemas {
        engine.register(schema).unwrap();
    }
}

/// An engine with the example classes and an in-memory database.
pub struct TestContext {
    pub engine: Engine,
    pub memory: Arc<MemoryDatabase>,
    pub db: Database,
}

impl TestContext {
    /// Context without retries, so injected failures surface at once.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new().without_retry())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let engine = Engine::with_config(config);
        register_models(&engine);
        let memory = Arc::new(MemoryDatabase::new());
        let db: Database = memory.clone();
        Self { engine, memory, db }
    }

    /// Bound manager for a class.
    pub fn objects(&self, key: &str) -> Manager {
        self.engine.objects(key).unwrap().set_db(self.db.clone())
    }

    /// New record of a class.
    pub fn record(&self, key: &str) -> Record {
        self.engine.new_record(key).unwrap()
    }

    /// Create and save a record with the given fields.
    pub async fn create(&self, key: &str, fields: Vec<(&str, Value)>) -> Record {
        let mut record = self.record(key);
        for (name, value) in fields {
            record.set(name, value).unwrap();
        }
        record.save(&self.db).await.unwrap();
        record
    }

    /// Number of find queries sent to a collection.
    pub fn find_count(&self, collection: &str) -> usize {
        self.memory
            .operations()
            .iter()
            .filter(|op| op.kind == OperationKind::Find && op.collection == collection)
            .count()
    }
}

/// Names of a collection's indexes, without the primary key index.
pub fn index_names(memory: &MemoryDatabase, collection: &str) -> Vec<String> {
    memory
        .index_information(collection)
        .into_keys()
        .filter(|name| name != ID_INDEX)
        .collect()
}

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
