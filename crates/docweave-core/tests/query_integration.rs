//! Integration tests for managers, cursors, updates and retries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use bson::oid::ObjectId;
use docweave_core::driver::memory::OperationKind;
use docweave_core::{
    EngineConfig, Error, Hook, RetryPolicy, SortOrder, UpdateOptions, Value,
};
use parking_lot::Mutex;

use common::*;

#[tokio::test]
async fn test_save_and_get() {
    init_tracing();
    let ctx = TestContext::new();
    let simple = ctx
        .create(SIMPLE, vec![("title", "first".into()), ("secret", "s3cr3t".into())])
        .await;

    let objects = ctx.objects(SIMPLE);
    let found = objects.get(doc! { "secret": "s3cr3t" }).await.unwrap().unwrap();
    assert_eq!(found.id(), simple.id());
    assert_eq!(found.value("title"), Value::from("first"));

    let by_id = objects
        .get(doc! { "id": simple.id().unwrap().to_hex() })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id, simple);

    assert!(objects.get(doc! { "secret": "nope" }).await.unwrap().is_none());
}

#[tokio::test]
async fn test_filter_with_in_and_count() {
    let ctx = TestContext::new();
    for title in ["a", "b", "c", "d"] {
        ctx.create(SIMPLE, vec![("title", title.into())]).await;
    }
    let objects = ctx.objects(SIMPLE);

    let found = objects
        .filter(doc! { "title": { "$in": ["b", "d", "z"] } })
        .unwrap()
        .sort("title", SortOrder::Desc)
        .all()
        .await
        .unwrap();
    let titles: Vec<Value> = found.iter().map(|r| r.value("title")).collect();
    assert_eq!(titles, vec![Value::from("d"), Value::from("b")]);

    assert_eq!(objects.count(doc! {}).await.unwrap(), 4);
    assert_eq!(objects.count(doc! { "title": { "$ne": "a" } }).await.unwrap(), 3);
    assert_eq!(objects.all().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_resave_replaces_document() {
    let ctx = TestContext::new();
    let mut simple = ctx
        .create(SIMPLE, vec![("title", "t".into()), ("secret", "s".into())])
        .await;
    let id = simple.id().unwrap();

    simple.unset("secret");
    simple.set("title", "renamed").unwrap();
    assert_eq!(simple.save(&ctx.db).await.unwrap(), id);

    assert_eq!(
        ctx.memory.documents("simple"),
        vec![doc! { "_id": id, "title": "renamed" }]
    );
}

#[tokio::test]
async fn test_save_with_preset_key_upserts() {
    let ctx = TestContext::new();
    let id = ObjectId::new();
    let mut simple = ctx.record(SIMPLE);
    simple.set_id(id).unwrap();
    assert_eq!(simple.save(&ctx.db).await.unwrap(), id);
    assert_eq!(ctx.objects(SIMPLE).count(doc! { "id": id }).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_with_explicit_key() {
    let ctx = TestContext::new();
    let id = ObjectId::new();
    let mut first = ctx.record(USER);
    first.set_id(id).unwrap();
    assert_eq!(first.insert(&ctx.db).await.unwrap(), id);

    let mut again = ctx.record(USER);
    again.set_id(id).unwrap();
    let err = again.insert(&ctx.db).await.unwrap_err();
    assert!(matches!(err, Error::OperationFailure(_)));
    assert_eq!(ctx.memory.documents("user").len(), 1);
}

#[tokio::test]
async fn test_bulk_insert() {
    let ctx = TestContext::new();
    let objects = ctx.objects(USER);
    let mut users: Vec<_> = ["ann", "bob", "cy"]
        .into_iter()
        .map(|name| ctx.record(USER).with("name", name).unwrap())
        .collect();
    let ids = objects.insert(&mut users).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(users.iter().zip(&ids).all(|(u, id)| u.id() == Some(*id)));

    let mut mixed = vec![ctx.record(USER), ctx.record(SIMPLE)];
    let err = objects.insert(&mut mixed).await.unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
    assert_eq!(objects.count(doc! {}).await.unwrap(), 3);
}

#[tokio::test]
async fn test_partial_update() {
    let ctx = TestContext::new();
    let user = ctx
        .create(USER, vec![("name", "ann".into()), ("age", 30.into())])
        .await;

    let result = user
        .update(&ctx.db, doc! { "age": 31 }, UpdateOptions::single())
        .await
        .unwrap();
    assert_eq!(result.modified, 1);

    let objects = ctx.objects(USER);
    objects
        .update(doc! { "name": "ann" }, doc! { "$inc": { "age": 1 } }, UpdateOptions::single())
        .await
        .unwrap();
    let stored = &ctx.memory.documents("user")[0];
    assert_eq!(stored.get_str("name").unwrap(), "ann");
    assert_eq!(stored.get_i64("age").unwrap(), 32);

    let err = objects
        .update(doc! {}, doc! { "age": "old" }, UpdateOptions::multi())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conversion(ref e) if e.field == "age"));
}

#[tokio::test]
async fn test_update_flatten_keeps_sibling_fields() {
    let ctx = TestContext::new();
    let mut record = ctx.record(FIELDS);
    let mut nested = ctx.record(NESTED);
    nested.set("type_string", "keep").unwrap();
    nested.set("type_int", 1).unwrap();
    record.set("type_model", nested).unwrap();
    record.save(&ctx.db).await.unwrap();

    let objects = ctx.objects(FIELDS);
    objects
        .update(
            doc! { "id": record.id().unwrap() },
            doc! { "type_model": { "type_int": 5 } },
            UpdateOptions::single().with_flatten(),
        )
        .await
        .unwrap();
    let stored = &ctx.memory.documents("st")[0];
    assert_eq!(
        stored.get_document("type_model").unwrap(),
        &doc! { "type_string": "keep", "type_int": 5_i64 }
    );

    // without flattening the sub-document is replaced
    objects
        .update(
            doc! { "id": record.id().unwrap() },
            doc! { "type_model": { "type_int": 6 } },
            UpdateOptions::single(),
        )
        .await
        .unwrap();
    let stored = &ctx.memory.documents("st")[0];
    assert_eq!(stored.get_document("type_model").unwrap(), &doc! { "type_int": 6_i64 });
}

#[tokio::test]
async fn test_upsert_and_multi() {
    let ctx = TestContext::new();
    let objects = ctx.objects(USER);

    let result = objects
        .update(doc! { "name": "new" }, doc! { "age": 1 }, UpdateOptions::upsert())
        .await
        .unwrap();
    assert!(result.upserted_id.is_some());

    ctx.create(USER, vec![("name", "other".into()), ("age", 1.into())]).await;
    let result = objects
        .update(doc! { "age": 1 }, doc! { "age": 2 }, UpdateOptions::multi())
        .await
        .unwrap();
    assert_eq!(result.matched, 2);
    assert_eq!(objects.count(doc! { "age": 2 }).await.unwrap(), 2);
}

#[tokio::test]
async fn test_aggregate() {
    let ctx = TestContext::new();
    let a = ctx.create(SIMPLE, vec![]).await;
    let b = ctx.create(SIMPLE, vec![]).await;
    ctx.create(
        RECORD_SERIES,
        vec![("title", "s1".into()), ("simplies", vec![a.clone(), b.clone()].into())],
    )
    .await;
    ctx.create(
        RECORD_SERIES,
        vec![("title", "s2".into()), ("simplies", vec![a.clone()].into())],
    )
    .await;

    let result = ctx
        .objects(RECORD_SERIES)
        .aggregate(vec![
            doc! { "$unwind": "$simplies" },
            doc! { "$match": { "simplies": a.id().unwrap() } },
            doc! { "$count": "total" },
        ])
        .await
        .unwrap();
    assert_eq!(result, vec![doc! { "total": 2_i64 }]);

    let err = ctx
        .objects(RECORD_SERIES)
        .aggregate(vec![doc! { "$explode": {} }])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OperationFailure(_)));
}

#[tokio::test]
async fn test_ensure_indexes() {
    let ctx = TestContext::new();
    let simple = ctx.engine.objects(SIMPLE).unwrap();
    assert_eq!(
        simple.set_db(ctx.db.clone()).ensure_indexes().await.unwrap(),
        vec!["title_1"]
    );
    assert_eq!(index_names(&ctx.memory, "simple"), vec!["title_1"]);

    let event = ctx.objects(EVENT);
    assert_eq!(event.ensure_indexes().await.unwrap(), vec!["title_1_user.name_1"]);
    // idempotent
    assert_eq!(event.ensure_indexes().await.unwrap(), vec!["title_1_user.name_1"]);

    ctx.objects(TOPIC).ensure_indexes().await.unwrap();
    let info = ctx.memory.index_information("topic");
    assert!(info["title_1"].unique);

    ctx.create(TOPIC, vec![]).await;
    let mut duplicate = ctx.record(TOPIC);
    let err = duplicate.save(&ctx.db).await.unwrap_err();
    assert!(matches!(err, Error::OperationFailure(_)));
    assert!(duplicate.id().is_none());
}

#[tokio::test]
async fn test_connection_failures_are_retried() {
    let ctx = TestContext::with_config(
        EngineConfig::new().with_retry(RetryPolicy::new(2, Duration::ZERO)),
    );
    ctx.create(SIMPLE, vec![]).await;
    ctx.memory.clear_operations();

    ctx.memory.fail_next_operations(2);
    assert_eq!(ctx.objects(SIMPLE).count(doc! {}).await.unwrap(), 1);
    let failed: Vec<bool> = ctx.memory.operations().iter().map(|op| op.failed).collect();
    assert_eq!(failed, vec![true, true, false]);

    ctx.memory.fail_next_operations(3);
    let err = ctx.objects(SIMPLE).count(doc! {}).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));
}

#[tokio::test]
async fn test_save_survives_transient_failure() {
    let ctx = TestContext::with_config(
        EngineConfig::new().with_retry(RetryPolicy::new(5, Duration::ZERO)),
    );
    ctx.memory.fail_next_operations(4);
    let simple = ctx.create(SIMPLE, vec![("title", "kept".into())]).await;
    assert_eq!(ctx.memory.documents("simple").len(), 1);
    let inserts = ctx
        .memory
        .operations()
        .iter()
        .filter(|op| op.kind == OperationKind::Insert)
        .count();
    assert_eq!(inserts, 5);
    assert!(simple.id().is_some());
}

#[tokio::test]
async fn test_save_hooks() {
    let ctx = TestContext::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for hook in [Hook::PreSave, Hook::PostSave] {
        let log = log.clone();
        ctx.engine.hooks().connect_fn(hook, Some(SIMPLE), move |_, record| {
            let log = log.clone();
            async move {
                log.lock().push((hook, record.id().is_some()));
                Ok(())
            }
        });
    }

    ctx.create(SIMPLE, vec![]).await;
    ctx.create(USER, vec![]).await;
    assert_eq!(*log.lock(), vec![(Hook::PreSave, false), (Hook::PostSave, true)]);

    // insert bypasses save hooks
    ctx.record(SIMPLE).insert(&ctx.db).await.unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[tokio::test]
async fn test_save_hooks_bracket_the_write() {
    let ctx = TestContext::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for hook in [Hook::PreSave, Hook::PostSave] {
        let seen = seen.clone();
        let objects = ctx.objects(SIMPLE);
        ctx.engine.hooks().connect_fn(hook, Some(SIMPLE), move |_, _| {
            let seen = seen.clone();
            let objects = objects.clone();
            async move {
                let stored = objects.count(doc! {}).await?;
                seen.lock().push((hook, stored));
                Ok(())
            }
        });
    }

    ctx.create(SIMPLE, vec![]).await;
    assert_eq!(*seen.lock(), vec![(Hook::PreSave, 0), (Hook::PostSave, 1)]);
}

#[tokio::test]
async fn test_failing_pre_save_aborts() {
    let ctx = TestContext::new();
    ctx.engine.hooks().connect_fn(Hook::PreSave, None, |class, _| async move {
        Err(Error::Operation(format!("{} is read only", class.key())))
    });

    let mut simple = ctx.record(SIMPLE);
    let err = simple.save(&ctx.db).await.unwrap_err();
    assert!(matches!(err, Error::Operation(ref m) if m == "app.SimpleModel is read only"));
    assert!(ctx.memory.documents("simple").is_empty());
}

#[tokio::test]
async fn test_validation_happens_before_io() {
    let ctx = TestContext::new();
    let mut user = ctx.record(USER);
    user.set("age", "thirty").unwrap();
    let err = user.save(&ctx.db).await.unwrap_err();
    assert!(matches!(err, Error::Validation(ref e) if e.field == "age"));
    assert!(ctx.memory.operations().is_empty());
}

#[tokio::test]
async fn test_embedded_class_has_no_manager_io() {
    let ctx = TestContext::new();
    let err = ctx.objects(NESTED).count(doc! {}).await.unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
}
