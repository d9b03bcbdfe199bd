//! Integration tests for delete rules.

mod common;

use std::sync::Arc;

use bson::doc;
use docweave_core::{
    Database, DeleteRule, Engine, EngineConfig, Error, Field, Hook, MemoryDatabase, Record,
    Schema, Value,
};
use parking_lot::Mutex;

use common::init_tracing;

const AUTHOR: &str = "lib.Author";
const BOOK: &str = "lib.Book";
const REVIEW: &str = "lib.Review";
const CONTRACT: &str = "lib.Contract";
const FAN: &str = "lib.Fan";
const LOAN: &str = "lib.Loan";
const SHELF: &str = "lib.Shelf";
const NODE: &str = "lib.Node";

struct Library {
    engine: Engine,
    memory: Arc<MemoryDatabase>,
    db: Database,
}

impl Library {
    fn new() -> Self {
        Self::with_config(EngineConfig::new().without_retry())
    }

    fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let engine = Engine::with_config(config);
        let schemas = vec![
            Schema::document(AUTHOR).field("name", Field::string()),
            Schema::document(BOOK)
                .field("title", Field::string())
                .field("author", Field::reference(AUTHOR).on_delete(DeleteRule::Cascade)),
            Schema::document(REVIEW)
                .field("text", Field::string())
                .field("book", Field::reference(BOOK).on_delete(DeleteRule::Cascade)),
            Schema::document(CONTRACT)
                .field("author", Field::reference(AUTHOR).on_delete(DeleteRule::Deny)),
            Schema::document(FAN)
                .field("name", Field::string())
                .field("favorite", Field::reference(AUTHOR).on_delete(DeleteRule::Nullify)),
            Schema::document(LOAN)
                .field("book", Field::reference(BOOK).on_delete(DeleteRule::Deny)),
            Schema::document(SHELF).field(
                "books",
                Field::list(Field::reference(BOOK).on_delete(DeleteRule::Pull)),
            ),
            Schema::document(NODE)
                .field("name", Field::string())
                .field("parent", Field::self_reference().on_delete(DeleteRule::Cascade)),
        ];
        for schema in schemas {
            engine.register(schema).unwrap();
        }
        let memory = Arc::new(MemoryDatabase::new());
        let db: Database = memory.clone();
        Self { engine, memory, db }
    }

    async fn create(&self, key: &str, fields: Vec<(&str, Value)>) -> Record {
        let mut record = self.engine.new_record(key).unwrap();
        for (name, value) in fields {
            record.set(name, value).unwrap();
        }
        record.save(&self.db).await.unwrap();
        record
    }

    fn stored(&self, collection: &str) -> usize {
        self.memory.documents(collection).len()
    }

    /// Author with two books, reviewed three times.
    async fn author_with_books(&self, name: &str) -> (Record, Vec<Record>) {
        let author = self.create(AUTHOR, vec![("name", name.into())]).await;
        let mut books = Vec::new();
        for title in ["one", "two"] {
            books.push(
                self.create(
                    BOOK,
                    vec![
                        ("title", format!("{} {}", name, title).into()),
                        ("author", author.clone().into()),
                    ],
                )
                .await,
            );
        }
        for book in [&books[0], &books[0], &books[1]] {
            self.create(REVIEW, vec![("text", "fine".into()), ("book", book.clone().into())])
                .await;
        }
        (author, books)
    }
}

#[tokio::test]
async fn test_cascade_composes() {
    let lib = Library::new();
    let (author, _) = lib.author_with_books("ann").await;
    let (_, other_books) = lib.author_with_books("bob").await;

    let outcome = author.remove(&lib.db).await.unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.cascaded, 5);
    assert_eq!(outcome.total_removed(), 6);

    assert_eq!(lib.stored("author"), 1);
    assert_eq!(lib.stored("book"), 2);
    assert_eq!(lib.stored("review"), 3);
    let books = lib.engine.objects(BOOK).unwrap().set_db(lib.db.clone()).all().await.unwrap();
    assert_eq!(books, other_books);
}

#[tokio::test]
async fn test_nullify() {
    let lib = Library::new();
    let author = lib.create(AUTHOR, vec![("name", "ann".into())]).await;
    let other = lib.create(AUTHOR, vec![("name", "bob".into())]).await;
    lib.create(FAN, vec![("name", "f1".into()), ("favorite", author.clone().into())])
        .await;
    lib.create(FAN, vec![("name", "f2".into()), ("favorite", other.clone().into())])
        .await;

    let outcome = author.remove(&lib.db).await.unwrap();
    assert_eq!(outcome.nullified, 1);

    let fans = lib.memory.documents("fan");
    assert!(!fans[0].contains_key("favorite"));
    assert_eq!(fans[1].get_object_id("favorite").ok(), other.id());
}

#[tokio::test]
async fn test_deny_blocks_whole_batch() {
    let lib = Library::new();
    let held = lib.create(AUTHOR, vec![("name", "held".into())]).await;
    let watched = lib.create(AUTHOR, vec![("name", "watched".into())]).await;
    lib.create(CONTRACT, vec![("author", held.clone().into())]).await;
    lib.create(FAN, vec![("name", "f".into()), ("favorite", watched.clone().into())])
        .await;

    let err = lib
        .engine
        .objects(AUTHOR)
        .unwrap()
        .set_db(lib.db.clone())
        .remove(doc! {})
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Operation(ref m) if m == "Could not delete document (lib.Contract.author refers to it)")
    );
    assert_eq!(lib.stored("author"), 2);
    assert_eq!(
        lib.memory.documents("fan")[0].get_object_id("favorite").ok(),
        watched.id()
    );
}

#[tokio::test]
async fn test_deny_inside_cascade_aborts_before_writes() {
    let lib = Library::new();
    let (author, books) = lib.author_with_books("ann").await;
    lib.create(LOAN, vec![("book", books[1].clone().into())]).await;

    let err = author.remove(&lib.db).await.unwrap_err();
    assert!(matches!(err, Error::Operation(ref m) if m.contains("lib.Loan.book")));
    assert_eq!(lib.stored("author"), 1);
    assert_eq!(lib.stored("book"), 2);
    assert_eq!(lib.stored("review"), 3);
}

#[tokio::test]
async fn test_deny_lifts_once_reference_is_removed() {
    let lib = Library::new();
    let author = lib.create(AUTHOR, vec![("name", "ann".into())]).await;
    let contract = lib.create(CONTRACT, vec![("author", author.clone().into())]).await;

    assert!(author.remove(&lib.db).await.is_err());
    contract.remove(&lib.db).await.unwrap();
    let outcome = author.remove(&lib.db).await.unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(lib.stored("author"), 0);
}

#[tokio::test]
async fn test_pull_keeps_order() {
    let lib = Library::new();
    let author = lib.create(AUTHOR, vec![("name", "ann".into())]).await;
    let mut books = Vec::new();
    for title in ["b1", "b2", "b3"] {
        books.push(
            lib.create(BOOK, vec![("title", title.into()), ("author", author.clone().into())])
                .await,
        );
    }
    let shelf = lib
        .create(
            SHELF,
            vec![(
                "books",
                vec![books[0].clone(), books[1].clone(), books[2].clone(), books[1].clone()].into(),
            )],
        )
        .await;

    let outcome = books[1].remove(&lib.db).await.unwrap();
    assert_eq!(outcome.pulled, 1);
    assert_eq!(outcome.removed, 1);

    let stored = lib
        .engine
        .objects(SHELF)
        .unwrap()
        .set_db(lib.db.clone())
        .get(doc! { "id": shelf.id().unwrap() })
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<_> = stored
        .get("books")
        .and_then(Value::as_list)
        .unwrap()
        .iter()
        .filter_map(|v| v.as_reference().and_then(|r| r.id()))
        .collect();
    assert_eq!(ids, vec![books[0].id().unwrap(), books[2].id().unwrap()]);
}

#[tokio::test]
async fn test_remove_hooks_fire_for_cascaded_records() {
    let lib = Library::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for hook in [Hook::PreRemove, Hook::PostRemove] {
        let log = log.clone();
        lib.engine.hooks().connect_fn(hook, None, move |class, record| {
            let log = log.clone();
            async move {
                log.lock().push((hook, class.key().to_string(), record.id()));
                Ok(())
            }
        });
    }
    let (author, books) = lib.author_with_books("ann").await;
    author.remove(&lib.db).await.unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 12);
    // deepest level first
    let classes: Vec<&str> = log.iter().map(|(_, class, _)| class.as_str()).collect();
    assert_eq!(&classes[..6], &[REVIEW; 6]);
    assert_eq!(&classes[6..10], &[BOOK; 4]);
    assert_eq!(&classes[10..], &[AUTHOR; 2]);
    let book_hooks: Vec<_> = log[6..10].iter().map(|(hook, _, id)| (*hook, *id)).collect();
    assert_eq!(
        book_hooks,
        vec![
            (Hook::PreRemove, books[0].id()),
            (Hook::PreRemove, books[1].id()),
            (Hook::PostRemove, books[0].id()),
            (Hook::PostRemove, books[1].id()),
        ]
    );
}

#[tokio::test]
async fn test_remove_skips_records_already_gone() {
    let lib = Library::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for hook in [Hook::PreRemove, Hook::PostRemove] {
        let log = log.clone();
        lib.engine.hooks().connect_fn(hook, Some(AUTHOR), move |_, record| {
            let log = log.clone();
            async move {
                log.lock().push((hook, record.id()));
                Ok(())
            }
        });
    }
    let ann = lib.create(AUTHOR, vec![("name", "ann".into())]).await;
    let bob = lib.create(AUTHOR, vec![("name", "bob".into())]).await;
    let stale = ann.clone();

    assert_eq!(ann.remove(&lib.db).await.unwrap().removed, 1);
    let again = stale.remove(&lib.db).await.unwrap();
    assert_eq!(again, Default::default());
    assert_eq!(log.lock().len(), 2);

    let outcome = lib
        .engine
        .objects(AUTHOR)
        .unwrap()
        .set_db(lib.db.clone())
        .remove_records(vec![stale, bob.clone()])
        .await
        .unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(
        *log.lock(),
        vec![
            (Hook::PreRemove, ann.id()),
            (Hook::PostRemove, ann.id()),
            (Hook::PreRemove, bob.id()),
            (Hook::PostRemove, bob.id()),
        ]
    );
    assert_eq!(lib.stored("author"), 0);
}

#[tokio::test]
async fn test_failing_pre_remove_keeps_record() {
    let lib = Library::new();
    lib.engine
        .hooks()
        .connect_fn(Hook::PreRemove, Some(AUTHOR), |_, _| async move {
            Err(Error::Operation("authors are forever".into()))
        });
    let author = lib.create(AUTHOR, vec![("name", "ann".into())]).await;
    assert!(author.remove(&lib.db).await.is_err());
    assert_eq!(lib.stored("author"), 1);
}

async fn node_chain(lib: &Library, len: usize) -> Vec<Record> {
    let mut nodes: Vec<Record> = Vec::new();
    for i in 0..len {
        let mut fields = vec![("name", Value::from(format!("n{}", i)))];
        if let Some(parent) = nodes.last() {
            fields.push(("parent", parent.clone().into()));
        }
        nodes.push(lib.create(NODE, fields).await);
    }
    nodes
}

#[tokio::test]
async fn test_cascade_depth_limit() {
    let lib = Library::with_config(EngineConfig::new().without_retry().with_max_cascade_depth(2));
    let nodes = node_chain(&lib, 5).await;

    let err = nodes[0].remove(&lib.db).await.unwrap_err();
    assert!(matches!(err, Error::CascadeDepthExceeded { .. }));
    assert_eq!(lib.stored("node"), 5);

    let outcome = nodes[2].remove(&lib.db).await.unwrap();
    assert_eq!(outcome.total_removed(), 3);
    assert_eq!(lib.stored("node"), 2);
}

#[tokio::test]
async fn test_cascade_cycle_terminates() {
    let lib = Library::new();
    let mut first = lib.create(NODE, vec![("name", "first".into())]).await;
    let second = lib
        .create(NODE, vec![("name", "second".into()), ("parent", first.clone().into())])
        .await;
    first.set("parent", second.clone()).unwrap();
    first.save(&lib.db).await.unwrap();

    let outcome = second.remove(&lib.db).await.unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.cascaded, 1);
    assert_eq!(lib.stored("node"), 0);
}

#[tokio::test]
async fn test_unsaved_record_cannot_be_removed() {
    let lib = Library::new();
    let author = lib.engine.new_record(AUTHOR).unwrap();
    let err = author.remove(&lib.db).await.unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
}
