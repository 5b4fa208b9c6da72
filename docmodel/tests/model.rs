mod common;

use bson::{Bson, Uuid};
use common::{Account, Order, User, connection};
use docmodel::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[tokio::test]
async fn find_returns_a_list_for_any_filter() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    users
        .insert_many([User::new("Ada", "ada@example.com", 36), User::new("Bob", "bob@example.com", 17)])
        .await
        .unwrap();

    assert_eq!(users.find(Query::new()).await.unwrap().len(), 2);
    assert_eq!(users.find(Filter::gte("age", 18)).await.unwrap().len(), 1);
    assert!(users.find(Filter::eq("missing", 1)).await.unwrap().is_empty());

    let sorted = users
        .find(Query::builder().sort("age", SortDirection::Asc).build())
        .await
        .unwrap();
    assert_eq!(sorted[0].get().name, "Bob");
}

#[tokio::test]
async fn find_by_id_with_unknown_id_is_none() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();

    assert!(users.find_by_id(Uuid::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn find_one_and_update_upsert_returns_the_new_document() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();

    let created = users
        .find_one_and_update(
            Filter::eq("email", "ada@example.com"),
            Update::new().set("name", "Ada").set("age", 36),
            FindOneAndUpdateOptions::new().upsert(true).return_new(true),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.get(), &User::new("Ada", "ada@example.com", 36));
    assert_eq!(created.version(), 0);
    assert!(created.created_at().is_some());
    assert_eq!(users.count(None::<Expr>).await.unwrap(), 1);
}

#[tokio::test]
async fn find_one_and_update_returns_the_previous_state_by_default() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    let before = users
        .find_by_id_and_update(ada.id(), Update::new().inc("age", 1), FindOneAndUpdateOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.get().age, 36);

    let missing = users
        .find_one_and_update(
            Filter::eq("email", "nobody@example.com"),
            Update::new().set("age", 1),
            FindOneAndUpdateOptions::new(),
        )
        .await
        .unwrap();
    assert!(missing.is_none());

    let upserted = users
        .find_one_and_update(
            Filter::eq("email", "eve@example.com"),
            Update::new().set("name", "Eve").set("age", 20),
            FindOneAndUpdateOptions::new().upsert(true),
        )
        .await
        .unwrap();
    assert!(upserted.is_none());
    assert_eq!(users.count(Filter::eq("name", "Eve")).await.unwrap(), 1);

    let reloaded = users.find_by_id(ada.id()).await.unwrap().unwrap();
    assert_eq!(reloaded.get().age, 37);
}

#[tokio::test]
async fn find_and_delete_returns_the_removed_document() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let first = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();
    accounts
        .create_one(Account { owner: "Bob".into(), balance: 30 })
        .await
        .unwrap();

    let richest = accounts
        .find_one_and_remove(None::<Expr>, FindOneAndDeleteOptions::new().sort("balance", SortDirection::Desc))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(richest.get().owner, "Bob");

    let removed = accounts.find_by_id_and_delete(first.id()).await.unwrap();
    assert_eq!(removed.map(|account| account.id()), Some(first.id()));
    assert!(accounts.find_by_id_and_remove(first.id()).await.unwrap().is_none());
    assert_eq!(accounts.count(None::<Expr>).await.unwrap(), 0);
}

#[tokio::test]
async fn hydrate_builds_stored_documents_without_io() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let id = Uuid::new();

    let account = accounts
        .hydrate(bson::doc! { "_id": id, "owner": "Ada", "balance": 10_i64, "__v": 3_i64 })
        .unwrap();
    assert!(!account.is_new());
    assert_eq!(account.id(), id);
    assert_eq!(account.version(), 3);
    assert!(!account.is_modified(None).unwrap());

    assert!(accounts.hydrate(bson::doc! { "owner": "Ada", "balance": 10_i64 }).is_err());
}

#[tokio::test]
async fn empty_updates_are_rejected_before_reaching_the_store() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();

    let err = users
        .update_one(None::<Expr>, Update::new(), UpdateOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn increments_past_the_integer_range_are_rejected() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let account = accounts
        .create_one(Account { owner: "Ada".into(), balance: i64::MAX })
        .await
        .unwrap();

    let err = accounts
        .update_one(Filter::id(account.id()), Update::new().inc("balance", 1_i64), UpdateOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));

    let err = accounts
        .find_by_id_and_update(account.id(), Update::new().inc("balance", 1_i64), FindOneAndUpdateOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));

    let stored = accounts.find_by_id(account.id()).await.unwrap().unwrap();
    assert_eq!(stored.get().balance, i64::MAX);
}

#[tokio::test]
async fn bulk_updates_and_deletes_report_counts() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    users
        .create([
            User::new("Ada", "ada@example.com", 36),
            User::new("Bob", "bob@example.com", 17),
            User::new("Cy", "cy@example.com", 52),
        ])
        .await
        .unwrap();

    let outcome = users
        .update_many(Filter::gte("age", 18), Update::new().push("tags", "adult"), UpdateOptions::new())
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.modified), (2, 2));

    let tags = users.distinct("tags", None::<Expr>).await.unwrap();
    assert_eq!(tags, vec![Bson::from("adult")]);

    let deleted = users.delete_one(Filter::eq("tags", "adult")).await.unwrap();
    assert_eq!(deleted.deleted, 1);
    let deleted = users.remove(None::<Expr>).await.unwrap();
    assert_eq!(deleted.deleted, 2);
}

#[tokio::test]
async fn create_validates_everything_before_writing() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();

    let err = users
        .create([User::new("Ada", "ada@example.com", 36), User::new("", "anon@example.com", -1)])
        .await
        .unwrap_err();

    match err {
        DocumentStoreError::Validation(errors) => {
            assert_eq!(errors.error_for("name"), Some("name is required"));
            assert!(errors.error_for("age").is_some());
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert_eq!(users.count(None::<Expr>).await.unwrap(), 0);
}

#[tokio::test]
async fn unique_indexes_reject_duplicate_keys() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();

    let built = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&built);
    users.once("index", move |payload| sink.lock().push(payload.clone()));

    users.init().await.unwrap();
    assert_eq!(*built.lock(), vec![Bson::Null]);
    assert_eq!(users.list_indexes().await.unwrap(), vec![IndexSpec::on("email").unique(true)]);

    users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();
    let err = users
        .create_one(User::new("Imposter", "ada@example.com", 30))
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::DuplicateKey(ref index, _) if index == "email_1"));
}

#[tokio::test]
async fn failed_index_builds_are_emitted_as_errors() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    users
        .insert_many([User::new("Ada", "same@example.com", 36), User::new("Bob", "same@example.com", 17)])
        .await
        .unwrap();

    let errors = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&errors);
    users.on("error", move |_| *sink.lock() += 1);

    assert!(users.ensure_indexes().await.is_err());
    assert_eq!(*errors.lock(), 1);
}

#[tokio::test]
async fn registry_rejects_conflicting_models() {
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct OtherUser {
        name: String,
    }

    impl Schema for OtherUser {
        fn model_name() -> &'static str {
            "User"
        }
    }

    let connection = connection();
    connection.model::<User>().unwrap();
    connection.model::<User>().unwrap();

    assert!(matches!(connection.model::<OtherUser>(), Err(DocumentStoreError::OverwriteModel(_))));
    assert!(matches!(
        connection.lookup::<Order>("User"),
        Err(DocumentStoreError::ModelTypeMismatch(..))
    ));
    assert!(matches!(connection.lookup::<Order>("Order"), Err(DocumentStoreError::MissingModel(_))));
    assert_eq!(connection.model_names(), vec!["User".to_string()]);

    assert!(connection.delete_model("User"));
    assert!(!connection.has_model("User"));
    connection.model::<OtherUser>().unwrap();
}

#[tokio::test]
async fn models_share_their_emitter_across_handles() {
    let connection = connection();
    let first = connection.model::<Account>().unwrap();
    let second = connection.lookup::<Account>("Account").unwrap();

    first.on("audit", |_| {});
    assert_eq!(second.listener_count("audit"), 1);
}

#[tokio::test]
async fn shutdown_requires_the_last_handle() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();

    let err = connection.clone().shutdown().await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));

    drop(accounts);
    connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn erased_backends_behave_the_same() {
    let connection = connection().into_dyn().unwrap();
    let accounts = connection.model::<Account>().unwrap();

    let account = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();

    let found = accounts.find_by_id(account.id()).await.unwrap().unwrap();
    assert_eq!(found.get().balance, 10);
    assert_eq!(connection.list_collections().await.unwrap(), vec!["accounts".to_string()]);
}

#[tokio::test]
async fn callbacks_receive_each_result_once() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    users
        .find_by_id(ada.id())
        .node_callback(move |err, found| {
            sink.lock()
                .push((err.is_none(), found.flatten().map(|user| user.get().name.clone())));
        })
        .await;

    let sink = Arc::clone(&seen);
    users
        .update_one(None::<Expr>, Update::new(), UpdateOptions::new())
        .node_callback(move |err, outcome| {
            sink.lock().push((err.is_none(), outcome.map(|_| String::new())));
        })
        .await;

    assert_eq!(
        *seen.lock(),
        vec![(true, Some("Ada".to_string())), (false, None)]
    );
}
