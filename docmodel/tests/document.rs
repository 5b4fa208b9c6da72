mod common;

use bson::{Bson, doc};
use chrono::{TimeZone, Utc};
use common::{Account, Note, User, connection};
use docmodel::prelude::*;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[tokio::test]
async fn saving_twice_without_changes_succeeds() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let mut ada = users.new_document(User::new("Ada", "ada@example.com", 36));

    assert!(ada.is_new());
    ada.save().await.unwrap();
    assert!(!ada.is_new());
    assert!(!ada.is_modified(None).unwrap());

    ada.save().await.unwrap();
    ada.save().await.unwrap();
    assert_eq!(ada.version(), 0);
    assert_eq!(users.count(None::<Expr>).await.unwrap(), 1);
}

#[tokio::test]
async fn changes_are_tracked_by_path() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let mut ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    ada.get_mut().age = 37;
    ada.set_path("tags", vec!["math"]).unwrap();

    assert!(ada.is_modified(Some("age")).unwrap());
    assert!(!ada.is_modified(Some("name")).unwrap());
    assert_eq!(ada.modified_paths().unwrap(), vec!["age".to_string(), "tags".to_string()]);

    ada.unmark_modified("tags").unwrap();
    assert_eq!(ada.modified_paths().unwrap(), vec!["age".to_string()]);

    ada.save().await.unwrap();
    assert!(!ada.is_modified(None).unwrap());

    // tags were unmarked, so only the age reached the store
    let stored = users.find_by_id(ada.id()).await.unwrap().unwrap();
    assert_eq!(stored.get().age, 37);
    assert!(stored.get().tags.is_empty());
}

#[tokio::test]
async fn marked_paths_are_written_even_when_unchanged() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let mut ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    ada.mark_modified("name").unwrap();
    assert!(ada.is_modified(Some("name")).unwrap());

    ada.save().await.unwrap();
    assert!(!ada.is_modified(None).unwrap());
}

#[tokio::test]
async fn increment_moves_the_version_on_the_next_save() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let mut ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    ada.increment();
    ada.save().await.unwrap();
    assert_eq!(ada.version(), 1);

    let stored = users.find_by_id(ada.id()).await.unwrap().unwrap();
    assert_eq!(stored.version(), 1);
    assert_eq!(stored.get_path("__v").unwrap(), Some(Bson::Int64(1)));
}

#[tokio::test]
async fn stale_documents_conflict_under_optimistic_concurrency() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let account = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();

    let mut first = accounts.find_by_id(account.id()).await.unwrap().unwrap();
    let mut second = accounts.find_by_id(account.id()).await.unwrap().unwrap();

    first.get_mut().balance += 5;
    first.save().await.unwrap();
    assert_eq!(first.version(), 1);

    second.get_mut().balance -= 5;
    let err = second.save().await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::VersionConflict { version: 0, .. }));

    let stored = accounts.find_by_id(account.id()).await.unwrap().unwrap();
    assert_eq!(stored.get().balance, 15);
}

#[tokio::test]
async fn saving_a_removed_document_is_not_found() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let mut account = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();
    let mut copy = account.clone();

    account.remove().await.unwrap();
    assert!(matches!(account.remove().await, Err(DocumentStoreError::DocumentNotFound(..))));

    copy.get_mut().balance = 0;
    assert!(matches!(copy.save().await, Err(DocumentStoreError::DocumentNotFound(..))));
}

#[tokio::test]
async fn invalid_documents_are_not_saved() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let mut anon = users.new_document(User::new("", "anon@example.com", 20));

    assert!(anon.validate_sync().is_some());
    assert!(matches!(anon.save().await, Err(DocumentStoreError::Validation(_))));
    assert!(anon.is_new());
}

#[tokio::test]
async fn timestamps_are_maintained() {
    let connection = connection();
    let users = connection.model::<User>().unwrap();
    let before = Utc::now();
    let mut ada = users
        .create_one(User::new("Ada", "ada@example.com", 36))
        .await
        .unwrap();

    let created = ada.created_at().unwrap();
    // stored datetimes keep millisecond precision
    assert!(created.timestamp_millis() >= before.timestamp_millis());
    assert!(created <= Utc::now());
    assert_eq!(ada.updated_at(), Some(created));

    ada.get_mut().age = 37;
    ada.save().await.unwrap();
    assert!(ada.updated_at().unwrap() >= created);
    assert_eq!(ada.created_at(), Some(created));
}

#[tokio::test]
async fn declared_timestamp_fields_win_over_the_stamps() {
    let connection = connection();
    let notes = connection.model::<Note>().unwrap();
    let written = bson::DateTime::from_chrono(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap());

    let mut note = notes
        .create_one(Note { text: "draft".into(), created_at: written, updated_at: written })
        .await
        .unwrap();
    let object = note.to_object(&ToObjectOptions::new()).unwrap();
    assert_eq!(object.get_datetime("createdAt").unwrap(), &written);
    assert_eq!(object.get_datetime("updatedAt").unwrap(), &written);

    // a plain change stamps the declared field as well
    note.get_mut().text = "final".into();
    note.save().await.unwrap();
    let stamped = note.get().updated_at;
    assert!(stamped > written);
    assert_eq!(note.updated_at(), Some(stamped.to_chrono()));
    assert_eq!(note.to_object(&ToObjectOptions::new()).unwrap().get_datetime("updatedAt").unwrap(), &stamped);
    assert!(!note.is_modified(None).unwrap());

    // an explicit value is kept as written
    note.get_mut().updated_at = written;
    note.save().await.unwrap();
    let object = note.to_object(&ToObjectOptions::new()).unwrap();
    assert_eq!(object.get_datetime("updatedAt").unwrap(), &written);
    assert_eq!(object.get_datetime("createdAt").unwrap(), &written);
    assert_eq!(note.updated_at(), Some(written.to_chrono()));

    let stored = notes.find_by_id(note.id()).await.unwrap().unwrap();
    assert_eq!(stored.get().updated_at, written);
}

#[tokio::test]
async fn json_strings_parse_back_to_the_json_value() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let account = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();

    let options = ToObjectOptions::new().id(false);
    let text = account.to_json_string(&options).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(parsed, account.to_json_value(&options).unwrap());
    assert_eq!(parsed, json!({ "owner": "Ada", "balance": 10, "__v": 0 }));
}

#[tokio::test]
async fn projections_limit_what_is_selected() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Owner {
        owner: String,
    }

    impl Schema for Owner {
        fn model_name() -> &'static str {
            "Owner"
        }

        fn collection_name() -> String {
            "accounts".to_string()
        }
    }

    let owners = connection.model::<Owner>().unwrap();
    let found = owners
        .find_one(Query::builder().select(Projection::include(["owner"])).build())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.get().owner, "Ada");
    assert!(found.is_selected("owner"));
    assert!(!found.is_selected("balance"));
}

#[tokio::test]
async fn to_object_and_to_json_agree() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let account = accounts
        .create_one(Account { owner: "Ada".into(), balance: 10 })
        .await
        .unwrap();

    let options = ToObjectOptions::new();
    assert_eq!(account.to_object(&options).unwrap(), account.to_json(&options).unwrap());

    let options = ToObjectOptions::new()
        .id(false)
        .version_key(false)
        .transform(|object| {
            object.insert("kind", "account");
        });
    let object = account.to_object(&options).unwrap();
    assert_eq!(object, doc! { "owner": "Ada", "balance": 10_i64, "kind": "account" });
    assert_eq!(object, account.to_json(&options).unwrap());

    let value = account.to_json_value(&options).unwrap();
    assert_eq!(value["owner"], "Ada");
    assert_eq!(value["balance"], 10);
}

#[tokio::test]
async fn document_listeners_fire_once_and_on_save() {
    let connection = connection();
    let accounts = connection.model::<Account>().unwrap();
    let mut account = accounts.new_document(Account { owner: "Ada".into(), balance: 10 });

    let pings = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pings);
    account.once("ping", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(account.emit("ping", Bson::Null));
    assert!(!account.emit("ping", Bson::Null));
    assert_eq!(pings.load(Ordering::SeqCst), 1);

    let saves = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&saves);
    account.on("save", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    account.save().await.unwrap();
    account.get_mut().balance = 20;
    account.save().await.unwrap();
    assert_eq!(saves.load(Ordering::SeqCst), 2);
    assert_eq!(account.listener_count("save"), 1);
}
