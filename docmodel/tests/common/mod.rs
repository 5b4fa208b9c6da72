#![allow(dead_code)]

use docmodel::prelude::*;
use serde::{Deserialize, Serialize};

pub type Store = InMemoryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    pub age: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl User {
    pub fn new(name: &str, email: &str, age: i32) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            age,
            tags: Vec::new(),
        }
    }
}

impl Schema for User {
    fn model_name() -> &'static str {
        "User"
    }

    fn options() -> SchemaOptions {
        SchemaOptions::default().timestamps(true)
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::on("email").unique(true)]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::new()
            .check(!self.name.is_empty(), "name", "name is required")
            .check(self.age >= 0, "age", "age must not be negative")
            .into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,
    pub balance: i64,
}

impl Schema for Account {
    fn model_name() -> &'static str {
        "Account"
    }

    fn options() -> SchemaOptions {
        SchemaOptions::default().optimistic_concurrency(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    pub author: Ref<User>,
    #[serde(default)]
    pub reviewers: Vec<Ref<User>>,
}

impl Schema for Post {
    fn model_name() -> &'static str {
        "Post"
    }

    fn references() -> Vec<Reference> {
        vec![Reference::new("author", "User"), Reference::new("reviewers", "User")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub customer: String,
    pub amount: i32,
    #[serde(default)]
    pub items: Vec<String>,
}

impl Schema for Order {
    fn model_name() -> &'static str {
        "Order"
    }
}

/// Declares both timestamp fields itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: bson::DateTime,
}

impl Schema for Note {
    fn model_name() -> &'static str {
        "Note"
    }

    fn options() -> SchemaOptions {
        SchemaOptions::default().timestamps(true)
    }
}

pub fn connection() -> Connection<Store> {
    Connection::new(InMemoryStore::new())
}
