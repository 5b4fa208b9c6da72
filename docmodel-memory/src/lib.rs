//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Full query support** - Filters, sorts, projections and pagination evaluated in process
//! - **Unique indexes** - Duplicate keys are rejected on insert and update
//! - **Aggregation** - Match, project, sort, group, unwind and count stages
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//! }
//!
//! impl Schema for User {
//!     fn model_name() -> &'static str { "User" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let connection = Connection::new(backend);
//!     let users = connection.model::<User>()?;
//!
//!     users.create_one(User { name: "Alice".to_string() }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

mod aggregate;
mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
