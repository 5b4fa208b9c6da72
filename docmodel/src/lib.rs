//! Typed models and change-tracked documents over a pluggable document store.
//!
//! This crate is the primary entry point for users of docmodel. It re-exports the core
//! types from `docmodel-core` and provides access to the storage backends.
//!
//! # Features
//!
//! - **Model registry** - Register one model per name on a connection and look it up anywhere
//! - **Change tracking** - Documents know which paths changed and save only those
//! - **Optimistic concurrency** - Version counters guard saves against concurrent writers
//! - **Population** - Replace stored references with the documents they point to
//! - **Aggregation** - Composable pipelines, awaited directly or consumed as streams
//! - **Events** - Synchronous listeners on models and documents
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
//!     pub age: u32,
//! }
//!
//! impl Schema for User {
//!     fn model_name() -> &'static str { "User" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let connection = Connection::new(InMemoryStore::builder().build().await?);
//!     let users = connection.model::<User>()?;
//!
//!     let mut alice = users.create_one(User { name: "Alice".into(), age: 30 }).await?;
//!     alice.get_mut().age += 1;
//!     alice.save().await?;
//!
//!     let adults = users.find(Filter::gte("age", 18)).await?;
//!     println!("Adults: {:?}", adults.len());
//!
//!     // shutdown needs the last handle
//!     drop((alice, adults, users));
//!     connection.shutdown().await
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! A connection over a concrete backend can be turned into one over a boxed backend with
//! [`Connection::into_dyn`](connection::Connection::into_dyn), which allows choosing the
//! backend at runtime:
//!
//! ```ignore
//! let connection = Connection::new(InMemoryStore::new()).into_dyn()?;
//! let users = connection.model::<User>()?;
//! ```
//!
//! # Callbacks
//!
//! Every operation returns a future. Callers that prefer completion callbacks can attach
//! one with [`CallbackExt`](callback::CallbackExt):
//!
//! ```ignore
//! users
//!     .find_by_id(id)
//!     .node_callback(|error, user| match (error, user) {
//!         (Some(error), _) => eprintln!("lookup failed: {error}"),
//!         (None, found) => println!("found: {:?}", found.flatten().map(|u| u.id())),
//!     })
//!     .await;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    aggregate, backend, callback, collection, connection, document, error, events, model,
    options, path, pipeline, populate, query, schema, update,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
