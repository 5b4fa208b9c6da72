//! Typed models and change-tracked documents over a pluggable document store.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Connections** ([`connection`]) - A backend plus the registry of models defined on it
//! - **Schemas** ([`schema`]) - The trait every model's field type implements
//! - **Models** ([`model`]) - Finders, bulk writes, aggregation and index management
//! - **Documents** ([`document`]) - Single records with change tracking, versioning and saving
//! - **Population** ([`populate`]) - Resolving references between models
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query, update and pipeline descriptions** ([`query`], [`update`], [`pipeline`])
//! - **Events** ([`events`]) - Synchronous listeners on models and documents
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
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
//!     fn model_name() -> &'static str {
//!         "User"
//!     }
//! }
//!
//! let connection = Connection::new(InMemoryStore::new());
//! let users = connection.model::<User>()?;
//! let mut ada = users.create_one(User { name: "Ada".into(), age: 36 }).await?;
//! ada.get_mut().age = 37;
//! ada.save().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod aggregate;
pub mod backend;
pub mod callback;
pub mod collection;
pub mod connection;
pub mod document;
pub mod error;
pub mod events;
pub mod model;
pub mod options;
pub mod path;
pub mod pipeline;
pub mod populate;
pub mod query;
pub mod schema;
pub mod update;
