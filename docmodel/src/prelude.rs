//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```

pub use docmodel_core::{
    aggregate::Aggregate,
    backend::{DynStoreBackend, IndexSpec, StoreBackend, StoreBackendBuilder},
    callback::CallbackExt,
    collection::Collection,
    connection::Connection,
    document::{Document, ToObjectOptions, Transform},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    events::{Emitter, EventEmitter, ListenerId},
    model::Model,
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    pipeline::{Accumulator, Pipeline, Stage},
    populate::{PopulateOptions, Ref},
    query::{Expr, FieldOp, Filter, Projection, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    schema::{Reference, Schema, SchemaExt, SchemaOptions},
    update::{Update, UpdateOp},
};

pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
