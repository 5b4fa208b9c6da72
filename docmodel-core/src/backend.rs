//! Storage backend abstraction for models.
//!
//! This module defines the traits that abstract over the document store a connection wraps.
//! The model and document facades never touch a database directly: every finder, update,
//! delete, aggregation and index operation is shaped into one call on a [`StoreBackend`],
//! and the backend's answer is shaped back into typed documents.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Stored documents
//!
//! Backends receive documents as `(id, body)` pairs and must return stored documents with
//! the identifier under `_id` (as a BSON UUID). Everything else in a stored document is
//! opaque to the backend, including the version key maintained by the facade.
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::StoreBackend;
//! use bson::{Uuid, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let id = Uuid::new();
//! backend.insert_documents(vec![(id, doc! { "name": "Alice", "age": 30 })], "users").await?;
//! let found = backend.find_documents(Filter::id(id).into(), "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use std::{any::Any, fmt::Debug};

use crate::{
    error::DocumentStoreResult,
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    pipeline::Pipeline,
    query::{Expr, Query, SortDirection},
    update::Update,
};

/// Raw result of an update operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents matched by the filter.
    pub matched: u64,
    /// Number of documents actually changed.
    pub modified: u64,
    /// Identifier of the document inserted by an upsert.
    pub upserted_id: Option<Uuid>,
}

/// Raw result of a delete operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Number of documents removed.
    pub deleted: u64,
}

/// Description of a collection index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Indexed fields with their key direction.
    pub fields: Vec<(String, SortDirection)>,
    /// Reject writes producing two documents with the same key.
    pub unique: bool,
    /// Explicit index name. Derived from the keys when absent.
    pub name: Option<String>,
}

impl IndexSpec {
    /// Single-field ascending index.
    pub fn on(field: impl Into<String>) -> Self {
        IndexSpec {
            fields: vec![(field.into(), SortDirection::Asc)],
            unique: false,
            name: None,
        }
    }

    /// Adds another key to a compound index.
    pub fn and(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.fields.push((field.into(), direction));
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The index name, e.g. `email_1` or `last_1_first_-1`.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .fields
                .iter()
                .map(|(field, direction)| match direction {
                    SortDirection::Asc => format!("{}_1", field),
                    SortDirection::Desc => format!("{}_-1", field),
                })
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Backends report their own failures as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend) unless a more
/// specific variant applies (duplicate ids, unique index violations, missing collections).
/// The facade passes these errors on unchanged.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// The collection is created if it doesn't exist. Inserting an id that is already
    /// stored fails with `DocumentAlreadyExists`.
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Returns the documents matching a query, honoring its projection, sort, offset and limit.
    ///
    /// Without sort keys, documents are returned in insertion order. A missing collection
    /// yields an empty result.
    async fn find_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching a filter (all documents when `None`).
    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<u64>;

    /// Returns the distinct values stored at `field` among matching documents.
    ///
    /// Array values contribute each of their elements.
    async fn distinct(
        &self,
        field: &str,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Applies an update to the first match, or to every match when `options.multi` is set.
    ///
    /// With `options.upsert` and no match, a document is created from the filter's equality
    /// constraints plus the update (including `$setOnInsert` operators).
    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Atomically updates one document and returns it, before or after the update depending
    /// on `options.return_new`.
    ///
    /// Returns `None` when nothing matched and no document was upserted, or when an upsert
    /// happened but the pre-update document was requested.
    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Deletes the first match, or every match when `multi` is set.
    async fn delete_documents(
        &self,
        filter: Option<Expr>,
        multi: bool,
        collection: &str,
    ) -> DocumentStoreResult<DeleteOutcome>;

    /// Atomically deletes one document and returns it.
    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Runs an aggregation pipeline over a collection.
    async fn aggregate(
        &self,
        pipeline: Pipeline,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Creates a new, empty collection. Creating an existing collection is not an error.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops (deletes) a collection and all its documents.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an index and returns its name.
    ///
    /// Creating an identical index again is a no-op. A unique index fails to build when
    /// existing documents already violate it.
    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String>;

    /// Removes an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()>;

    /// Lists the indexes of a collection, excluding the implicit `_id` index.
    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Object-safe mirror of [`StoreBackend`], implemented for every backend.
///
/// Used by [`Connection::into_dyn`](crate::connection::Connection::into_dyn) to erase the
/// backend type.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;
    async fn find_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;
    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<u64>;
    async fn distinct(
        &self,
        field: &str,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;
    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome>;
    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;
    async fn delete_documents(
        &self,
        filter: Option<Expr>,
        multi: bool,
        collection: &str,
    ) -> DocumentStoreResult<DeleteOutcome>;
    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;
    async fn aggregate(
        &self,
        pipeline: Pipeline,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;
    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String>;
    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()>;
    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>>;
    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        StoreBackend::insert_documents(self, documents, collection).await
    }

    async fn find_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        StoreBackend::find_documents(self, query, collection).await
    }

    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<u64> {
        StoreBackend::count_documents(self, filter, collection).await
    }

    async fn distinct(
        &self,
        field: &str,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        StoreBackend::distinct(self, field, filter, collection).await
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome> {
        StoreBackend::update_documents(self, filter, update, options, collection).await
    }

    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        StoreBackend::find_one_and_update(self, filter, update, options, collection).await
    }

    async fn delete_documents(
        &self,
        filter: Option<Expr>,
        multi: bool,
        collection: &str,
    ) -> DocumentStoreResult<DeleteOutcome> {
        StoreBackend::delete_documents(self, filter, multi, collection).await
    }

    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        StoreBackend::find_one_and_delete(self, filter, options, collection).await
    }

    async fn aggregate(
        &self,
        pipeline: Pipeline,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        StoreBackend::aggregate(self, pipeline, collection).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        StoreBackend::create_collection(self, name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        StoreBackend::drop_collection(self, name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        StoreBackend::list_collections(self).await
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String> {
        StoreBackend::create_index(self, collection, index).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        StoreBackend::drop_index(self, collection, name).await
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>> {
        StoreBackend::list_indexes(self, collection).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()> {
        StoreBackend::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A type-erased backend is itself a backend, so connections can be generic over either.
#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self).insert_documents(documents, collection).await
    }

    async fn find_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self).find_documents(query, collection).await
    }

    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<u64> {
        (**self).count_documents(filter, collection).await
    }

    async fn distinct(
        &self,
        field: &str,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        (**self).distinct(field, filter, collection).await
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self).update_documents(filter, update, options, collection).await
    }

    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self).find_one_and_update(filter, update, options, collection).await
    }

    async fn delete_documents(
        &self,
        filter: Option<Expr>,
        multi: bool,
        collection: &str,
    ) -> DocumentStoreResult<DeleteOutcome> {
        (**self).delete_documents(filter, multi, collection).await
    }

    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        (**self).find_one_and_delete(filter, options, collection).await
    }

    async fn aggregate(
        &self,
        pipeline: Pipeline,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self).aggregate(pipeline, collection).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String> {
        (**self).create_index(collection, index).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_index(collection, name).await
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>> {
        (**self).list_indexes(collection).await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown_boxed().await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
