//! Untyped access to a single collection.
//!
//! A [`Collection`] forwards raw BSON documents to the backend with its name filled in.
//! [`Model`](crate::model::Model) builds on it for typed access; it is also handed out by
//! [`Connection::collection`](crate::connection::Connection::collection) for code that
//! works on documents without a schema.
//!
//! # Example
//!
//! ```ignore
//! use bson::{Uuid, doc};
//!
//! let logs = connection.collection("audit_log");
//! logs.insert(vec![(Uuid::new(), doc! { "action": "login" })]).await?;
//! let count = logs.count(Some(Filter::eq("action", "login"))).await?;
//! ```

use bson::{Bson, Document, Uuid};

use crate::{
    backend::{DeleteOutcome, IndexSpec, StoreBackend, UpdateOutcome},
    error::DocumentStoreResult,
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    pipeline::Pipeline,
    query::{Expr, Query},
    update::Update,
};

/// An untyped collection with a reference to a storage backend.
///
/// Every method validates its arguments before reaching the backend, so backends only see
/// well-formed paths, updates and pipelines.
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts new documents. Fails if any id is already stored.
    pub async fn insert(&self, documents: Vec<(Uuid, Document)>) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        self.backend.insert_documents(documents, &self.name).await
    }

    /// Queries documents using a structured query.
    pub async fn find(&self, query: Query) -> DocumentStoreResult<Vec<Document>> {
        query.validate()?;
        self.backend.find_documents(query, &self.name).await
    }

    /// Returns the first document matching `query`, ignoring any limit it carries.
    pub async fn find_one(&self, mut query: Query) -> DocumentStoreResult<Option<Document>> {
        query.limit = Some(1);
        Ok(self.find(query).await?.into_iter().next())
    }

    pub async fn count(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        validate_filter(&filter)?;
        self.backend.count_documents(filter, &self.name).await
    }

    pub async fn distinct(&self, field: &str, filter: Option<Expr>) -> DocumentStoreResult<Vec<Bson>> {
        Expr::Exists(field.to_string(), true).validate()?;
        validate_filter(&filter)?;
        self.backend.distinct(field, filter, &self.name).await
    }

    /// Applies `update` to the first match, or to every match with `options.multi`.
    pub async fn update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        validate_filter(&filter)?;
        update.validate()?;
        self.backend
            .update_documents(filter, update, options, &self.name)
            .await
    }

    pub async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        validate_filter(&filter)?;
        update.validate()?;
        if let Some(projection) = &options.projection {
            projection.validate()?;
        }

        self.backend
            .find_one_and_update(filter, update, options, &self.name)
            .await
    }

    /// Deletes the first match, or every match with `multi`.
    pub async fn delete(&self, filter: Option<Expr>, multi: bool) -> DocumentStoreResult<DeleteOutcome> {
        validate_filter(&filter)?;
        self.backend.delete_documents(filter, multi, &self.name).await
    }

    pub async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        validate_filter(&filter)?;
        if let Some(projection) = &options.projection {
            projection.validate()?;
        }

        self.backend
            .find_one_and_delete(filter, options, &self.name)
            .await
    }

    pub async fn aggregate(&self, pipeline: Pipeline) -> DocumentStoreResult<Vec<Document>> {
        pipeline.validate()?;
        self.backend.aggregate(pipeline, &self.name).await
    }

    /// Creates an index and returns its name.
    pub async fn create_index(&self, index: IndexSpec) -> DocumentStoreResult<String> {
        for (field, _) in &index.fields {
            Expr::Exists(field.clone(), true).validate()?;
        }

        self.backend.create_index(&self.name, index).await
    }

    pub async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_index(&self.name, name).await
    }

    pub async fn list_indexes(&self) -> DocumentStoreResult<Vec<IndexSpec>> {
        self.backend.list_indexes(&self.name).await
    }
}

fn validate_filter(filter: &Option<Expr>) -> DocumentStoreResult<()> {
    match filter {
        Some(filter) => filter.validate(),
        None => Ok(()),
    }
}
