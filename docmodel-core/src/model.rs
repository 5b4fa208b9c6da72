//! Typed access to the documents of one registered schema.
//!
//! A [`Model`] is obtained from [`Connection::model`](crate::connection::Connection::model)
//! and provides the finders, bulk writes, aggregation, index management and population for
//! its schema. Finders return [`Document`] facades that track changes and save themselves.
//!
//! Singular finders resolve to `Ok(None)` when nothing matches. Writes that would go out
//! empty or address malformed paths fail with
//! [`DocumentStoreError::InvalidArgument`](crate::error::DocumentStoreError::InvalidArgument)
//! before anything is sent to the backend.
//!
//! # Example
//!
//! ```ignore
//! let users = connection.model::<User>()?;
//!
//! let mut ada = users.create_one(User { name: "Ada".into(), age: 36 }).await?;
//! ada.get_mut().age += 1;
//! ada.save().await?;
//!
//! let adults = users.find(Filter::gte("age", 18)).await?;
//! let renamed = users
//!     .find_by_id_and_update(ada.id(), Update::new().set("name", "Ada L."), FindOneAndUpdateOptions::new().return_new(true))
//!     .await?;
//! ```

use bson::{Bson, Document as BsonDocument, Uuid};
use chrono::Utc;
use std::{fmt, marker::PhantomData};
use tracing::{debug, warn};

use crate::{
    aggregate::Aggregate,
    backend::{DeleteOutcome, IndexSpec, StoreBackend, UpdateOutcome},
    collection::Collection,
    connection::{Connection, RegisteredModel},
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    events::{Emitter, EventEmitter},
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    pipeline::Pipeline,
    populate::{PopulateOptions, populate_documents},
    query::{Expr, Filter, Query},
    schema::{CREATED_AT, Schema, SchemaOptions, UPDATED_AT},
    update::Update,
};

/// Handle to a registered model.
///
/// Cheap to clone; clones share the connection and the model's event emitter.
pub struct Model<B: StoreBackend, T: Schema> {
    connection: Connection<B>,
    registered: RegisteredModel,
    _schema: PhantomData<fn() -> T>,
}

impl<B: StoreBackend, T: Schema> Clone for Model<B, T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            registered: self.registered.clone(),
            _schema: PhantomData,
        }
    }
}

impl<B: StoreBackend, T: Schema> fmt::Debug for Model<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &T::model_name())
            .field("collection", &self.registered.collection)
            .finish()
    }
}

impl<B: StoreBackend, T: Schema> Emitter for Model<B, T> {
    fn emitter(&self) -> &EventEmitter {
        &self.registered.emitter
    }
}

impl<B: StoreBackend, T: Schema> Model<B, T> {
    pub(crate) fn new(connection: Connection<B>, registered: RegisteredModel) -> Self {
        Self { connection, registered, _schema: PhantomData }
    }

    /// Name the model is registered under.
    pub fn name(&self) -> &'static str {
        T::model_name()
    }

    pub fn collection_name(&self) -> &str {
        &self.registered.collection
    }

    /// Untyped handle to the backing collection.
    pub fn collection(&self) -> Collection<'_, B> {
        self.connection.collection(&self.registered.collection)
    }

    pub fn connection(&self) -> &Connection<B> {
        &self.connection
    }

    pub fn schema_options(&self) -> SchemaOptions {
        T::options()
    }

    /// Looks up another model registered on the same connection.
    pub fn model<U: Schema>(&self, name: &str) -> DocumentStoreResult<Model<B, U>> {
        self.connection.lookup::<U>(name)
    }

    /// Builds an unsaved document with a fresh id.
    pub fn new_document(&self, fields: T) -> Document<B, T> {
        Document::new(self.clone(), Uuid::new(), fields)
    }

    pub fn new_document_with_id(&self, id: Uuid, fields: T) -> Document<B, T> {
        Document::new(self.clone(), id, fields)
    }

    /// Builds a document from its stored form without touching the backend.
    ///
    /// The result is not new: saving it writes only what changes afterwards.
    pub fn hydrate(&self, raw: BsonDocument) -> DocumentStoreResult<Document<B, T>> {
        Document::from_stored(self.clone(), raw, None)
    }

    /// Returns every document matching `query`.
    ///
    /// `query` is either a filter [`Expr`] or a full [`Query`] with projection, sort,
    /// offset and limit. Documents loaded with a projection report unselected paths through
    /// [`Document::is_selected`].
    pub async fn find(&self, query: impl Into<Query>) -> DocumentStoreResult<Vec<Document<B, T>>> {
        let query = query.into();
        let selection = query.projection.clone();
        debug!(model = self.name(), ?query, "find");

        self.collection()
            .find(query)
            .await?
            .into_iter()
            .map(|raw| Document::from_stored(self.clone(), raw, selection.clone()))
            .collect()
    }

    pub async fn find_one(&self, query: impl Into<Query>) -> DocumentStoreResult<Option<Document<B, T>>> {
        let query = query.into();
        let selection = query.projection.clone();
        debug!(model = self.name(), ?query, "find_one");

        self.collection()
            .find_one(query)
            .await?
            .map(|raw| Document::from_stored(self.clone(), raw, selection))
            .transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> DocumentStoreResult<Option<Document<B, T>>> {
        self.find_one(Filter::id(id)).await
    }

    /// Atomically updates the first match and returns it.
    ///
    /// Resolves to the document as it was before the update unless `options.return_new`
    /// is set. With `options.upsert`, a document is created when nothing matches; its
    /// version starts at zero.
    pub async fn find_one_and_update(
        &self,
        filter: impl Into<Option<Expr>>,
        update: Update,
        options: FindOneAndUpdateOptions,
    ) -> DocumentStoreResult<Option<Document<B, T>>> {
        let filter = filter.into();
        update.validate()?;
        let update = self.prepare_update(update, options.upsert);
        let selection = options.projection.clone();
        debug!(model = self.name(), ?filter, ?options, "find_one_and_update");

        self.collection()
            .find_one_and_update(filter, update, options)
            .await?
            .map(|raw| Document::from_stored(self.clone(), raw, selection))
            .transpose()
    }

    pub async fn find_by_id_and_update(
        &self,
        id: Uuid,
        update: Update,
        options: FindOneAndUpdateOptions,
    ) -> DocumentStoreResult<Option<Document<B, T>>> {
        self.find_one_and_update(Filter::id(id), update, options).await
    }

    /// Atomically removes the first match and returns it.
    pub async fn find_one_and_delete(
        &self,
        filter: impl Into<Option<Expr>>,
        options: FindOneAndDeleteOptions,
    ) -> DocumentStoreResult<Option<Document<B, T>>> {
        let filter = filter.into();
        let selection = options.projection.clone();
        debug!(model = self.name(), ?filter, "find_one_and_delete");

        self.collection()
            .find_one_and_delete(filter, options)
            .await?
            .map(|raw| Document::from_stored(self.clone(), raw, selection))
            .transpose()
    }

    pub async fn find_by_id_and_delete(&self, id: Uuid) -> DocumentStoreResult<Option<Document<B, T>>> {
        self.find_one_and_delete(Filter::id(id), FindOneAndDeleteOptions::default())
            .await
    }

    /// Alias of [`Model::find_one_and_delete`].
    pub async fn find_one_and_remove(
        &self,
        filter: impl Into<Option<Expr>>,
        options: FindOneAndDeleteOptions,
    ) -> DocumentStoreResult<Option<Document<B, T>>> {
        self.find_one_and_delete(filter, options).await
    }

    /// Alias of [`Model::find_by_id_and_delete`].
    pub async fn find_by_id_and_remove(&self, id: Uuid) -> DocumentStoreResult<Option<Document<B, T>>> {
        self.find_by_id_and_delete(id).await
    }

    /// Validates every value, then saves them one by one in order.
    ///
    /// Nothing is written if any value fails validation. A backend failure part way
    /// through leaves the earlier documents stored.
    pub async fn create(&self, docs: impl IntoIterator<Item = T>) -> DocumentStoreResult<Vec<Document<B, T>>> {
        let mut documents = docs
            .into_iter()
            .map(|fields| self.new_document(fields))
            .collect::<Vec<_>>();

        for document in &documents {
            if let Some(err) = document.validate_sync() {
                return Err(err.into());
            }
        }

        for document in &mut documents {
            document.save().await?;
        }

        Ok(documents)
    }

    pub async fn create_one(&self, fields: T) -> DocumentStoreResult<Document<B, T>> {
        let mut document = self.new_document(fields);
        document.save().await?;
        Ok(document)
    }

    /// Validates every value, then stores them all with a single bulk insert.
    pub async fn insert_many(&self, docs: impl IntoIterator<Item = T>) -> DocumentStoreResult<Vec<Document<B, T>>> {
        let mut documents = docs
            .into_iter()
            .map(|fields| self.new_document(fields))
            .collect::<Vec<_>>();

        let mut bodies = Vec::with_capacity(documents.len());
        for document in &documents {
            if let Some(err) = document.validate_sync() {
                return Err(err.into());
            }
            bodies.push((document.id(), document.insert_body()?));
        }

        debug!(model = self.name(), count = bodies.len(), "insert_many");
        self.collection()
            .insert(bodies.iter().map(|(id, body)| (*id, body.clone())).collect())
            .await?;

        for (document, (_, body)) in documents.iter_mut().zip(bodies) {
            document.mark_inserted(&body)?;
        }

        Ok(documents)
    }

    pub async fn count(&self, filter: impl Into<Option<Expr>>) -> DocumentStoreResult<u64> {
        self.collection().count(filter.into()).await
    }

    /// Distinct values stored at `field` among the matching documents.
    pub async fn distinct(&self, field: &str, filter: impl Into<Option<Expr>>) -> DocumentStoreResult<Vec<Bson>> {
        self.collection().distinct(field, filter.into()).await
    }

    /// Updates the first match, or every match with `options.multi`.
    pub async fn update(
        &self,
        filter: impl Into<Option<Expr>>,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let filter = filter.into();
        update.validate()?;
        let update = self.prepare_update(update, options.upsert);
        debug!(model = self.name(), ?filter, ?options, "update");

        self.collection().update(filter, update, options).await
    }

    pub async fn update_one(
        &self,
        filter: impl Into<Option<Expr>>,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.update(filter, update, options.multi(false)).await
    }

    pub async fn update_many(
        &self,
        filter: impl Into<Option<Expr>>,
        update: Update,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.update(filter, update, options.multi(true)).await
    }

    pub async fn delete_one(&self, filter: impl Into<Option<Expr>>) -> DocumentStoreResult<DeleteOutcome> {
        let filter = filter.into();
        debug!(model = self.name(), ?filter, "delete_one");
        self.collection().delete(filter, false).await
    }

    pub async fn delete_many(&self, filter: impl Into<Option<Expr>>) -> DocumentStoreResult<DeleteOutcome> {
        let filter = filter.into();
        debug!(model = self.name(), ?filter, "delete_many");
        self.collection().delete(filter, true).await
    }

    /// Deletes every matching document.
    pub async fn remove(&self, filter: impl Into<Option<Expr>>) -> DocumentStoreResult<DeleteOutcome> {
        self.delete_many(filter).await
    }

    /// Starts an aggregation over the model's collection.
    ///
    /// Nothing runs until the returned handle is awaited or its stream is polled.
    pub fn aggregate(&self, pipeline: impl Into<Pipeline>) -> Aggregate<B> {
        Aggregate::new(
            self.connection.clone(),
            self.registered.collection.clone(),
            pipeline.into(),
        )
    }

    /// Creates every index declared by [`Schema::indexes`].
    ///
    /// Emits `"index"` when done, with `Null` on success or the error text on failure. A
    /// failure is also emitted as `"error"`.
    pub async fn ensure_indexes(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = Vec::new();

        for index in T::indexes() {
            match self.collection().create_index(index).await {
                Ok(name) => names.push(name),
                Err(err) => {
                    warn!(model = self.name(), error = %err, "failed to build index");
                    let message = err.to_string();
                    self.emit("error", message.clone());
                    self.emit("index", message);
                    return Err(err);
                }
            }
        }

        debug!(model = self.name(), indexes = ?names, "ensured indexes");
        self.emit("index", Bson::Null);

        Ok(names)
    }

    pub async fn list_indexes(&self) -> DocumentStoreResult<Vec<IndexSpec>> {
        self.collection().list_indexes().await
    }

    /// Creates the backing collection and its indexes.
    pub async fn init(&self) -> DocumentStoreResult<()> {
        self.connection
            .create_collection(&self.registered.collection)
            .await?;
        self.ensure_indexes().await?;

        Ok(())
    }

    /// Replaces references in `docs` with the documents they point to.
    ///
    /// Each option names a path holding an id or an array of ids; the referenced model
    /// comes from the option or from [`Schema::references`].
    pub async fn populate<O>(
        &self,
        docs: &mut [Document<B, T>],
        options: impl IntoIterator<Item = O>,
    ) -> DocumentStoreResult<()>
    where
        O: Into<PopulateOptions>,
    {
        let options = options.into_iter().map(Into::into).collect::<Vec<_>>();
        populate_documents(&self.connection, docs, options).await
    }

    /// Adds the writes the model maintains itself: timestamps, and the version key of
    /// upserted documents.
    fn prepare_update(&self, mut update: Update, upsert: bool) -> Update {
        let options = T::options();

        if options.timestamps {
            let now = bson::DateTime::from_chrono(Utc::now());
            if !update.touches(UPDATED_AT) {
                update = update.set(UPDATED_AT, now);
            }
            if upsert && !update.touches(CREATED_AT) {
                update = update.set_on_insert(CREATED_AT, now);
            }
        }

        if upsert && !update.touches(&options.version_key) {
            update = update.set_on_insert(options.version_key, 0i64);
        }

        update
    }

    /// Error for a write that expected `id` to be stored.
    pub(crate) fn not_found(&self, id: Uuid) -> DocumentStoreError {
        DocumentStoreError::DocumentNotFound(id.to_string(), self.registered.collection.clone())
    }
}
