use async_trait::async_trait;
use bson::{Bson, Document, Uuid, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        ClientOptions, FindOneAndDeleteOptions as MongoFindOneAndDeleteOptions,
        FindOneAndUpdateOptions as MongoFindOneAndUpdateOptions, FindOptions, ReturnDocument,
        UpdateOptions as MongoUpdateOptions,
    },
};
use tracing::debug;

use docmodel_core::{
    backend::{DeleteOutcome, IndexSpec, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    pipeline::Pipeline,
    query::{Expr, ID_FIELD, Query, id_from_bson},
    update::Update,
};

use crate::query::{
    MongoQueryTranslator, clamp_count, index_model, index_spec, pipeline_documents, projection_document,
    sort_document, update_document,
};

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Message and batch position of a duplicate key violation, if `error` is one.
fn duplicate_key(error: &MongoError) -> Option<(Option<usize>, String)> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => Some((None, e.message.clone())),
        ErrorKind::InsertMany(e) => e
            .write_errors
            .as_ref()?
            .iter()
            .find(|e| e.code == DUPLICATE_KEY)
            .map(|e| (Some(e.index), e.message.clone())),
        ErrorKind::Command(e) if e.code == DUPLICATE_KEY => Some((None, e.message.clone())),
        _ => None,
    }
}

fn is_namespace_not_found(error: &MongoError) -> bool {
    matches!(error.kind.as_ref(), ErrorKind::Command(e) if e.code == NAMESPACE_NOT_FOUND)
}

/// Index name out of a server message such as
/// `E11000 duplicate key error collection: app.users index: email_1 dup key: { ... }`.
fn index_name(message: &str) -> String {
    message
        .split("index: ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string()
}

fn map_error(error: MongoError, collection: &str) -> DocumentStoreError {
    match duplicate_key(&error) {
        Some((_, message)) => DocumentStoreError::DuplicateKey(index_name(&message), collection.to_string()),
        None => DocumentStoreError::Backend(error.to_string()),
    }
}

/// Adds a generated UUID `_id` to an upsert unless the filter pins one, so upserted
/// documents never receive a server-generated ObjectId.
fn with_upsert_id(filter: Option<&Expr>, mut update: Document) -> Document {
    let pinned = filter
        .map(|filter| filter.equality_constraints().iter().any(|(field, _)| *field == ID_FIELD))
        .unwrap_or(false);

    if !pinned {
        match update.get_mut("$setOnInsert") {
            Some(Bson::Document(fields)) => {
                fields.insert(ID_FIELD, Uuid::new());
            }
            _ => {
                update.insert("$setOnInsert", doc! { ID_FIELD: Uuid::new() });
            }
        }
    }

    update
}

/// MongoDB document storage backend.
///
/// Documents are stored as-is under their UUID `_id`; dotted paths in filters and updates
/// are passed to the server unchanged.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn prepare_document(id: Uuid, body: Document) -> Document {
        let mut stored = doc! { ID_FIELD: id };
        for (key, value) in body {
            if key != ID_FIELD {
                stored.insert(key, value);
            }
        }
        stored
    }

    async fn collection_exists(&self, name: &str) -> DocumentStoreResult<bool> {
        Ok(self.list_collections().await?.iter().any(|existing| existing == name))
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(&self, documents: Vec<(Uuid, Document)>, collection: &str) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let ids = documents.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let count = documents.len();

        self.get_collection(collection)
            .insert_many(
                documents
                    .into_iter()
                    .map(|(id, body)| Self::prepare_document(id, body)),
            )
            .await
            .map_err(|e| match duplicate_key(&e) {
                Some((position, message)) if index_name(&message) == "_id_" => {
                    DocumentStoreError::DocumentAlreadyExists(
                        position
                            .and_then(|position| ids.get(position))
                            .map(Uuid::to_string)
                            .unwrap_or_default(),
                        collection.to_string(),
                    )
                }
                _ => map_error(e, collection),
            })?;

        debug!(collection, count, "inserted documents");
        Ok(())
    }

    async fn find_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(clamp_count(limit));
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        options.sort = sort_document(&query.sort);
        options.projection = query.projection.as_ref().map(projection_document);

        self.get_collection(collection)
            .find(MongoQueryTranslator::filter(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(|e| map_error(e, collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::filter(filter.as_ref())?)
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn distinct(&self, field: &str, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        self.get_collection(collection)
            .distinct(field, MongoQueryTranslator::filter(filter.as_ref())?)
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let query = MongoQueryTranslator::filter(filter.as_ref())?;
        let mut modifications = update_document(&update);
        if options.upsert {
            modifications = with_upsert_id(filter.as_ref(), modifications);
        }

        let mut mongo_options = MongoUpdateOptions::default();
        mongo_options.upsert = Some(options.upsert);

        let target = self.get_collection(collection);
        let result = if options.multi {
            target
                .update_many(query, modifications)
                .with_options(mongo_options)
                .await
        } else {
            target
                .update_one(query, modifications)
                .with_options(mongo_options)
                .await
        };
        let result = result.map_err(|e| map_error(e, collection))?;

        debug!(
            collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "updated documents"
        );

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id.as_ref().and_then(id_from_bson),
        })
    }

    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let query = MongoQueryTranslator::filter(filter.as_ref())?;
        let mut modifications = update_document(&update);
        if options.upsert {
            modifications = with_upsert_id(filter.as_ref(), modifications);
        }

        let mut mongo_options = MongoFindOneAndUpdateOptions::default();
        mongo_options.upsert = Some(options.upsert);
        mongo_options.return_document = Some(if options.return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        });
        mongo_options.sort = sort_document(&options.sort);
        mongo_options.projection = options.projection.as_ref().map(projection_document);

        self.get_collection(collection)
            .find_one_and_update(query, modifications)
            .with_options(mongo_options)
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn delete_documents(&self, filter: Option<Expr>, multi: bool, collection: &str) -> DocumentStoreResult<DeleteOutcome> {
        let query = MongoQueryTranslator::filter(filter.as_ref())?;
        let target = self.get_collection(collection);

        let result = if multi {
            target.delete_many(query).await
        } else {
            target.delete_one(query).await
        };
        let result = result.map_err(|e| map_error(e, collection))?;

        debug!(collection, deleted = result.deleted_count, "deleted documents");
        Ok(DeleteOutcome { deleted: result.deleted_count })
    }

    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut mongo_options = MongoFindOneAndDeleteOptions::default();
        mongo_options.sort = sort_document(&options.sort);
        mongo_options.projection = options.projection.as_ref().map(projection_document);

        self.get_collection(collection)
            .find_one_and_delete(MongoQueryTranslator::filter(filter.as_ref())?)
            .with_options(mongo_options)
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline_documents(&pipeline)?)
            .await
            .map_err(|e| map_error(e, collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| map_error(e, collection))
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }

        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        debug!(collection = name, "dropped collection");
        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;
        names.sort();

        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String> {
        let result = self
            .get_collection(collection)
            .create_index(index_model(&index))
            .await
            .map_err(|e| map_error(e, collection))?;

        debug!(collection, index = %result.index_name, unique = index.unique, "created index");
        Ok(result.index_name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        if !self.collection_exists(collection).await? {
            return Err(DocumentStoreError::CollectionNotFound(collection.to_string()));
        }

        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>> {
        let cursor = match self.get_collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(vec![]),
            Err(e) => return Err(DocumentStoreError::Backend(e.to_string())),
        };

        Ok(cursor
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .iter()
            .filter_map(index_spec)
            .collect())
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`], created with [`MongoDbStore::builder`].
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }

    /// Application name reported to the server in the connection handshake.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        if let Some(app_name) = self.app_name {
            options.app_name = Some(app_name);
        }

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
