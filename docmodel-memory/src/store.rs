//! In-memory storage implementation for document stores.
//!
//! This module provides a simple but complete in-memory backend that keeps each
//! collection as an insertion-ordered list of BSON documents behind an async-safe
//! read-write lock. Filters, sorts, updates, unique indexes and aggregation pipelines
//! are all evaluated in process.

use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use docmodel_core::{
    backend::{DeleteOutcome, IndexSpec, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, UpdateOptions},
    path::set_path,
    pipeline::Pipeline,
    query::{Expr, ID_FIELD, Projection, Query, Sort, id_from_bson},
    update::Update,
};

use crate::{
    aggregate::run_pipeline,
    evaluator::{Comparable, DocumentEvaluator, compare_documents, index_key, resolve},
};

#[derive(Debug, Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionState>;

impl CollectionState {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.documents
            .iter()
            .position(|document| document.get(ID_FIELD).and_then(id_from_bson) == Some(id))
    }

    /// Positions of the documents matching `filter`, in `sort` order (insertion order
    /// without sort keys).
    fn matching(&self, filter: Option<&Expr>, sort: &[Sort]) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::matches(document, filter)? {
                positions.push(position);
            }
        }

        if !sort.is_empty() {
            positions.sort_by(|a, b| compare_documents(&self.documents[*a], &self.documents[*b], sort));
        }

        Ok(positions)
    }

    /// The unique index `candidate` would violate, ignoring the document at `skip`.
    fn unique_violation(&self, candidate: &Document, skip: Option<usize>) -> Option<&IndexSpec> {
        self.indexes
            .iter()
            .filter(|index| index.unique)
            .find(|index| {
                let key = index_key(candidate, &index.fields);
                self.documents
                    .iter()
                    .enumerate()
                    .any(|(position, other)| Some(position) != skip && index_key(other, &index.fields) == key)
            })
    }

    fn insert(&mut self, id: Uuid, document: Document, collection: &str) -> DocumentStoreResult<()> {
        if self.position(id).is_some() {
            return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
        }
        if let Some(index) = self.unique_violation(&document, None) {
            return Err(DocumentStoreError::DuplicateKey(index.name(), collection.to_string()));
        }

        self.documents.push(document);
        Ok(())
    }

    /// Applies `update` to the document at `position`. Returns whether it changed.
    fn apply(&mut self, position: usize, update: &Update, collection: &str) -> DocumentStoreResult<bool> {
        let mut updated = self.documents[position].clone();
        if !update.apply(&mut updated, false)? {
            return Ok(false);
        }

        if let Some(index) = self.unique_violation(&updated, Some(position)) {
            return Err(DocumentStoreError::DuplicateKey(index.name(), collection.to_string()));
        }

        self.documents[position] = updated;
        Ok(true)
    }

    fn upsert(&mut self, filter: Option<&Expr>, update: &Update, collection: &str) -> DocumentStoreResult<(Uuid, Document)> {
        let (id, document) = upsert_seed(filter, update)?;
        self.insert(id, document.clone(), collection)?;
        Ok((id, document))
    }
}

/// Stored form of a document: `_id` first, then the body without any `_id` it carries.
fn with_id(id: Uuid, body: Document) -> Document {
    let mut stored = Document::new();
    stored.insert(ID_FIELD, id);

    for (key, value) in body {
        if key != ID_FIELD {
            stored.insert(key, value);
        }
    }

    stored
}

/// Builds the document an upsert inserts: the filter's equality constraints with the
/// update applied on top. The id comes from an `_id` constraint or is generated.
fn upsert_seed(filter: Option<&Expr>, update: &Update) -> DocumentStoreResult<(Uuid, Document)> {
    let constraints = filter.map(Expr::equality_constraints).unwrap_or_default();
    let mut seed = Document::new();
    let mut id = None;

    for (field, value) in constraints {
        if field == ID_FIELD {
            id = id_from_bson(value);
        } else {
            set_path(&mut seed, field, value.clone())?;
        }
    }

    update.apply(&mut seed, true)?;
    let id = id.unwrap_or_else(Uuid::new);

    Ok((id, with_id(id, seed)))
}

fn project(document: Option<Document>, projection: Option<&Projection>) -> DocumentStoreResult<Option<Document>> {
    match (document, projection) {
        (Some(document), Some(projection)) => Ok(Some(projection.apply(&document)?)),
        (document, _) => Ok(document),
    }
}

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data. Every operation holds the lock for its whole
/// duration, so `find_one_and_*` and conditional updates are atomic.
///
/// # Performance
///
/// Queries scan all documents in a collection; indexes only enforce uniqueness. For
/// larger datasets, use a persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
/// use bson::{Uuid, doc};
///
/// let store = InMemoryStore::new();
///
/// let id = Uuid::new();
/// store.insert_documents(vec![(id, doc! { "name": "Alice", "age": 30 })], "users").await?;
///
/// let docs = store.find_documents(Filter::id(id).into(), "users").await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self { store: Arc::new(RwLock::new(StoreMap::new())) }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(&self, documents: Vec<(Uuid, Document)>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();
        let count = documents.len();

        for (id, body) in documents {
            state.insert(id, with_id(id, body), collection)?;
        }

        debug!(collection, count, "inserted documents");
        Ok(())
    }

    async fn find_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let state = match store.get(collection) {
            Some(state) => state,
            None => return Ok(vec![]),
        };

        state
            .matching(query.filter.as_ref(), &query.sort)?
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|position| {
                let document = &state.documents[position];
                match &query.projection {
                    Some(projection) => projection.apply(document),
                    None => Ok(document.clone()),
                }
            })
            .collect()
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        match store.get(collection) {
            Some(state) => Ok(state.matching(filter.as_ref(), &[])?.len() as u64),
            None => Ok(0),
        }
    }

    async fn distinct(&self, field: &str, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        let store = self.store.read().await;
        let state = match store.get(collection) {
            Some(state) => state,
            None => return Ok(vec![]),
        };

        let mut values: Vec<Bson> = Vec::new();
        for position in state.matching(filter.as_ref(), &[])? {
            for value in resolve(&state.documents[position], field) {
                let candidates = match value {
                    Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                    single => vec![single],
                };

                for candidate in candidates {
                    if !values
                        .iter()
                        .any(|seen| Comparable::from(seen) == Comparable::from(candidate))
                    {
                        values.push(candidate.clone());
                    }
                }
            }
        }

        Ok(values)
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: UpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        if !store.contains_key(collection) && !options.upsert {
            return Ok(UpdateOutcome::default());
        }
        let state = store.entry(collection.to_string()).or_default();

        let mut positions = state.matching(filter.as_ref(), &[])?;
        if !options.multi {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateOutcome::default());
            }

            let (id, _) = state.upsert(filter.as_ref(), &update, collection)?;
            debug!(collection, %id, "upserted document");
            return Ok(UpdateOutcome { matched: 0, modified: 0, upserted_id: Some(id) });
        }

        let mut modified = 0;
        for position in &positions {
            if state.apply(*position, &update, collection)? {
                modified += 1;
            }
        }

        debug!(collection, matched = positions.len(), modified, "updated documents");
        Ok(UpdateOutcome {
            matched: positions.len() as u64,
            modified,
            upserted_id: None,
        })
    }

    async fn find_one_and_update(
        &self,
        filter: Option<Expr>,
        update: Update,
        options: FindOneAndUpdateOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        if !store.contains_key(collection) && !options.upsert {
            return Ok(None);
        }
        let state = store.entry(collection.to_string()).or_default();

        let (before, after) = match state.matching(filter.as_ref(), &options.sort)?.first() {
            Some(&position) => {
                let before = state.documents[position].clone();
                state.apply(position, &update, collection)?;
                (Some(before), state.documents[position].clone())
            }
            None if options.upsert => {
                let (id, inserted) = state.upsert(filter.as_ref(), &update, collection)?;
                debug!(collection, %id, "upserted document");
                (None, inserted)
            }
            None => return Ok(None),
        };

        let result = if options.return_new { Some(after) } else { before };
        project(result, options.projection.as_ref())
    }

    async fn delete_documents(&self, filter: Option<Expr>, multi: bool, collection: &str) -> DocumentStoreResult<DeleteOutcome> {
        let mut store = self.store.write().await;
        let state = match store.get_mut(collection) {
            Some(state) => state,
            None => return Ok(DeleteOutcome::default()),
        };

        let mut positions = state.matching(filter.as_ref(), &[])?;
        if !multi {
            positions.truncate(1);
        }

        positions.sort_unstable();
        for position in positions.iter().rev() {
            state.documents.remove(*position);
        }

        debug!(collection, deleted = positions.len(), "deleted documents");
        Ok(DeleteOutcome { deleted: positions.len() as u64 })
    }

    async fn find_one_and_delete(
        &self,
        filter: Option<Expr>,
        options: FindOneAndDeleteOptions,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let state = match store.get_mut(collection) {
            Some(state) => state,
            None => return Ok(None),
        };

        let removed = state
            .matching(filter.as_ref(), &options.sort)?
            .first()
            .map(|&position| state.documents.remove(position));

        project(removed, options.projection.as_ref())
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let documents = match self.store.read().await.get(collection) {
            Some(state) => state.documents.clone(),
            None => Vec::new(),
        };

        run_pipeline(documents, &pipeline)
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        if self.store.write().await.remove(name).is_some() {
            debug!(collection = name, "dropped collection");
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentStoreResult<String> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();
        let name = index.name();

        if let Some(existing) = state.indexes.iter().find(|existing| existing.name() == name) {
            return if existing.fields == index.fields && existing.unique == index.unique {
                Ok(name)
            } else {
                Err(DocumentStoreError::Backend(format!(
                    "an index named {} already exists on {} with different options",
                    name, collection
                )))
            };
        }

        if index.unique {
            let keys = state
                .documents
                .iter()
                .map(|document| index_key(document, &index.fields))
                .collect::<Vec<_>>();
            let duplicated = keys
                .iter()
                .enumerate()
                .any(|(position, key)| keys[..position].contains(key));

            if duplicated {
                return Err(DocumentStoreError::DuplicateKey(name, collection.to_string()));
            }
        }

        debug!(collection, index = %name, unique = index.unique, "created index");
        state.indexes.push(index);

        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        let position = state
            .indexes
            .iter()
            .position(|index| index.name() == name)
            .ok_or_else(|| DocumentStoreError::Backend(format!("index not found with name [{}]", name)))?;
        state.indexes.remove(position);

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexSpec>> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .map(|state| state.indexes.clone())
            .unwrap_or_default())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::query::{Filter, SortDirection};

    async fn seeded() -> (InMemoryStore, Uuid, Uuid) {
        let store = InMemoryStore::new();
        let (ada, bob) = (Uuid::new(), Uuid::new());
        store
            .insert_documents(
                vec![
                    (ada, doc! { "name": "Ada", "age": 36 }),
                    (bob, doc! { "name": "Bob", "age": 17 }),
                ],
                "people",
            )
            .await
            .unwrap();
        (store, ada, bob)
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (store, ada, _) = seeded().await;

        let err = store
            .insert_documents(vec![(ada, doc! { "name": "Again" })], "people")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(..)));
    }

    #[tokio::test]
    async fn find_sorts_skips_and_projects() {
        let (store, _, bob) = seeded().await;

        let query = Query::builder()
            .sort("age", SortDirection::Asc)
            .select(Projection::include(["name"]))
            .limit(1)
            .build();
        let found = store.find_documents(query, "people").await.unwrap();

        assert_eq!(found, vec![doc! { "_id": bob, "name": "Bob" }]);
        assert!(store.find_documents(Query::new(), "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_reports_matched_and_modified() {
        let (store, _, _) = seeded().await;

        let outcome = store
            .update_documents(
                Some(Filter::gte("age", 0)),
                Update::new().set("age", 36),
                UpdateOptions::new().multi(true),
                "people",
            )
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome { matched: 2, modified: 1, upserted_id: None });
    }

    #[tokio::test]
    async fn upsert_seeds_from_equality_constraints() {
        let store = InMemoryStore::new();

        let outcome = store
            .update_documents(
                Some(Filter::eq("email", "ada@example.com")),
                Update::new().set("name", "Ada").set_on_insert("__v", 0),
                UpdateOptions::new().upsert(true),
                "people",
            )
            .await
            .unwrap();

        let id = outcome.upserted_id.unwrap();
        let stored = store.find_documents(Filter::id(id).into(), "people").await.unwrap();
        assert_eq!(
            stored,
            vec![doc! { "_id": id, "email": "ada@example.com", "name": "Ada", "__v": 0 }]
        );
    }

    #[tokio::test]
    async fn find_one_and_update_returns_requested_side() {
        let (store, ada, _) = seeded().await;

        let before = store
            .find_one_and_update(
                Some(Filter::id(ada)),
                Update::new().inc("age", 1),
                FindOneAndUpdateOptions::new(),
                "people",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.get_i32("age").unwrap(), 36);

        let after = store
            .find_one_and_update(
                Some(Filter::id(ada)),
                Update::new().inc("age", 1),
                FindOneAndUpdateOptions::new().return_new(true),
                "people",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.get_i32("age").unwrap(), 38);

        let nothing = store
            .find_one_and_update(
                Some(Filter::eq("name", "Nobody")),
                Update::new().set("age", 1),
                FindOneAndUpdateOptions::new(),
                "people",
            )
            .await
            .unwrap();
        assert!(nothing.is_none());
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let (store, ada, _) = seeded().await;
        store
            .create_index("people", IndexSpec::on("name").unique(true))
            .await
            .unwrap();

        let err = store
            .insert_documents(vec![(Uuid::new(), doc! { "name": "Ada" })], "people")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DuplicateKey(ref name, _) if name == "name_1"));

        let err = store
            .update_documents(
                Some(Filter::eq("name", "Bob")),
                Update::new().set("name", "Ada"),
                UpdateOptions::new(),
                "people",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DuplicateKey(..)));

        assert_eq!(store.list_indexes("people").await.unwrap().len(), 1);
        store.drop_index("people", "name_1").await.unwrap();
        assert!(store.list_indexes("people").await.unwrap().is_empty());
        assert_eq!(store.count_documents(Some(Filter::id(ada)), "people").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_first_or_all() {
        let (store, _, _) = seeded().await;

        let one = store.delete_documents(None, false, "people").await.unwrap();
        assert_eq!(one.deleted, 1);
        let rest = store.delete_documents(None, true, "people").await.unwrap();
        assert_eq!(rest.deleted, 1);
        assert_eq!(store.count_documents(None, "people").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                vec![
                    (Uuid::new(), doc! { "tags": ["a", "b"] }),
                    (Uuid::new(), doc! { "tags": ["b", "c"] }),
                ],
                "posts",
            )
            .await
            .unwrap();

        let tags = store.distinct("tags", None, "posts").await.unwrap();
        assert_eq!(tags, vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    }
}
