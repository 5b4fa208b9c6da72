//! Connection to a document store and its model registry.
//!
//! A [`Connection`] wraps one backend and remembers every model registered on it. Models
//! are registered by type through [`Connection::model`]; registering the same schema type
//! again returns a handle to the existing model, while registering a different type under
//! an existing name is rejected.
//!
//! Connections are cheap to clone: clones share the backend and the registry.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let connection = Connection::new(MemoryStore::new());
//! let users = connection.model::<User>()?;
//! let posts = connection.model::<Post>()?;
//!
//! assert_eq!(connection.model_names(), vec!["Post", "User"]);
//! ```

use parking_lot::RwLock;
use std::{
    any::{TypeId, type_name},
    collections::BTreeMap,
    fmt,
    sync::Arc,
};
use tracing::{debug, info};

use crate::{
    backend::{DynStoreBackend, StoreBackend},
    collection::Collection,
    error::{DocumentStoreError, DocumentStoreResult},
    events::EventEmitter,
    model::Model,
    schema::Schema,
};

#[derive(Clone)]
pub(crate) struct RegisteredModel {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) collection: String,
    pub(crate) emitter: Arc<EventEmitter>,
}

struct ConnectionInner<B> {
    backend: B,
    models: RwLock<BTreeMap<String, RegisteredModel>>,
}

/// A handle to a document store with its registered models.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
pub struct Connection<B: StoreBackend> {
    inner: Arc<ConnectionInner<B>>,
}

impl<B: StoreBackend> Clone for Connection<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: StoreBackend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.inner.backend)
            .field("models", &self.model_names())
            .finish()
    }
}

impl<B: StoreBackend> Connection<B> {
    /// Creates a connection with an empty model registry.
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                backend,
                models: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Registers `T` under [`Schema::model_name`] and returns its model.
    ///
    /// Calling this again for the same type returns a handle sharing the first
    /// registration's event emitter.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::OverwriteModel`] if another type is already registered
    /// under the same name.
    pub fn model<T: Schema>(&self) -> DocumentStoreResult<Model<B, T>> {
        let name = T::model_name();
        let mut models = self.inner.models.write();

        if let Some(existing) = models.get(name) {
            if existing.type_id != TypeId::of::<T>() {
                return Err(DocumentStoreError::OverwriteModel(name.to_string()));
            }

            return Ok(Model::new(self.clone(), existing.clone()));
        }

        let registered = RegisteredModel {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            collection: T::collection_name(),
            emitter: Arc::new(EventEmitter::new()),
        };
        models.insert(name.to_string(), registered.clone());
        drop(models);

        info!(
            model = name,
            collection = %registered.collection,
            "registered model"
        );

        Ok(Model::new(self.clone(), registered))
    }

    /// Looks up a model registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::MissingModel`] if nothing is registered under `name`,
    /// or [`DocumentStoreError::ModelTypeMismatch`] if it was registered with a type other
    /// than `T`.
    pub fn lookup<T: Schema>(&self, name: &str) -> DocumentStoreResult<Model<B, T>> {
        let registered = self
            .registered(name)
            .ok_or_else(|| DocumentStoreError::MissingModel(name.to_string()))?;

        if registered.type_id != TypeId::of::<T>() {
            return Err(DocumentStoreError::ModelTypeMismatch(
                name.to_string(),
                registered.type_name.to_string(),
                type_name::<T>().to_string(),
            ));
        }

        Ok(Model::new(self.clone(), registered))
    }

    /// Names of all registered models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.inner.models.read().keys().cloned().collect()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.inner.models.read().contains_key(name)
    }

    /// Removes a model from the registry. Stored documents are left untouched and existing
    /// handles keep working.
    pub fn delete_model(&self, name: &str) -> bool {
        let removed = self.inner.models.write().remove(name).is_some();
        if removed {
            debug!(model = name, "deleted model");
        }

        removed
    }

    pub(crate) fn registered(&self, name: &str) -> Option<RegisteredModel> {
        self.inner.models.read().get(name).cloned()
    }

    /// Gets an untyped collection with the given name.
    pub fn collection(&self, name: &str) -> Collection<'_, B> {
        Collection::new(name.to_string(), &self.inner.backend)
    }

    /// Creates a new collection. Creating an existing collection is not an error.
    pub async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.backend.create_collection(name).await
    }

    /// Drops (deletes) a collection and all its documents.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.backend.drop_collection(name).await
    }

    /// Lists all collections in the store.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.backend.list_collections().await
    }

    /// Shuts down the backend.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] while clones of this connection or
    /// models created from it are still alive, or whatever the backend's shutdown returns.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        let inner = Arc::try_unwrap(self.inner).map_err(|inner| {
            DocumentStoreError::InvalidArgument(format!(
                "connection is still shared by {} other handles",
                Arc::strong_count(&inner) - 1
            ))
        })?;

        inner.backend.shutdown().await?;
        info!("connection shut down");

        Ok(())
    }
}

impl<B: StoreBackend + 'static> Connection<B> {
    /// Erases the backend type, keeping the model registry.
    ///
    /// Model handles created before the conversion keep the old connection alive, so this
    /// must be called while this is the only handle.
    pub fn into_dyn(self) -> DocumentStoreResult<Connection<Box<dyn DynStoreBackend>>> {
        let inner = Arc::try_unwrap(self.inner).map_err(|_| {
            DocumentStoreError::InvalidArgument(
                "cannot erase the backend of a shared connection".to_string(),
            )
        })?;

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                backend: Box::new(inner.backend) as Box<dyn DynStoreBackend>,
                models: inner.models,
            }),
        })
    }
}
