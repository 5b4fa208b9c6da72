//! Error types and result types for model and document operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`]. Data errors
//! (validation failures, version conflicts, missing records an operation requires) and
//! backend failures arrive as the `Err` of the returned future. Programming errors such as
//! an empty update or a malformed field path are reported as
//! [`DocumentStoreError::InvalidArgument`] before any request reaches the backend.

use std::fmt;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A unique index rejected a write.
    /// The first argument is the indexed field, the second is the collection name.
    #[error("Duplicate key for unique index on {0} in collection {1}")]
    DuplicateKey(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The stored document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The document failed its schema validation rules.
    #[error("Validation failed: {0}")]
    Validation(ValidationError),
    /// The stored version of a document no longer matches the version it was loaded with.
    #[error("No matching document found for id {id} at version {version} in collection {collection}")]
    VersionConflict {
        id: String,
        version: i64,
        collection: String,
    },
    /// A call was made with arguments that can never succeed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// No model with this name has been registered on the connection.
    #[error("Schema hasn't been registered for model {0}")]
    MissingModel(String),
    /// A different schema type is already registered under this model name.
    #[error("Cannot overwrite model {0} once registered")]
    OverwriteModel(String),
    /// The model exists but was registered with a different schema type.
    /// The arguments are the model name, the registered type and the requested type.
    #[error("Model {0} was registered as {1}, not {2}")]
    ModelTypeMismatch(String, String, String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<ValidationError> for DocumentStoreError {
    fn from(err: ValidationError) -> Self {
        DocumentStoreError::Validation(err)
    }
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorError {
    /// Dotted path of the offending field.
    pub path: String,
    /// Human readable description of the failure.
    pub message: String,
}

/// Collected validation failures for one document.
///
/// Returned by [`Schema::validate`](crate::schema::Schema::validate) and carried by
/// [`DocumentStoreError::Validation`].
///
/// # Example
///
/// ```ignore
/// fn validate(&self) -> Result<(), ValidationError> {
///     ValidationError::new()
///         .check(!self.name.is_empty(), "name", "Path `name` is required.")
///         .check(self.age >= 0, "age", "must not be negative")
///         .into_result()
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    errors: Vec<ValidatorError>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `path`.
    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidatorError {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Records a failure for `path` unless `ok` holds.
    pub fn check(mut self, ok: bool, path: impl Into<String>, message: impl Into<String>) -> Self {
        if !ok {
            self.add(path, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidatorError] {
        &self.errors
    }

    /// Returns the message recorded for `path`, if any.
    pub fn error_for(&self, path: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.message.as_str())
    }

    /// `Ok(())` when nothing failed, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>();

        write!(f, "{}", parts.join(", "))
    }
}

impl std::error::Error for ValidationError {}
