//! Schema trait implemented by the field types of every model.
//!
//! A schema is a plain serde type. The trait tells the connection which name to register
//! the model under, where its documents live, which indexes and references it declares,
//! and how to validate a value before it is written.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! impl Schema for User {
//!     fn model_name() -> &'static str {
//!         "User"
//!     }
//!
//!     fn indexes() -> Vec<IndexSpec> {
//!         vec![IndexSpec::on("email").unique(true)]
//!     }
//!
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         ValidationError::new()
//!             .check(self.email.contains('@'), "email", "is not an email address")
//!             .into_result()
//!     }
//! }
//! ```

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{
    backend::IndexSpec,
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
};

/// Field set when a document is first stored, if timestamps are enabled.
pub const CREATED_AT: &str = "createdAt";

/// Field refreshed on every write, if timestamps are enabled.
pub const UPDATED_AT: &str = "updatedAt";

/// Model-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Field holding the version counter.
    pub version_key: String,
    /// Increment the version on every save that changes the document, not only after
    /// [`Document::increment`](crate::document::Document::increment).
    pub optimistic_concurrency: bool,
    /// Maintain `createdAt` and `updatedAt` datetimes on save and update.
    pub timestamps: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            version_key: "__v".to_string(),
            optimistic_concurrency: false,
            timestamps: false,
        }
    }
}

impl SchemaOptions {
    pub fn version_key(mut self, key: impl Into<String>) -> Self {
        self.version_key = key.into();
        self
    }

    pub fn optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.optimistic_concurrency = enabled;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}

/// A field storing the id of a document of another model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Path of the id (or array of ids) in this schema.
    pub path: String,
    /// Registered name of the referenced model.
    pub model: String,
}

impl Reference {
    pub fn new(path: impl Into<String>, model: impl Into<String>) -> Self {
        Self { path: path.into(), model: model.into() }
    }
}

/// Field type of a model.
pub trait Schema: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name the model is registered under. Unique within a connection.
    fn model_name() -> &'static str;

    /// Collection backing the model; the lowercased model name with an `s` appended
    /// unless overridden.
    fn collection_name() -> String {
        let name = Self::model_name().to_lowercase();
        if name.ends_with('s') { name } else { format!("{}s", name) }
    }

    fn options() -> SchemaOptions {
        SchemaOptions::default()
    }

    /// Indexes created by [`Model::ensure_indexes`](crate::model::Model::ensure_indexes).
    fn indexes() -> Vec<IndexSpec> {
        Vec::new()
    }

    /// Reference fields used by population when no target model is given explicitly.
    fn references() -> Vec<Reference> {
        Vec::new()
    }

    /// Validation rules, run before every save and insert.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Conversion helpers between schema values and their stored forms.
///
/// Automatically implemented for every [`Schema`].
pub trait SchemaExt: Schema {
    /// Serializes this value into a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the value does not serialize to a
    /// document (for example a newtype around a string).
    fn to_bson_document(&self) -> DocumentStoreResult<Document>;

    /// Creates a value from a stored BSON document. Unknown fields are ignored unless the
    /// type opts out with `#[serde(deny_unknown_fields)]`.
    fn from_bson_document(document: Document) -> DocumentStoreResult<Self>;

    fn to_json(&self) -> DocumentStoreResult<Value>;

    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<T: Schema> SchemaExt for T {
    fn to_bson_document(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "{} serialized to {:?} instead of a document",
                T::model_name(),
                other.element_type()
            ))),
        }
    }

    fn from_bson_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}
