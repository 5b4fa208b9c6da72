//! The document facade: one stored record of a model, with change tracking.
//!
//! A [`Document`] pairs the typed field values of a schema with the bookkeeping needed to
//! save them back: the record id, whether it has been stored yet, the version it was
//! loaded at, and a snapshot of its stored form. Saving a loaded document writes only the
//! paths that differ from that snapshot (plus any marked with
//! [`mark_modified`](Document::mark_modified)).
//!
//! ```ignore
//! let mut user = users.find_by_id(id).await?.expect("exists");
//! user.get_mut().address.city = "Paris".into();
//!
//! assert!(user.is_modified(Some("address"))?);
//! assert_eq!(user.modified_paths()?, vec!["address", "address.city"]);
//!
//! user.save().await?;
//! assert!(!user.is_modified(None)?);
//! ```
//!
//! # Versioning
//!
//! Every stored record carries a version counter under the schema's version key (`__v` by
//! default). Saves only match the version the document was loaded at. The counter itself
//! moves only when a save is asked to move it, through [`increment`](Document::increment)
//! or the schema's `optimistic_concurrency` option, so two copies of one record can keep
//! saving disjoint changes until one of them increments.

use bson::{Bson, DateTime, Document as BsonDocument, Uuid};
use chrono::Utc;
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    events::{Emitter, EventEmitter},
    model::Model,
    options::UpdateOptions,
    path::{collapse_paths, diff_paths, get_path, overlaps, remove_path, set_path, validate_path, with_parents},
    populate::{PopulateOptions, depopulate_value, populate_value},
    query::{Filter, ID_FIELD, Projection, id_from_bson},
    schema::{CREATED_AT, Schema, SchemaExt, UPDATED_AT},
    update::Update,
};

/// Hook applied to the output of [`Document::to_object`].
pub type Transform = Arc<dyn Fn(&mut BsonDocument) + Send + Sync>;

/// Shapes the plain snapshot produced by [`Document::to_object`] and [`Document::to_json`].
#[derive(Clone)]
pub struct ToObjectOptions {
    /// Include the version key.
    pub version_key: bool,
    /// Include `_id`.
    pub id: bool,
    /// Output populated references as their ids.
    pub depopulate: bool,
    /// Drop empty nested documents.
    pub minimize: bool,
    pub transform: Option<Transform>,
}

impl Default for ToObjectOptions {
    fn default() -> Self {
        Self {
            version_key: true,
            id: true,
            depopulate: false,
            minimize: true,
            transform: None,
        }
    }
}

impl fmt::Debug for ToObjectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToObjectOptions")
            .field("version_key", &self.version_key)
            .field("id", &self.id)
            .field("depopulate", &self.depopulate)
            .field("minimize", &self.minimize)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl ToObjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version_key(mut self, include: bool) -> Self {
        self.version_key = include;
        self
    }

    pub fn id(mut self, include: bool) -> Self {
        self.id = include;
        self
    }

    pub fn depopulate(mut self, depopulate: bool) -> Self {
        self.depopulate = depopulate;
        self
    }

    pub fn minimize(mut self, minimize: bool) -> Self {
        self.minimize = minimize;
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&mut BsonDocument) + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

/// One record of a model.
///
/// Cloning a document copies its state and tracking but not its listeners.
pub struct Document<B: StoreBackend, T: Schema> {
    id: Uuid,
    fields: T,
    model: Model<B, T>,
    is_new: bool,
    version: i64,
    increment_pending: bool,
    snapshot: BsonDocument,
    marked: BTreeSet<String>,
    selection: Option<Projection>,
    populated: BTreeSet<String>,
    created_at: Option<DateTime>,
    updated_at: Option<DateTime>,
    emitter: EventEmitter,
}

impl<B: StoreBackend, T: Schema> Clone for Document<B, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            fields: self.fields.clone(),
            model: self.model.clone(),
            is_new: self.is_new,
            version: self.version,
            increment_pending: self.increment_pending,
            snapshot: self.snapshot.clone(),
            marked: self.marked.clone(),
            selection: self.selection.clone(),
            populated: self.populated.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            emitter: EventEmitter::new(),
        }
    }
}

impl<B: StoreBackend, T: Schema + fmt::Debug> fmt::Debug for Document<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("model", &T::model_name())
            .field("id", &self.id)
            .field("version", &self.version)
            .field("is_new", &self.is_new)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<B: StoreBackend, T: Schema> Emitter for Document<B, T> {
    fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl<B: StoreBackend, T: Schema> Document<B, T> {
    pub(crate) fn new(model: Model<B, T>, id: Uuid, fields: T) -> Self {
        Self {
            id,
            fields,
            model,
            is_new: true,
            version: 0,
            increment_pending: false,
            snapshot: BsonDocument::new(),
            marked: BTreeSet::new(),
            selection: None,
            populated: BTreeSet::new(),
            created_at: None,
            updated_at: None,
            emitter: EventEmitter::new(),
        }
    }

    /// Builds a document from a stored record.
    pub(crate) fn from_stored(
        model: Model<B, T>,
        mut raw: BsonDocument,
        selection: Option<Projection>,
    ) -> DocumentStoreResult<Self> {
        let id = raw
            .remove(ID_FIELD)
            .as_ref()
            .and_then(id_from_bson)
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!(
                    "stored {} has no valid `{}`",
                    T::model_name(),
                    ID_FIELD
                ))
            })?;

        let version = match raw.remove(&T::options().version_key) {
            Some(Bson::Int32(version)) => version as i64,
            Some(Bson::Int64(version)) => version,
            Some(Bson::Double(version)) => version as i64,
            _ => 0,
        };
        let created_at = raw.get_datetime(CREATED_AT).ok().copied();
        let updated_at = raw.get_datetime(UPDATED_AT).ok().copied();

        let fields = T::from_bson_document(raw)?;
        let snapshot = fields.to_bson_document()?;

        Ok(Self {
            id,
            fields,
            model,
            is_new: false,
            version,
            increment_pending: false,
            snapshot,
            marked: BTreeSet::new(),
            selection,
            populated: BTreeSet::new(),
            created_at,
            updated_at,
            emitter: EventEmitter::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True until the document has been stored.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Version the stored record had when this document last read or wrote it.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn model(&self) -> &Model<B, T> {
        &self.model
    }

    pub fn get(&self) -> &T {
        &self.fields
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.fields
    }

    /// Replaces all field values. Only paths that actually change are saved.
    pub fn set(&mut self, fields: T) {
        self.fields = fields;
    }

    pub fn into_inner(self) -> T {
        self.fields
    }

    pub fn created_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.created_at.map(DateTime::to_chrono)
    }

    pub fn updated_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.updated_at.map(DateTime::to_chrono)
    }

    /// Reads the value at a dotted path. `_id` and the version key are readable too.
    pub fn get_path(&self, path: &str) -> DocumentStoreResult<Option<Bson>> {
        if path == ID_FIELD {
            return Ok(Some(self.id.into()));
        }
        if path == T::options().version_key {
            return Ok(Some(Bson::Int64(self.version)));
        }

        validate_path(path)?;
        Ok(get_path(&self.fields.to_bson_document()?, path).cloned())
    }

    /// Writes the value at a dotted path, creating intermediate documents.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` for `_id` and the version key, and with a
    /// serialization error when the result no longer fits the schema type.
    pub fn set_path(&mut self, path: &str, value: impl Into<Bson>) -> DocumentStoreResult<()> {
        if path == ID_FIELD || path == T::options().version_key {
            return Err(DocumentStoreError::InvalidArgument(format!(
                "`{}` is maintained by the model and cannot be set",
                path
            )));
        }

        let mut body = self.fields.to_bson_document()?;
        set_path(&mut body, path, value.into())?;
        self.fields = T::from_bson_document(body)?;

        Ok(())
    }

    /// Serialized fields with populated references written as ids: the stored form.
    pub(crate) fn raw_fields(&self) -> DocumentStoreResult<BsonDocument> {
        let mut body = self.fields.to_bson_document()?;

        for path in &self.populated {
            if let Some(value) = get_path(&body, path).map(depopulate_value) {
                set_path(&mut body, path, value)?;
            }
        }

        Ok(body)
    }

    fn changed_paths(&self, current: &BsonDocument) -> Vec<String> {
        collapse_paths(
            diff_paths(&self.snapshot, current)
                .into_iter()
                .chain(self.marked.iter().cloned()),
        )
    }

    /// Paths that would be written by the next save, with every parent path of a nested
    /// change included.
    pub fn modified_paths(&self) -> DocumentStoreResult<Vec<String>> {
        let mut paths = with_parents(self.changed_paths(&self.raw_fields()?));
        paths.sort();
        Ok(paths)
    }

    /// Whether `path` (or, with `None`, anything) changed since the last load or save.
    ///
    /// A path counts as modified when it, one of its parents or one of its children was
    /// changed.
    pub fn is_modified(&self, path: Option<&str>) -> DocumentStoreResult<bool> {
        let changed = self.changed_paths(&self.raw_fields()?);

        Ok(match path {
            Some(path) => changed.iter().any(|changed| overlaps(changed, path)),
            None => !changed.is_empty(),
        })
    }

    /// Forces `path` to be written on the next save even if its value looks unchanged.
    pub fn mark_modified(&mut self, path: &str) -> DocumentStoreResult<()> {
        validate_path(path)?;
        self.marked.insert(path.to_string());
        Ok(())
    }

    /// Stops tracking changes at `path` (and below it) until the next load or save.
    pub fn unmark_modified(&mut self, path: &str) -> DocumentStoreResult<()> {
        validate_path(path)?;
        self.marked.retain(|marked| !overlaps(marked, path));

        match get_path(&self.raw_fields()?, path).cloned() {
            Some(value) => set_path(&mut self.snapshot, path, value)?,
            None => {
                remove_path(&mut self.snapshot, path);
            }
        }

        Ok(())
    }

    /// Whether `path` was loaded. Always true for documents loaded without a projection.
    pub fn is_selected(&self, path: &str) -> bool {
        self.selection
            .as_ref()
            .is_none_or(|selection| selection.is_selected(path))
    }

    /// Makes the next save move the version counter.
    pub fn increment(&mut self) -> &mut Self {
        self.increment_pending = true;
        self
    }

    /// Runs the schema's validation rules.
    pub async fn validate(&self) -> DocumentStoreResult<()> {
        match self.validate_sync() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn validate_sync(&self) -> Option<ValidationError> {
        self.fields.validate().err().filter(|err| !err.is_empty())
    }

    /// The stored form of a new document.
    pub(crate) fn insert_body(&self) -> DocumentStoreResult<BsonDocument> {
        let mut body = self.raw_fields()?;
        body.insert(T::options().version_key, Bson::Int64(0));

        if T::options().timestamps {
            let now = DateTime::from_chrono(Utc::now());
            if !body.contains_key(CREATED_AT) {
                body.insert(CREATED_AT, now);
            }
            if !body.contains_key(UPDATED_AT) {
                body.insert(UPDATED_AT, now);
            }
        }

        Ok(body)
    }

    /// Records that `body`, built by [`insert_body`](Self::insert_body), was stored.
    pub(crate) fn mark_inserted(&mut self, body: &BsonDocument) -> DocumentStoreResult<()> {
        self.is_new = false;
        self.version = 0;
        self.increment_pending = false;
        self.created_at = body.get_datetime(CREATED_AT).ok().copied();
        self.updated_at = body.get_datetime(UPDATED_AT).ok().copied();
        self.snapshot = self.raw_fields()?;
        self.marked.clear();

        Ok(())
    }

    /// Stores the document.
    ///
    /// A new document is inserted at version 0. An existing document writes its modified
    /// paths, matching on its id and the version it was loaded at; nothing is sent when
    /// nothing changed and no increment is pending.
    ///
    /// # Errors
    ///
    /// * `Validation` when the schema rules fail; nothing is written.
    /// * `VersionConflict` when the record was saved at another version in the meantime.
    /// * `DocumentNotFound` when the record was removed.
    pub async fn save(&mut self) -> DocumentStoreResult<()> {
        self.validate().await?;

        if self.is_new {
            let body = self.insert_body()?;
            debug!(model = T::model_name(), id = %self.id, "inserting document");

            self.model
                .collection()
                .insert(vec![(self.id, body.clone())])
                .await?;
            self.mark_inserted(&body)?;
            self.emit("save", self.id);

            return Ok(());
        }

        let options = T::options();
        let current = self.raw_fields()?;
        let paths = self.changed_paths(&current);
        let increment = self.increment_pending || (options.optimistic_concurrency && !paths.is_empty());

        if paths.is_empty() && !increment {
            self.emit("save", self.id);
            return Ok(());
        }

        let mut update = Update::new();
        for path in &paths {
            update = match get_path(&current, path) {
                Some(value) => update.set(path.clone(), value.clone()),
                None => update.unset(path.clone()),
            };
        }

        let now = DateTime::from_chrono(Utc::now());
        let stamp = options.timestamps && !paths.iter().any(|path| overlaps(path, UPDATED_AT));
        if stamp {
            update = update.set(UPDATED_AT, now);
        }
        if increment {
            update = update.inc(options.version_key.clone(), 1i64);
        }

        debug!(
            model = T::model_name(),
            id = %self.id,
            version = self.version,
            ?paths,
            increment,
            "saving document"
        );

        let filter = Filter::id(self.id).and(Filter::eq(options.version_key, self.version));
        let outcome = self
            .model
            .collection()
            .update(Some(filter), update, UpdateOptions::default())
            .await?;

        if outcome.matched == 0 {
            let exists = self.model.collection().count(Some(Filter::id(self.id))).await? > 0;
            return Err(if exists {
                DocumentStoreError::VersionConflict {
                    id: self.id.to_string(),
                    version: self.version,
                    collection: self.model.collection_name().to_string(),
                }
            } else {
                self.model.not_found(self.id)
            });
        }

        if increment {
            self.version += 1;
        }
        let mut current = current;
        if stamp {
            self.updated_at = Some(now);
            // a schema that declares the field sees the stamp too
            if current.contains_key(UPDATED_AT) {
                current.insert(UPDATED_AT, now);
                let mut body = self.fields.to_bson_document()?;
                body.insert(UPDATED_AT, now);
                self.fields = T::from_bson_document(body)?;
            }
        } else if let Ok(declared) = current.get_datetime(UPDATED_AT) {
            self.updated_at = Some(*declared);
        }
        self.increment_pending = false;
        self.snapshot = current;
        self.marked.clear();
        self.emit("save", self.id);

        Ok(())
    }

    /// Deletes the stored record.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` when no record with this id is stored.
    pub async fn remove(&mut self) -> DocumentStoreResult<()> {
        debug!(model = T::model_name(), id = %self.id, "removing document");

        let outcome = self
            .model
            .collection()
            .delete(Some(Filter::id(self.id)), false)
            .await?;

        if outcome.deleted == 0 {
            return Err(self.model.not_found(self.id));
        }

        self.emit("remove", self.id);
        Ok(())
    }

    pub async fn delete_one(&mut self) -> DocumentStoreResult<()> {
        self.remove().await
    }

    /// Populates references of this document. See [`Model::populate`].
    pub async fn populate<O>(&mut self, options: impl IntoIterator<Item = O>) -> DocumentStoreResult<()>
    where
        O: Into<PopulateOptions>,
    {
        let model = self.model.clone();
        model.populate(std::slice::from_mut(self), options).await
    }

    pub(crate) fn apply_population(
        &mut self,
        path: &str,
        found: &HashMap<Uuid, BsonDocument>,
    ) -> DocumentStoreResult<()> {
        let mut body = self.fields.to_bson_document()?;
        let Some(value) = get_path(&body, path).map(|value| populate_value(value, found)) else {
            return Ok(());
        };

        set_path(&mut body, path, value)?;
        self.fields = T::from_bson_document(body)?;
        self.populated.insert(path.to_string());

        Ok(())
    }

    /// The ids stored at `path` if it was populated, `None` otherwise.
    pub fn populated(&self, path: &str) -> DocumentStoreResult<Option<Bson>> {
        if !self.populated.contains(path) {
            return Ok(None);
        }

        Ok(get_path(&self.raw_fields()?, path).cloned())
    }

    /// Turns populated references back into ids, at `path` or everywhere with `None`.
    pub fn depopulate(&mut self, path: Option<&str>) -> DocumentStoreResult<()> {
        let paths = match path {
            Some(path) if self.populated.contains(path) => vec![path.to_string()],
            Some(_) => return Ok(()),
            None => self.populated.iter().cloned().collect(),
        };

        let mut body = self.fields.to_bson_document()?;
        for path in &paths {
            if let Some(value) = get_path(&body, path).map(depopulate_value) {
                set_path(&mut body, path, value)?;
            }
            self.populated.remove(path);
        }
        self.fields = T::from_bson_document(body)?;

        Ok(())
    }

    /// A plain snapshot of the document.
    pub fn to_object(&self, options: &ToObjectOptions) -> DocumentStoreResult<BsonDocument> {
        let mut object = BsonDocument::new();

        if options.id {
            object.insert(ID_FIELD, self.id);
        }

        let fields = if options.depopulate {
            self.raw_fields()?
        } else {
            self.fields.to_bson_document()?
        };
        for (key, value) in fields {
            object.insert(key, value);
        }

        for (key, stamp) in [(CREATED_AT, self.created_at), (UPDATED_AT, self.updated_at)] {
            if let Some(stamp) = stamp {
                if !object.contains_key(key) {
                    object.insert(key, stamp);
                }
            }
        }
        if options.version_key {
            object.insert(T::options().version_key, Bson::Int64(self.version));
        }
        if options.minimize {
            minimize(&mut object);
        }
        if let Some(transform) = &options.transform {
            transform(&mut object);
        }

        Ok(object)
    }

    /// Same as [`to_object`](Self::to_object); the JSON forms are
    /// [`to_json_value`](Self::to_json_value) and [`to_json_string`](Self::to_json_string).
    pub fn to_json(&self, options: &ToObjectOptions) -> DocumentStoreResult<BsonDocument> {
        self.to_object(options)
    }

    /// The snapshot as a JSON value. BSON-only types (ids, datetimes) use their extended
    /// JSON shape.
    pub fn to_json_value(&self, options: &ToObjectOptions) -> DocumentStoreResult<serde_json::Value> {
        Ok(serde_json::to_value(Bson::Document(self.to_object(options)?))?)
    }

    pub fn to_json_string(&self, options: &ToObjectOptions) -> DocumentStoreResult<String> {
        Ok(serde_json::to_string(&self.to_json_value(options)?)?)
    }
}

/// Removes empty nested documents, innermost first.
fn minimize(document: &mut BsonDocument) {
    let mut empty = Vec::new();

    for (key, value) in document.iter_mut() {
        if let Bson::Document(inner) = value {
            minimize(inner);
            if inner.is_empty() {
                empty.push(key.clone());
            }
        }
    }

    for key in empty {
        document.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn minimize_drops_nested_empty_documents() {
        let mut document = doc! { "a": 1, "b": { "c": {} }, "d": { "e": 2, "f": {} } };
        minimize(&mut document);
        assert_eq!(document, doc! { "a": 1, "d": { "e": 2 } });
    }

    #[test]
    fn default_object_options_keep_id_and_version() {
        let options = ToObjectOptions::default();
        assert!(options.id && options.version_key && options.minimize);
        assert!(!options.depopulate);
        assert!(options.transform.is_none());
    }
}
