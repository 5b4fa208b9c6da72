//! Population: replacing stored references with the documents they point to.
//!
//! A schema stores a reference to another model as that document's id. Declaring the
//! field as [`Ref<U>`] lets it hold either form:
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Post {
//!     pub title: String,
//!     pub author: Ref<User>,
//!     pub reviewers: Vec<Ref<User>>,
//! }
//!
//! impl Schema for Post {
//!     fn model_name() -> &'static str { "Post" }
//!
//!     fn references() -> Vec<Reference> {
//!         vec![Reference::new("author", "User"), Reference::new("reviewers", "User")]
//!     }
//! }
//!
//! posts.populate(&mut found, ["author"]).await?;
//! assert_eq!(found[0].get().author.doc().map(|u| u.name.as_str()), Some("Ada"));
//! ```
//!
//! Populated values are written back as plain ids when a document is saved. References
//! whose target no longer exists, or does not pass the option's filter, stay as ids.

use bson::{
    Bson, Document as BsonDocument, Uuid, de::deserialize_from_bson, ser::serialize_to_bson,
};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{DeserializeOwned, Error as _},
    ser::Error as _,
};
use std::collections::HashMap;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    connection::Connection,
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    path::{get_path, validate_path},
    query::{Expr, Filter, ID_FIELD, Projection, Query, id_from_bson},
    schema::Schema,
};

/// Which path to populate, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateOptions {
    pub path: String,
    /// Model to load the referenced documents from. Falls back to the schema's declared
    /// [`Reference`](crate::schema::Reference) for the path.
    pub model: Option<String>,
    /// Fields to load for each referenced document. `_id` is always loaded.
    pub select: Option<Projection>,
    /// Extra condition referenced documents must satisfy.
    pub filter: Option<Expr>,
}

impl PopulateOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), model: None, select: None, filter: None }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.select = Some(projection);
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl From<&str> for PopulateOptions {
    fn from(path: &str) -> Self {
        PopulateOptions::new(path)
    }
}

impl From<String> for PopulateOptions {
    fn from(path: String) -> Self {
        PopulateOptions::new(path)
    }
}

/// A reference to a document of another model, either as its id or populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref<U> {
    Id(Uuid),
    Populated { id: Uuid, doc: Box<U> },
}

impl<U> Ref<U> {
    pub fn id(&self) -> Uuid {
        match self {
            Ref::Id(id) | Ref::Populated { id, .. } => *id,
        }
    }

    pub fn doc(&self) -> Option<&U> {
        match self {
            Ref::Id(_) => None,
            Ref::Populated { doc, .. } => Some(doc),
        }
    }

    pub fn is_populated(&self) -> bool {
        matches!(self, Ref::Populated { .. })
    }
}

impl<U> From<Uuid> for Ref<U> {
    fn from(id: Uuid) -> Self {
        Ref::Id(id)
    }
}

impl<U: Serialize> Serialize for Ref<U> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ref::Id(id) => id.serialize(serializer),
            Ref::Populated { id, doc } => {
                let mut body = match serialize_to_bson(doc).map_err(S::Error::custom)? {
                    Bson::Document(body) => body,
                    _ => return Err(S::Error::custom("populated reference is not a document")),
                };
                body.insert(ID_FIELD, *id);
                Bson::Document(body).serialize(serializer)
            }
        }
    }
}

impl<'de, U: DeserializeOwned> Deserialize<'de> for Ref<U> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Bson::deserialize(deserializer)?;

        match value {
            Bson::Document(mut body) => {
                let id = body
                    .remove(ID_FIELD)
                    .as_ref()
                    .and_then(id_from_bson)
                    .ok_or_else(|| D::Error::custom("populated reference has no `_id`"))?;
                let doc = deserialize_from_bson(Bson::Document(body)).map_err(D::Error::custom)?;
                Ok(Ref::Populated { id, doc: Box::new(doc) })
            }
            other => id_from_bson(&other)
                .map(Ref::Id)
                .ok_or_else(|| D::Error::custom(format!("expected a document id, found {}", other))),
        }
    }
}

/// Replaces populated documents at any depth of `value` with their ids.
pub(crate) fn depopulate_value(value: &Bson) -> Bson {
    match value {
        Bson::Document(body) => body.get(ID_FIELD).cloned().unwrap_or_else(|| value.clone()),
        Bson::Array(items) => Bson::Array(items.iter().map(depopulate_value).collect()),
        other => other.clone(),
    }
}

/// Replaces ids in `value` with the matching loaded documents; unmatched ids are kept.
pub(crate) fn populate_value(value: &Bson, found: &HashMap<Uuid, BsonDocument>) -> Bson {
    match value {
        Bson::Array(items) => Bson::Array(items.iter().map(|item| populate_value(item, found)).collect()),
        other => match id_from_bson(&depopulate_value(other)).and_then(|id| found.get(&id)) {
            Some(doc) => Bson::Document(doc.clone()),
            None => other.clone(),
        },
    }
}

fn collect_ids(value: &Bson, ids: &mut Vec<Uuid>) {
    match value {
        Bson::Array(items) => items.iter().for_each(|item| collect_ids(item, ids)),
        other => {
            if let Some(id) = id_from_bson(&depopulate_value(other)) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
}

pub(crate) async fn populate_documents<B: StoreBackend, T: Schema>(
    connection: &Connection<B>,
    docs: &mut [Document<B, T>],
    options: Vec<PopulateOptions>,
) -> DocumentStoreResult<()> {
    for option in options {
        validate_path(&option.path)?;

        let model = match &option.model {
            Some(model) => model.clone(),
            None => T::references()
                .into_iter()
                .find(|reference| reference.path == option.path)
                .map(|reference| reference.model)
                .ok_or_else(|| {
                    DocumentStoreError::InvalidArgument(format!(
                        "cannot populate `{}` of {}: no model given and no reference declared",
                        option.path,
                        T::model_name()
                    ))
                })?,
        };

        let collection = connection
            .registered(&model)
            .map(|registered| registered.collection)
            .ok_or_else(|| DocumentStoreError::MissingModel(model.clone()))?;

        let mut ids = Vec::new();
        for doc in docs.iter() {
            if let Some(value) = get_path(&doc.raw_fields()?, &option.path) {
                collect_ids(value, &mut ids);
            }
        }

        if ids.is_empty() {
            continue;
        }

        let filter = match option.filter {
            Some(filter) => Filter::ids(ids).and(filter),
            None => Filter::ids(ids),
        };
        let projection = option.select.map(|projection| match projection {
            Projection::Include { fields, .. } => Projection::Include { fields, id: true },
            exclude => exclude,
        });

        let loaded = connection
            .collection(&collection)
            .find(Query { filter: Some(filter), projection, ..Query::default() })
            .await?;
        debug!(path = %option.path, model = %model, loaded = loaded.len(), "populating");

        let found = loaded
            .into_iter()
            .filter_map(|doc| {
                let id = doc.get(ID_FIELD).and_then(id_from_bson)?;
                Some((id, doc))
            })
            .collect::<HashMap<_, _>>();

        for doc in docs.iter_mut() {
            doc.apply_population(&option.path, &found)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Author {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        author: Ref<Author>,
    }

    #[test]
    fn reference_reads_both_forms() {
        let id = Uuid::new();

        let plain: Post = deserialize_from_bson(Bson::Document(doc! { "author": id })).unwrap();
        assert_eq!(plain.author, Ref::Id(id));

        let populated: Post = deserialize_from_bson(Bson::Document(doc! {
            "author": { "_id": id, "name": "Ada" }
        }))
        .unwrap();
        assert_eq!(populated.author.id(), id);
        assert_eq!(populated.author.doc().map(|a| a.name.as_str()), Some("Ada"));
    }

    #[test]
    fn populated_reference_serializes_with_id() {
        let id = Uuid::new();
        let post = Post {
            author: Ref::Populated { id, doc: Box::new(Author { name: "Ada".into() }) },
        };

        let stored = serialize_to_bson(&post).unwrap();
        assert_eq!(stored, Bson::Document(doc! { "author": { "name": "Ada", "_id": id } }));
        assert_eq!(depopulate_value(stored.as_document().unwrap().get("author").unwrap()), Bson::from(id));
    }

    #[test]
    fn missing_targets_stay_ids() {
        let (kept, missing) = (Uuid::new(), Uuid::new());
        let found = HashMap::from([(kept, doc! { "_id": kept, "name": "Ada" })]);

        let value = populate_value(&Bson::Array(vec![kept.into(), missing.into()]), &found);
        assert_eq!(
            value,
            Bson::Array(vec![Bson::Document(doc! { "_id": kept, "name": "Ada" }), missing.into()])
        );
    }
}
