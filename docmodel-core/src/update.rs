//! Update descriptions for `update_*` and `find_*_and_update` operations.
//!
//! An [`Update`] is an ordered list of field operators, mirroring the operator documents a
//! document database accepts (`$set`, `$unset`, `$inc`, ...). Backends either translate it
//! (MongoDB) or apply it directly ([`Update::apply`], used by the in-memory store).
//!
//! ```ignore
//! use docmodel::update::Update;
//!
//! let update = Update::new()
//!     .set("status", "archived")
//!     .inc("revision", 1)
//!     .push("history", "archived by admin");
//! ```

use bson::{Bson, Document};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::{get_path, get_path_mut, overlaps, remove_path, set_path, validate_path},
    query::ID_FIELD,
};

/// A single update operator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Stores a value at a path.
    Set(String, Bson),
    /// Removes a path.
    Unset(String),
    /// Adds a number to a numeric field, creating it when missing.
    Inc(String, Bson),
    /// Appends a value to an array field, creating it when missing.
    Push(String, Bson),
    /// Removes every array element equal to the value.
    Pull(String, Bson),
    /// Appends a value to an array field unless already present.
    AddToSet(String, Bson),
    /// Stores a value only when the update inserts a new document.
    SetOnInsert(String, Bson),
}

impl UpdateOp {
    /// The field path this operator writes.
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(path, _)
            | UpdateOp::Unset(path)
            | UpdateOp::Inc(path, _)
            | UpdateOp::Push(path, _)
            | UpdateOp::Pull(path, _)
            | UpdateOp::AddToSet(path, _)
            | UpdateOp::SetOnInsert(path, _) => path,
        }
    }
}

/// An ordered set of update operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), amount.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Push(path.into(), value.into()));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Pull(path.into(), value.into()));
        self
    }

    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::AddToSet(path.into(), value.into()));
        self
    }

    pub fn set_on_insert(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::SetOnInsert(path.into(), value.into()));
        self
    }

    /// Appends an operator.
    pub fn with(mut self, op: UpdateOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when some operator, `$setOnInsert` included, writes `path` or one of its parents
    /// or children.
    pub fn touches(&self, path: &str) -> bool {
        self.ops.iter().any(|op| overlaps(op.path(), path))
    }

    /// Rejects updates that no backend could execute.
    ///
    /// An update must contain at least one operator, only address valid paths, never
    /// write `_id`, only increment by numbers, and never write the same path (or a path
    /// and one of its parents) twice.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.ops.is_empty() {
            return Err(DocumentStoreError::InvalidArgument("update must not be empty".into()));
        }

        for (index, op) in self.ops.iter().enumerate() {
            validate_path(op.path())?;

            if op.path() == ID_FIELD {
                return Err(DocumentStoreError::InvalidArgument("updates must not modify `_id`".into()));
            }

            if let UpdateOp::Inc(path, amount) = op {
                if !is_number(amount) {
                    return Err(DocumentStoreError::InvalidArgument(format!(
                        "cannot increment `{}` by a non-numeric value",
                        path
                    )));
                }
            }

            if let Some(other) = self.ops[index + 1..]
                .iter()
                .find(|other| overlaps(op.path(), other.path()))
            {
                return Err(DocumentStoreError::InvalidArgument(format!(
                    "updating the path `{}` would create a conflict at `{}`",
                    other.path(),
                    op.path()
                )));
            }
        }

        Ok(())
    }

    /// Applies the operators to `document` in order.
    ///
    /// `inserting` controls whether `$setOnInsert` operators take effect. Returns whether
    /// the document changed.
    pub fn apply(&self, document: &mut Document, inserting: bool) -> DocumentStoreResult<bool> {
        let before = document.clone();

        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => set_path(document, path, value.clone())?,
                UpdateOp::SetOnInsert(path, value) => {
                    if inserting {
                        set_path(document, path, value.clone())?;
                    }
                }
                UpdateOp::Unset(path) => {
                    remove_path(document, path);
                }
                UpdateOp::Inc(path, amount) => {
                    let current = get_path(document, path).cloned().unwrap_or(Bson::Int32(0));
                    set_path(document, path, add_numbers(path, &current, amount)?)?;
                }
                UpdateOp::Push(path, value) => {
                    array_at(document, path)?.push(value.clone());
                }
                UpdateOp::AddToSet(path, value) => {
                    let array = array_at(document, path)?;
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
                UpdateOp::Pull(path, value) => {
                    if let Some(Bson::Array(items)) = get_path_mut(document, path) {
                        items.retain(|item| item != value);
                    }
                }
            }
        }

        Ok(*document != before)
    }
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn array_at<'a>(document: &'a mut Document, path: &str) -> DocumentStoreResult<&'a mut Vec<Bson>> {
    if get_path(document, path).is_none() {
        set_path(document, path, Bson::Array(Vec::new()))?;
    }

    match get_path_mut(document, path) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(DocumentStoreError::InvalidArgument(format!(
            "the field `{}` must be an array",
            path
        ))),
    }
}

fn add_numbers(path: &str, current: &Bson, amount: &Bson) -> DocumentStoreResult<Bson> {
    Ok(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(checked_inc(path, *a as i64, *b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(checked_inc(path, *a, *b as i64)?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(checked_inc(path, *a, *b)?),
        (Bson::Double(a), other) | (other, Bson::Double(a)) => Bson::Double(a + as_f64(path, other)?),
        _ => {
            return Err(DocumentStoreError::InvalidArgument(format!(
                "cannot apply $inc to non-numeric field `{}`",
                path
            )));
        }
    })
}

fn checked_inc(path: &str, current: i64, amount: i64) -> DocumentStoreResult<i64> {
    current.checked_add(amount).ok_or_else(|| {
        DocumentStoreError::InvalidArgument(format!("$inc overflows the 64-bit integer at `{}`", path))
    })
}

fn as_f64(path: &str, value: &Bson) -> DocumentStoreResult<f64> {
    match value {
        Bson::Int32(v) => Ok(*v as f64),
        Bson::Int64(v) => Ok(*v as f64),
        Bson::Double(v) => Ok(*v),
        _ => Err(DocumentStoreError::InvalidArgument(format!(
            "cannot apply $inc to non-numeric field `{}`",
            path
        ))),
    }
}
