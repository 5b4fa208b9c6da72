//! Per-call options for model operations.
//!
//! Each struct starts from `Default` and is configured with fluent setters:
//!
//! ```ignore
//! let options = FindOneAndUpdateOptions::new().upsert(true).return_new(true);
//! ```

use crate::query::{Projection, Sort, SortDirection};

/// Options for `update`, `update_one` and `update_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first one. Ignored by `update_one` and `update_many`.
    pub multi: bool,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }
}

/// Options for `find_one_and_update` and `find_by_id_and_update`.
///
/// By default the document is returned as it was before the update. With
/// `return_new(true)` the updated document is returned instead, and with `upsert(true)` a
/// document is created when the filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_new: bool,
    /// Picks which document is updated when several match.
    pub sort: Vec<Sort>,
    pub projection: Option<Projection>,
}

impl FindOneAndUpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn return_new(mut self, return_new: bool) -> Self {
        self.return_new = return_new;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for `find_one_and_delete` and `find_by_id_and_delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndDeleteOptions {
    /// Picks which document is removed when several match.
    pub sort: Vec<Sort>,
    pub projection: Option<Projection>,
}

impl FindOneAndDeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}
