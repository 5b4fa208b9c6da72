//! Aggregation pipeline descriptions.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s executed by the backend over one
//! collection. The model facade wraps it in an [`Aggregate`](crate::aggregate::Aggregate)
//! handle that can be awaited or streamed.

use bson::Bson;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::validate_path,
    query::{Expr, Projection, Sort, ID_FIELD},
};

/// Accumulator applied to each group produced by [`Stage::Group`].
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum of a numeric field.
    Sum(String),
    /// Number of documents in the group.
    Count,
    /// Average of a numeric field.
    Avg(String),
    Min(String),
    Max(String),
    /// All values of a field, in input order.
    Push(String),
    First(String),
    Last(String),
}

impl Accumulator {
    fn field(&self) -> Option<&str> {
        match self {
            Accumulator::Count => None,
            Accumulator::Sum(field)
            | Accumulator::Avg(field)
            | Accumulator::Min(field)
            | Accumulator::Max(field)
            | Accumulator::Push(field)
            | Accumulator::First(field)
            | Accumulator::Last(field) => Some(field),
        }
    }
}

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keeps documents matching the expression.
    Match(Expr),
    /// Reshapes documents.
    Project(Projection),
    Sort(Vec<Sort>),
    Skip(usize),
    Limit(usize),
    /// Groups documents by the value at `key` (or into one group when `None`). The
    /// group key is emitted as `_id`.
    Group {
        key: Option<String>,
        accumulators: Vec<(String, Accumulator)>,
    },
    /// Emits one document per element of the array at the path.
    Unwind(String),
    /// Replaces the input with a single document `{ <field>: <count> }`. Empty input
    /// produces no document.
    Count(String),
}

/// An ordered aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn validate(&self) -> DocumentStoreResult<()> {
        for stage in &self.stages {
            match stage {
                Stage::Match(expr) => expr.validate()?,
                Stage::Project(projection) => projection.validate()?,
                Stage::Sort(keys) => {
                    for key in keys {
                        validate_output_path(&key.field)?;
                    }
                }
                Stage::Skip(_) | Stage::Limit(_) => {}
                Stage::Group { key, accumulators } => {
                    if let Some(key) = key {
                        validate_output_path(key)?;
                    }
                    for (output, accumulator) in accumulators {
                        validate_path(output)?;
                        if output == ID_FIELD {
                            return Err(DocumentStoreError::InvalidArgument(
                                "group output `_id` is reserved for the group key".into(),
                            ));
                        }
                        if let Some(field) = accumulator.field() {
                            validate_output_path(field)?;
                        }
                    }
                }
                Stage::Unwind(path) | Stage::Count(path) => validate_path(path)?,
            }
        }

        Ok(())
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }
}

fn validate_output_path(path: &str) -> DocumentStoreResult<()> {
    if path == ID_FIELD {
        return Ok(());
    }
    validate_path(path)
}

/// Converts a count into the integer representation used by `$count` / `$sum: 1`.
pub fn count_to_bson(count: usize) -> Bson {
    match i32::try_from(count) {
        Ok(value) => Bson::Int32(value),
        Err(_) => Bson::Int64(count as i64),
    }
}
