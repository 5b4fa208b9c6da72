//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions, enabling filtering,
//! comparison and sorting of BSON documents. Field names are dotted paths; a path that
//! crosses an array of documents resolves to the field of every element, and a filter on
//! such a path matches when any resolved value matches.

use bson::{Bson, Document, datetime::DateTime};
use std::{cmp::Ordering, collections::HashMap};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64. Binary values (including UUIDs) compare by
/// their bytes.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting, min and max: by type rank first, then by value.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path, fanning out over arrays of documents.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = match segments.next().and_then(|first| document.get(first)) {
        Some(value) => vec![value],
        None => return Vec::new(),
    };

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => next.extend(items.get(index)),
                    Err(_) => next.extend(
                        items
                            .iter()
                            .filter_map(|item| item.as_document().and_then(|d| d.get(segment))),
                    ),
                },
                _ => {}
            }
        }
        current = next;
    }

    current
}

/// Sort key of a document for one field: its first resolved value, or null.
fn sort_key<'a>(document: &'a Document, field: &str) -> Comparable<'a> {
    resolve(document, field)
        .first()
        .map(|value| Comparable::from(*value))
        .unwrap_or(Comparable::Null)
}

/// Orders two documents by `sort`; earlier keys take precedence.
pub(crate) fn compare_documents(a: &Document, b: &Document, sort: &[Sort]) -> Ordering {
    for key in sort {
        let ordering = sort_key(a, &key.field).total_cmp(&sort_key(b, &key.field));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Stable multi-key sort.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &[Sort]) {
    if !sort.is_empty() {
        documents.sort_by(|a, b| compare_documents(a, b, sort));
    }
}

/// Values of the fields of `index` in `document`, missing fields counting as null.
pub(crate) fn index_key<'a>(document: &'a Document, fields: &[(String, SortDirection)]) -> Vec<Comparable<'a>> {
    fields
        .iter()
        .map(|(field, _)| sort_key(document, field))
        .collect()
}

fn equals(field_value: &Bson, value: &Bson) -> bool {
    let expected = Comparable::from(value);
    match Comparable::from(field_value) {
        Comparable::Array(items) => {
            items.iter().any(|item| item == &expected) || Comparable::from(field_value) == expected
        }
        actual => actual == expected,
    }
}

fn any_of(field_value: &Bson, values: &Bson) -> bool {
    match values {
        Bson::Array(candidates) => candidates.iter().any(|candidate| equals(field_value, candidate)),
        single => equals(field_value, single),
    }
}

fn contains(field_value: &Bson, value: &Bson) -> bool {
    match (field_value, value) {
        (Bson::Array(_), _) => equals(field_value, value),
        (Bson::String(left), Bson::String(right)) => left.contains(right.as_str()),
        _ => false,
    }
}

fn compare(field_value: &Bson, op: &FieldOp, value: &Bson) -> bool {
    let expected = Comparable::from(value);
    let test = |actual: &Comparable| match actual.partial_cmp(&expected) {
        Some(ordering) => match op {
            FieldOp::Gt => ordering == Ordering::Greater,
            FieldOp::Gte => ordering != Ordering::Less,
            FieldOp::Lt => ordering == Ordering::Less,
            FieldOp::Lte => ordering != Ordering::Greater,
            _ => false,
        },
        None => false,
    };

    match Comparable::from(field_value) {
        Comparable::Array(items) => items.iter().any(test),
        actual => test(&actual),
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// True when `document` satisfies `filter`; no filter matches everything.
    pub fn matches(document: &Document, filter: Option<&Expr>) -> DocumentStoreResult<bool> {
        match filter {
            Some(filter) => DocumentEvaluator::new(document).evaluate(filter),
            None => Ok(true),
        }
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: Option<&Expr>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::matches(document, filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!resolve(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let values = resolve(self.document, field);

        // A missing field compares equal to null.
        let missing_is_null = values.is_empty() && any_of(&Bson::Null, value);

        Ok(match op {
            FieldOp::Eq => values.iter().any(|v| equals(v, value)) || (values.is_empty() && value == &Bson::Null),
            FieldOp::Ne => !values.iter().any(|v| equals(v, value)) && !(values.is_empty() && value == &Bson::Null),
            FieldOp::AnyOf => values.iter().any(|v| any_of(v, value)) || missing_is_null,
            FieldOp::NoneOf => !values.iter().any(|v| any_of(v, value)) && !missing_is_null,
            FieldOp::Contains => values.iter().any(|v| contains(v, value)),
            FieldOp::NotContains => !values.iter().any(|v| contains(v, value)),
            FieldOp::StartsWith => values.iter().any(|v| match (v, value) {
                (Bson::String(left), Bson::String(right)) => left.starts_with(right.as_str()),
                _ => false,
            }),
            FieldOp::EndsWith => values.iter().any(|v| match (v, value) {
                (Bson::String(left), Bson::String(right)) => left.ends_with(right.as_str()),
                _ => false,
            }),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                values.iter().any(|v| compare(v, op, value))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Uuid, doc};
    use docmodel_core::query::Filter;

    fn eval(document: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn dotted_paths_reach_nested_and_array_fields() {
        let document = doc! {
            "address": { "city": "Paris" },
            "items": [{ "sku": "a" }, { "sku": "b" }],
        };

        assert!(eval(&document, Filter::eq("address.city", "Paris")));
        assert!(eval(&document, Filter::eq("items.sku", "b")));
        assert!(eval(&document, Filter::eq("items.0.sku", "a")));
        assert!(!eval(&document, Filter::eq("items.1.sku", "a")));
        assert!(eval(&document, Filter::exists("items.sku")));
        assert!(eval(&document, Filter::not_exists("address.zip")));
    }

    #[test]
    fn ids_compare_by_value() {
        let (id, other) = (Uuid::new(), Uuid::new());
        let document = doc! { "_id": id, "tags": ["x", "y"] };

        assert!(eval(&document, Filter::id(id)));
        assert!(!eval(&document, Filter::id(other)));
        assert!(eval(&document, Filter::ids([other, id])));
    }

    #[test]
    fn missing_fields_behave_like_null() {
        let document = doc! { "name": "Ada" };

        assert!(eval(&document, Filter::eq("age", Bson::Null)));
        assert!(eval(&document, Filter::ne("age", 3)));
        assert!(!eval(&document, Filter::gt("age", 3)));
        assert!(eval(&document, Filter::none_of("age", vec![1, 2])));
    }

    #[test]
    fn arrays_match_any_element() {
        let document = doc! { "scores": [3, 9], "tags": ["x", "y"] };

        assert!(eval(&document, Filter::gt("scores", 5)));
        assert!(!eval(&document, Filter::gt("scores", 10)));
        assert!(eval(&document, Filter::eq("tags", "x")));
        assert!(eval(&document, Filter::contains("tags", "y")));
        assert!(eval(&document, Filter::not_contains("tags", "z")));
        assert!(eval(&document, Filter::any_of("tags", vec!["z", "y"])));
    }

    #[test]
    fn numbers_compare_across_widths() {
        let document = doc! { "__v": 2i64 };
        assert!(eval(&document, Filter::eq("__v", 2i32)));
        assert!(eval(&document, Filter::lte("__v", 2.0)));
    }

    #[test]
    fn sort_uses_every_key_and_puts_missing_first() {
        let mut documents = vec![
            doc! { "n": 1, "s": "b" },
            doc! { "s": "z" },
            doc! { "n": 1, "s": "a" },
            doc! { "n": 0, "s": "c" },
        ];

        sort_documents(&mut documents, &[Sort::asc("n"), Sort::desc("s")]);

        let order = documents
            .iter()
            .map(|d| d.get_str("s").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["z", "c", "b", "a"]);
    }
}
