//! Query construction and filtering API for models.
//!
//! This module provides type-safe query construction with filtering, projection, sorting,
//! pagination, and a visitor pattern for query execution across different backends.
//!
//! # Query Building
//!
//! ```ignore
//! use docmodel::query::{Query, Filter, Projection, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("status", "active"))
//!     .select(Projection::include(["name", "email"]))
//!     .sort("createdAt", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//!
//! let users = connection.model::<User>()?.find(query).await?;
//! ```
//!
//! Any [`Expr`] converts into a [`Query`], so `model.find(Filter::eq("name", "Ada"))`
//! works as well.
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Identity: `id`, `ids`
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! Field names may be dotted paths into nested documents (`"address.city"`).

use bson::{Bson, Document, Uuid, de::deserialize_from_bson, spec::BinarySubtype};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::{get_path, is_ancestor, remove_path, set_path, validate_path},
};

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Reads a document identifier from a stored value.
///
/// Accepts BSON UUID binaries and their hyphenated string form (what JSON round trips
/// produce). Returns `None` for anything else.
pub fn id_from_bson(value: &Bson) -> Option<Uuid> {
    match value {
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
            deserialize_from_bson::<Uuid>(value.clone()).ok()
        }
        Bson::String(text) => Uuid::parse_str(text).ok(),
        _ => None,
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field equals (or array field contains) any of the values.
    AnyOf,
    /// Field equals (or array field contains) none of the values.
    NoneOf,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Checks every field path referenced by this expression.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().try_for_each(Expr::validate),
            Expr::Not(expr) => expr.validate(),
            Expr::Exists(field, _) => validate_field(field),
            Expr::Field { field, .. } => validate_field(field),
        }
    }

    /// Collects the `field == value` constraints that every match must satisfy.
    ///
    /// Only top-level equality clauses and equality clauses nested in `And` count;
    /// anything under `Or` or `Not` is ignored. Used to seed upserted documents.
    pub fn equality_constraints(&self) -> Vec<(&str, &Bson)> {
        match self {
            Expr::Field { field, op: FieldOp::Eq, value } => vec![(field.as_str(), value)],
            Expr::And(exprs) => exprs
                .iter()
                .flat_map(Expr::equality_constraints)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn validate_field(field: &str) -> DocumentStoreResult<()> {
    if field == ID_FIELD {
        return Ok(());
    }

    validate_path(field)
}

/// Which fields a query returns.
///
/// Inclusive projections return only the listed paths (plus `_id`); exclusive
/// projections return everything except the listed paths. `_id` may be excluded
/// from an inclusive projection with [`Projection::without_id`].
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include { fields: Vec<String>, id: bool },
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            id: true,
        }
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Drops `_id` from an inclusive projection. Has no effect on exclusive projections.
    pub fn without_id(self) -> Self {
        match self {
            Projection::Include { fields, .. } => Projection::Include { fields, id: false },
            other => other,
        }
    }

    /// Whether documents loaded with this projection carry `path`.
    ///
    /// A path counts as selected when it, one of its parents, or one of its children
    /// is included (inclusive mode), or when neither it nor a parent is excluded.
    pub fn is_selected(&self, path: &str) -> bool {
        match self {
            Projection::Include { fields, id } => {
                if path == ID_FIELD {
                    return *id;
                }
                fields
                    .iter()
                    .any(|f| f == path || is_ancestor(f, path) || is_ancestor(path, f))
            }
            Projection::Exclude(fields) => !fields
                .iter()
                .any(|f| f == path || is_ancestor(f, path)),
        }
    }

    /// Applies this projection to a stored document.
    pub fn apply(&self, document: &Document) -> DocumentStoreResult<Document> {
        match self {
            Projection::Include { fields, id } => {
                let mut projected = Document::new();
                if *id {
                    if let Some(value) = document.get(ID_FIELD) {
                        projected.insert(ID_FIELD, value.clone());
                    }
                }
                for field in fields {
                    if let Some(value) = get_path(document, field) {
                        set_path(&mut projected, field, value.clone())?;
                    }
                }
                Ok(projected)
            }
            Projection::Exclude(fields) => {
                let mut projected = document.clone();
                for field in fields {
                    remove_path(&mut projected, field);
                }
                Ok(projected)
            }
        }
    }

    pub fn validate(&self) -> DocumentStoreResult<()> {
        let fields = match self {
            Projection::Include { fields, .. } => fields,
            Projection::Exclude(fields) => fields,
        };

        fields.iter().try_for_each(|f| validate_field(f))
    }
}

/// A structured query for retrieving and filtering documents.
///
/// This struct encapsulates filters, projection, limits, offsets, and sort specifications
/// for document queries. Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Optional projection restricting the returned fields.
    pub projection: Option<Projection>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip (for pagination).
    pub offset: Option<usize>,
    /// Sort keys, applied in order.
    pub sort: Vec<Sort>,
}

impl Query {
    /// Creates a new empty query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Checks all field paths used by the filter, projection and sort keys.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        if let Some(projection) = &self.projection {
            projection.validate()?;
        }
        self.sort
            .iter()
            .try_for_each(|s| validate_field(&s.field))
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query { filter: Some(filter), ..Query::default() }
    }
}

impl From<Option<Expr>> for Query {
    fn from(filter: Option<Expr>) -> Self {
        Query { filter, ..Query::default() }
    }
}

impl From<QueryBuilder> for Query {
    fn from(builder: QueryBuilder) -> Self {
        builder.build()
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// ```ignore
/// let expr = Filter::eq("name", "Alice").and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches the document with the given identifier.
    pub fn id(id: Uuid) -> Expr {
        Expr::field(ID_FIELD.to_string(), FieldOp::Eq, Bson::from(id))
    }

    /// Matches any document whose identifier is in `ids`.
    pub fn ids(ids: impl IntoIterator<Item = Uuid>) -> Expr {
        Expr::field(
            ID_FIELD.to_string(),
            FieldOp::AnyOf,
            Bson::Array(ids.into_iter().map(Bson::from).collect()),
        )
    }

    /// Creates an equality filter expression.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Creates a not-equal filter expression.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Creates a greater-than filter expression.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Creates a greater-than-or-equal filter expression.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Creates a less-than filter expression.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Creates a less-than-or-equal filter expression.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field (string or array) does not contain the specified value.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals, or the array field contains, any of the values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field equals, or the array field contains, none of the values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Restricts the fields returned by this query.
    pub fn select(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip (for pagination).
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Visitor over filter expressions.
///
/// Backends implement this to evaluate ([`Output = bool`](bool)) or translate
/// (`Output = bson::Document`) a filter.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn equality_constraints_ignore_disjunctions() {
        let expr = Filter::eq("name", "Ada")
            .and(Filter::gt("age", 3))
            .and(Filter::or([Filter::eq("role", "admin"), Filter::eq("role", "dev")]));

        let constraints = expr.equality_constraints();

        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].0, "name");
    }

    #[test]
    fn projection_include_keeps_id_and_nested_fields() {
        let stored = doc! { "_id": 1, "name": "Ada", "address": { "city": "London", "zip": "N1" }, "age": 36 };

        let projected = Projection::include(["name", "address.city"]).apply(&stored).unwrap();
        assert_eq!(projected, doc! { "_id": 1, "name": "Ada", "address": { "city": "London" } });

        let projected = Projection::include(["name"]).without_id().apply(&stored).unwrap();
        assert_eq!(projected, doc! { "name": "Ada" });
    }

    #[test]
    fn projection_exclude_and_selection() {
        let stored = doc! { "_id": 1, "name": "Ada", "age": 36 };
        let projection = Projection::exclude(["age"]);

        assert_eq!(projection.apply(&stored).unwrap(), doc! { "_id": 1, "name": "Ada" });
        assert!(projection.is_selected("name"));
        assert!(!projection.is_selected("age"));

        let projection = Projection::include(["address.city"]);
        assert!(projection.is_selected("address"));
        assert!(projection.is_selected("address.city"));
        assert!(!projection.is_selected("name"));
        assert!(projection.is_selected("_id"));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let query = Query::builder().filter(Filter::eq("$where", "1")).build();
        assert!(matches!(query.validate(), Err(DocumentStoreError::InvalidArgument(_))));

        let query = Query::builder().filter(Filter::id(Uuid::new())).build();
        assert!(query.validate().is_ok());
    }
}
