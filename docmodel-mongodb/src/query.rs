//! Translation from docmodel descriptions to MongoDB command syntax.
//!
//! Filters go through [`MongoQueryTranslator`], a [`QueryVisitor`]; sorts, projections,
//! updates, pipelines and indexes are plain conversions into BSON documents.

use bson::{Bson, Document, doc};
use mongodb::{IndexModel, options::IndexOptions};

use docmodel_core::{
    backend::IndexSpec,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, Pipeline, Stage},
    query::{Expr, FieldOp, ID_FIELD, Projection, QueryVisitor, Sort, SortDirection},
    update::{Update, UpdateOp},
};

/// Translates docmodel query expressions into MongoDB query documents.
///
/// String operators become anchored, case-sensitive regular expressions with the
/// operand escaped, so they match exactly what the in-memory evaluator matches.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The filter document for an optional expression (`{}` matches everything).
    pub(crate) fn filter(expr: Option<&Expr>) -> DocumentStoreResult<Document> {
        match expr {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    // `$not` only applies to a single field's operators; `$nor` negates a whole expression.
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    other => doc! { "$eq": other },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::InvalidArgument(
                        "StartsWith operator requires a string value".to_string(),
                    )),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::InvalidArgument(
                        "EndsWith operator requires a string value".to_string(),
                    )),
                },
                FieldOp::AnyOf => doc! { "$in": as_array(value) },
                FieldOp::NoneOf => doc! { "$nin": as_array(value) },
            }
        })
    }
}

fn as_array(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        single => Bson::Array(vec![single.clone()]),
    }
}

fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn direction(direction: SortDirection) -> i32 {
    match direction {
        SortDirection::Asc => 1,
        SortDirection::Desc => -1,
    }
}

/// Sort specification, or `None` when there are no keys.
pub(crate) fn sort_document(sort: &[Sort]) -> Option<Document> {
    if sort.is_empty() {
        return None;
    }

    Some(
        sort.iter()
            .map(|key| (key.field.clone(), Bson::Int32(direction(key.direction))))
            .collect(),
    )
}

pub(crate) fn projection_document(projection: &Projection) -> Document {
    match projection {
        Projection::Include { fields, id } => {
            let mut document = fields
                .iter()
                .map(|field| (field.clone(), Bson::Int32(1)))
                .collect::<Document>();
            if !id {
                document.insert(ID_FIELD, 0);
            }
            document
        }
        Projection::Exclude(fields) => fields
            .iter()
            .map(|field| (field.clone(), Bson::Int32(0)))
            .collect(),
    }
}

/// Groups update operators by their MongoDB operator name, preserving order within each.
pub(crate) fn update_document(update: &Update) -> Document {
    let mut document = Document::new();

    for op in update.ops() {
        let (operator, value) = match op {
            UpdateOp::Set(_, value) => ("$set", value.clone()),
            UpdateOp::Unset(_) => ("$unset", Bson::String(String::new())),
            UpdateOp::Inc(_, value) => ("$inc", value.clone()),
            UpdateOp::Push(_, value) => ("$push", value.clone()),
            UpdateOp::Pull(_, value) => ("$pull", value.clone()),
            UpdateOp::AddToSet(_, value) => ("$addToSet", value.clone()),
            UpdateOp::SetOnInsert(_, value) => ("$setOnInsert", value.clone()),
        };

        match document.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(op.path(), value);
            }
            _ => {
                document.insert(operator, doc! { op.path(): value });
            }
        }
    }

    document
}

/// Counts past the server's 64-bit range saturate instead of turning negative.
pub(crate) fn clamp_count(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

pub(crate) fn pipeline_documents(pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
    pipeline
        .stages()
        .iter()
        .map(|stage| {
            Ok(match stage {
                Stage::Match(expr) => doc! { "$match": MongoQueryTranslator.visit_expr(expr)? },
                Stage::Project(projection) => doc! { "$project": projection_document(projection) },
                Stage::Sort(sort) => doc! { "$sort": sort_document(sort).unwrap_or_default() },
                Stage::Skip(count) => doc! { "$skip": clamp_count(*count) },
                Stage::Limit(count) => doc! { "$limit": clamp_count(*count) },
                Stage::Group { key, accumulators } => {
                    let mut group = Document::new();
                    group.insert(
                        ID_FIELD,
                        key.as_ref()
                            .map(|key| Bson::String(format!("${}", key)))
                            .unwrap_or(Bson::Null),
                    );
                    for (name, accumulator) in accumulators {
                        group.insert(name.as_str(), accumulator_document(accumulator));
                    }
                    doc! { "$group": group }
                }
                Stage::Unwind(path) => doc! { "$unwind": format!("${}", path) },
                Stage::Count(field) => doc! { "$count": field.as_str() },
            })
        })
        .collect()
}

fn accumulator_document(accumulator: &Accumulator) -> Document {
    let field = |name: &str| Bson::String(format!("${}", name));

    match accumulator {
        Accumulator::Count => doc! { "$sum": 1 },
        Accumulator::Sum(name) => doc! { "$sum": field(name) },
        Accumulator::Avg(name) => doc! { "$avg": field(name) },
        Accumulator::Min(name) => doc! { "$min": field(name) },
        Accumulator::Max(name) => doc! { "$max": field(name) },
        Accumulator::Push(name) => doc! { "$push": field(name) },
        Accumulator::First(name) => doc! { "$first": field(name) },
        Accumulator::Last(name) => doc! { "$last": field(name) },
    }
}

pub(crate) fn index_model(index: &IndexSpec) -> IndexModel {
    let keys = index
        .fields
        .iter()
        .map(|(field, sort)| (field.clone(), Bson::Int32(direction(*sort))))
        .collect::<Document>();

    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .unique(index.unique)
                .name(index.name())
                .build(),
        )
        .build()
}

/// Reads an index listed by the server back into a spec. Returns `None` for the
/// implicit `_id` index and for keys that are not plain ascending/descending.
pub(crate) fn index_spec(model: &IndexModel) -> Option<IndexSpec> {
    let name = model.options.as_ref().and_then(|options| options.name.clone());
    if name.as_deref() == Some("_id_") {
        return None;
    }

    let mut fields = Vec::new();
    for (field, value) in &model.keys {
        let sort = match value {
            Bson::Int32(v) if *v < 0 => SortDirection::Desc,
            Bson::Int64(v) if *v < 0 => SortDirection::Desc,
            Bson::Double(v) if *v < 0.0 => SortDirection::Desc,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => SortDirection::Asc,
            _ => return None,
        };
        fields.push((field.clone(), sort));
    }

    Some(IndexSpec {
        fields,
        unique: model
            .options
            .as_ref()
            .and_then(|options| options.unique)
            .unwrap_or(false),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::query::Filter;

    #[test]
    fn filters_translate_to_operators() {
        let expr = Filter::eq("name", "Ada").and(Filter::gt("age", 30).not());

        assert_eq!(
            MongoQueryTranslator::filter(Some(&expr)).unwrap(),
            doc! {
                "$and": [
                    { "name": { "$eq": "Ada" } },
                    { "$nor": [{ "age": { "$gt": 30 } }] },
                ]
            }
        );
        assert_eq!(MongoQueryTranslator::filter(None).unwrap(), doc! {});
    }

    #[test]
    fn string_operators_escape_their_operand() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::starts_with("email", "a.b+"))
            .unwrap();

        assert_eq!(translated, doc! { "email": { "$regex": "^a\\.b\\+" } });
    }

    #[test]
    fn updates_group_by_operator() {
        let update = Update::new()
            .set("name", "Ada")
            .set("address.city", "London")
            .unset("nickname")
            .inc("__v", 1);

        assert_eq!(
            update_document(&update),
            doc! {
                "$set": { "name": "Ada", "address.city": "London" },
                "$unset": { "nickname": "" },
                "$inc": { "__v": 1 },
            }
        );
    }

    #[test]
    fn pipelines_translate_stage_by_stage() {
        let pipeline = Pipeline::new()
            .stage(Stage::Unwind("items".into()))
            .stage(Stage::Group {
                key: Some("customer".into()),
                accumulators: vec![("total".into(), Accumulator::Sum("amount".into()))],
            })
            .stage(Stage::Sort(vec![Sort::desc("total")]))
            .stage(Stage::Limit(5));

        assert_eq!(
            pipeline_documents(&pipeline).unwrap(),
            vec![
                doc! { "$unwind": "$items" },
                doc! { "$group": { "_id": "$customer", "total": { "$sum": "$amount" } } },
                doc! { "$sort": { "total": -1 } },
                doc! { "$limit": 5_i64 },
            ]
        );
    }

    #[test]
    fn huge_counts_saturate() {
        let pipeline = Pipeline::new()
            .stage(Stage::Skip(usize::MAX))
            .stage(Stage::Limit(usize::MAX));

        assert_eq!(
            pipeline_documents(&pipeline).unwrap(),
            vec![doc! { "$skip": i64::MAX }, doc! { "$limit": i64::MAX }]
        );
        assert_eq!(clamp_count(7), 7);
    }

    #[test]
    fn index_specs_round_trip_through_models() {
        let spec = IndexSpec::on("email").and("created", SortDirection::Desc).unique(true);
        let model = index_model(&spec);

        assert_eq!(model.keys, doc! { "email": 1, "created": -1 });
        assert_eq!(index_spec(&model), Some(spec.named("email_1_created_-1")));
    }
}
