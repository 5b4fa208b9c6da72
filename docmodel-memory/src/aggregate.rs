//! Aggregation pipeline execution over in-memory documents.

use bson::{Bson, Document};
use std::cmp::Ordering;

use docmodel_core::{
    error::DocumentStoreResult,
    path::{get_path, set_path},
    pipeline::{Accumulator, Pipeline, Stage, count_to_bson},
    query::ID_FIELD,
};

use crate::evaluator::{Comparable, DocumentEvaluator, sort_documents};

/// Runs every stage of `pipeline` over `documents`, in order.
pub(crate) fn run_pipeline(mut documents: Vec<Document>, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline.stages() {
        documents = match stage {
            Stage::Match(filter) => DocumentEvaluator::filter_documents(&documents, Some(filter))?,
            Stage::Project(projection) => documents
                .iter()
                .map(|document| projection.apply(document))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
            Stage::Sort(sort) => {
                sort_documents(&mut documents, sort);
                documents
            }
            Stage::Skip(count) => documents.into_iter().skip(*count).collect(),
            Stage::Limit(count) => {
                documents.truncate(*count);
                documents
            }
            Stage::Group { key, accumulators } => group(&documents, key.as_deref(), accumulators),
            Stage::Unwind(path) => unwind(documents, path)?,
            Stage::Count(_) if documents.is_empty() => documents,
            Stage::Count(field) => {
                let mut counted = Document::new();
                counted.insert(field.as_str(), count_to_bson(documents.len()));
                vec![counted]
            }
        };
    }

    Ok(documents)
}

fn unwind(documents: Vec<Document>, path: &str) -> DocumentStoreResult<Vec<Document>> {
    let mut unwound = Vec::with_capacity(documents.len());

    for document in documents {
        match get_path(&document, path).cloned() {
            Some(Bson::Array(items)) => {
                for item in items {
                    let mut copy = document.clone();
                    set_path(&mut copy, path, item)?;
                    unwound.push(copy);
                }
            }
            Some(Bson::Null) | None => {}
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

fn group(documents: &[Document], key: Option<&str>, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();

    for document in documents {
        let value = key
            .and_then(|key| get_path(document, key))
            .cloned()
            .unwrap_or(Bson::Null);

        match groups
            .iter_mut()
            .find(|(existing, _)| Comparable::from(&*existing) == Comparable::from(&value))
        {
            Some((_, members)) => members.push(document),
            None => groups.push((value, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(value, members)| {
            let mut output = Document::new();
            output.insert(ID_FIELD, value);
            for (name, accumulator) in accumulators {
                output.insert(name.as_str(), accumulate(&members, accumulator));
            }
            output
        })
        .collect()
}

fn accumulate(members: &[&Document], accumulator: &Accumulator) -> Bson {
    let values = |field: &str| {
        members
            .iter()
            .filter_map(|document| get_path(document, field))
            .collect::<Vec<_>>()
    };

    match accumulator {
        Accumulator::Count => count_to_bson(members.len()),
        Accumulator::Sum(field) => sum(&values(field)),
        Accumulator::Avg(field) => {
            let numbers = values(field).into_iter().filter_map(as_f64).collect::<Vec<_>>();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Accumulator::Min(field) => extreme(&values(field), Ordering::Less),
        Accumulator::Max(field) => extreme(&values(field), Ordering::Greater),
        Accumulator::Push(field) => Bson::Array(values(field).into_iter().cloned().collect()),
        Accumulator::First(field) => members
            .first()
            .and_then(|document| get_path(document, field))
            .cloned()
            .unwrap_or(Bson::Null),
        Accumulator::Last(field) => members
            .last()
            .and_then(|document| get_path(document, field))
            .cloned()
            .unwrap_or(Bson::Null),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Integer sums stay integers; any double, or a sum past the 64-bit range, makes the sum a
/// double. Non-numbers are skipped.
fn sum(values: &[&Bson]) -> Bson {
    let mut integer: i64 = 0;
    let mut float = 0.0;
    let mut is_float = false;

    for value in values {
        let whole = match value {
            Bson::Int32(v) => Some(*v as i64),
            Bson::Int64(v) => Some(*v),
            _ => None,
        };
        if let Some(whole) = whole {
            match integer.checked_add(whole) {
                Some(total) => integer = total,
                None => {
                    float += whole as f64;
                    is_float = true;
                }
            }
            continue;
        }

        match value {
            Bson::Double(v) => {
                float += v;
                is_float = true;
            }
            _ => {}
        }
    }

    if is_float {
        Bson::Double(float + integer as f64)
    } else {
        match i32::try_from(integer) {
            Ok(value) => Bson::Int32(value),
            Err(_) => Bson::Int64(integer),
        }
    }
}

fn extreme(values: &[&Bson], wanted: Ordering) -> Bson {
    values
        .iter()
        .filter(|value| !matches!(value, Bson::Null))
        .fold(None::<&Bson>, |best, value| match best {
            Some(best) if Comparable::from(*value).total_cmp(&Comparable::from(best)) != wanted => Some(best),
            _ => Some(*value),
        })
        .cloned()
        .unwrap_or(Bson::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::query::{Filter, Sort};

    fn orders() -> Vec<Document> {
        vec![
            doc! { "customer": "a", "amount": 10, "items": ["x", "y"] },
            doc! { "customer": "b", "amount": 5, "items": [] },
            doc! { "customer": "a", "amount": 2.5, "items": ["z"] },
        ]
    }

    #[test]
    fn group_with_accumulators() {
        let pipeline = Pipeline::new()
            .stage(Stage::Group {
                key: Some("customer".into()),
                accumulators: vec![
                    ("total".into(), Accumulator::Sum("amount".into())),
                    ("orders".into(), Accumulator::Count),
                    ("largest".into(), Accumulator::Max("amount".into())),
                ],
            })
            .stage(Stage::Sort(vec![Sort::asc("_id")]));

        let result = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(
            result,
            vec![
                doc! { "_id": "a", "total": 12.5, "orders": 2, "largest": 10 },
                doc! { "_id": "b", "total": 5, "orders": 1, "largest": 5 },
            ]
        );
    }

    #[test]
    fn sums_past_the_integer_range_become_doubles() {
        let documents = vec![doc! { "big": i64::MAX }, doc! { "big": i64::MAX }, doc! { "big": 1 }];
        let pipeline = Pipeline::new().stage(Stage::Group {
            key: None,
            accumulators: vec![("total".into(), Accumulator::Sum("big".into()))],
        });

        let result = run_pipeline(documents, &pipeline).unwrap();
        assert_eq!(result.len(), 1);
        match result[0].get("total") {
            Some(Bson::Double(total)) => assert!(*total >= 2.0 * i64::MAX as f64),
            other => panic!("expected a double sum, got {:?}", other),
        }
    }

    #[test]
    fn unwind_drops_empty_arrays_and_count_summarises() {
        let pipeline = Pipeline::new()
            .stage(Stage::Unwind("items".into()))
            .stage(Stage::Match(Filter::ne("items", "y")))
            .stage(Stage::Count("n".into()));

        let result = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(result, vec![doc! { "n": 2 }]);
    }

    #[test]
    fn skip_and_limit_apply_in_order() {
        let pipeline = Pipeline::new()
            .stage(Stage::Sort(vec![Sort::desc("amount")]))
            .stage(Stage::Skip(1))
            .stage(Stage::Limit(1));

        let result = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(result[0].get_i32("amount").unwrap(), 5);
    }
}
