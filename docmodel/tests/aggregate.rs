mod common;

use bson::doc;
use common::{Order, connection};
use docmodel::prelude::*;
use futures::TryStreamExt;

async fn orders() -> Model<InMemoryStore, Order> {
    let orders = connection().model::<Order>().unwrap();
    orders
        .insert_many([
            Order { customer: "a".into(), amount: 10, items: vec!["x".into(), "y".into()] },
            Order { customer: "b".into(), amount: 5, items: vec![] },
            Order { customer: "a".into(), amount: 7, items: vec!["z".into()] },
        ])
        .await
        .unwrap();
    orders
}

#[tokio::test]
async fn awaiting_runs_the_pipeline() {
    let orders = orders().await;

    let totals = orders
        .aggregate(Pipeline::new())
        .group(
            Some("customer"),
            [
                ("total", Accumulator::Sum("amount".into())),
                ("orders", Accumulator::Count),
            ],
        )
        .sort(Sort::desc("total"))
        .await
        .unwrap();

    assert_eq!(
        totals,
        vec![
            doc! { "_id": "a", "total": 17, "orders": 2 },
            doc! { "_id": "b", "total": 5, "orders": 1 },
        ]
    );
}

#[tokio::test]
async fn streams_yield_each_result() {
    let orders = orders().await;

    let items = orders
        .aggregate(vec![Stage::Unwind("items".into())])
        .project(Projection::include(["items"]).without_id())
        .stream()
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    assert_eq!(items, vec![doc! { "items": "x" }, doc! { "items": "y" }, doc! { "items": "z" }]);
}

#[tokio::test]
async fn counting_and_filtering() {
    let orders = orders().await;

    let counted = orders
        .aggregate(Pipeline::new())
        .filter(Filter::gt("amount", 6))
        .count("large")
        .exec()
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "large": 2 }]);

    let none = orders
        .aggregate(Pipeline::new())
        .filter(Filter::gt("amount", 100))
        .count("large")
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn empty_pipelines_are_rejected() {
    let orders = orders().await;

    let err = orders.aggregate(Pipeline::new()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));

    let err = orders
        .aggregate(Pipeline::new())
        .stream()
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidArgument(_)));
}
