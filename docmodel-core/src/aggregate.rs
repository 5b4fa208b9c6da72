//! Deferred aggregation over a model's collection.
//!
//! [`Model::aggregate`](crate::model::Model::aggregate) returns an [`Aggregate`]. Stages can
//! be appended with the builder methods; the pipeline runs when the handle is awaited or
//! when its [`stream`](Aggregate::stream) is first polled.
//!
//! ```ignore
//! let totals = orders
//!     .aggregate(Pipeline::new())
//!     .filter(Filter::eq("status", "paid"))
//!     .group(Some("customer"), [("total", Accumulator::Sum("amount".into()))])
//!     .sort(Sort::desc("total"))
//!     .await?;
//!
//! let mut rows = orders.aggregate(Pipeline::new()).unwind("items").stream();
//! while let Some(row) = rows.try_next().await? {
//!     tracing::info!(?row, "item");
//! }
//! ```

use bson::Document;
use futures::{
    FutureExt, StreamExt, TryStreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use std::future::IntoFuture;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    connection::Connection,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, Pipeline, Stage},
    query::{Expr, Projection, Sort},
};

/// A pipeline bound to a collection, not yet executed.
#[derive(Debug)]
pub struct Aggregate<B: StoreBackend> {
    connection: Connection<B>,
    collection: String,
    pipeline: Pipeline,
}

impl<B: StoreBackend> Aggregate<B> {
    pub(crate) fn new(connection: Connection<B>, collection: String, pipeline: Pipeline) -> Self {
        Self { connection, collection, pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Appends a stage.
    pub fn append(mut self, stage: Stage) -> Self {
        self.pipeline.push(stage);
        self
    }

    /// Keeps documents matching `filter` (a `$match` stage).
    pub fn filter(self, filter: Expr) -> Self {
        self.append(Stage::Match(filter))
    }

    pub fn project(self, projection: Projection) -> Self {
        self.append(Stage::Project(projection))
    }

    /// Sorts by one key. Consecutive calls add separate sort stages; use
    /// [`sort_by`](Self::sort_by) for a compound sort.
    pub fn sort(self, sort: Sort) -> Self {
        self.append(Stage::Sort(vec![sort]))
    }

    pub fn sort_by(self, sort: impl IntoIterator<Item = Sort>) -> Self {
        self.append(Stage::Sort(sort.into_iter().collect()))
    }

    pub fn skip(self, count: usize) -> Self {
        self.append(Stage::Skip(count))
    }

    pub fn limit(self, count: usize) -> Self {
        self.append(Stage::Limit(count))
    }

    /// Groups by the value at `key`, or everything into one group with `None`.
    pub fn group<K, N>(self, key: Option<K>, accumulators: impl IntoIterator<Item = (N, Accumulator)>) -> Self
    where
        K: Into<String>,
        N: Into<String>,
    {
        self.append(Stage::Group {
            key: key.map(Into::into),
            accumulators: accumulators
                .into_iter()
                .map(|(name, accumulator)| (name.into(), accumulator))
                .collect(),
        })
    }

    pub fn unwind(self, path: impl Into<String>) -> Self {
        self.append(Stage::Unwind(path.into()))
    }

    /// Replaces the input with `{ <field>: <number of documents> }`, or with nothing when
    /// no documents reach this stage.
    pub fn count(self, field: impl Into<String>) -> Self {
        self.append(Stage::Count(field.into()))
    }

    /// Runs the pipeline and collects every result.
    pub async fn exec(self) -> DocumentStoreResult<Vec<Document>> {
        if self.pipeline.is_empty() {
            return Err(DocumentStoreError::InvalidArgument(
                "aggregation pipeline must have at least one stage".into(),
            ));
        }

        debug!(collection = %self.collection, stages = self.pipeline.stages().len(), "aggregate");
        self.connection
            .collection(&self.collection)
            .aggregate(self.pipeline)
            .await
    }
}

impl<B: StoreBackend + 'static> Aggregate<B> {
    /// Streams the results. The pipeline is sent when the stream is first polled.
    pub fn stream(self) -> BoxStream<'static, DocumentStoreResult<Document>> {
        stream::once(self.exec())
            .map_ok(|documents| stream::iter(documents.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

impl<B: StoreBackend + 'static> IntoFuture for Aggregate<B> {
    type Output = DocumentStoreResult<Vec<Document>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.exec().boxed()
    }
}
