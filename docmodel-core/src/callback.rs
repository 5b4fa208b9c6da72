//! Callback-style delivery for callers that cannot await results directly.
//!
//! Every operation in this crate is an `async fn` returning
//! [`DocumentStoreResult`]. [`CallbackExt`] adapts any such future at the call site so its
//! outcome is handed to a callback exactly once instead:
//!
//! ```ignore
//! use docmodel::callback::CallbackExt;
//!
//! users
//!     .find_by_id(id)
//!     .node_callback(|err, user| match err {
//!         Some(err) => tracing::error!("lookup failed: {}", err),
//!         None => tracing::info!("found: {:?}", user.flatten().map(|u| u.id())),
//!     })
//!     .await;
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Extension trait turning a result future into a callback invocation.
pub trait CallbackExt<T>: Future<Output = DocumentStoreResult<T>> + Send + Sized {
    /// Resolves the future and passes its result to `callback`.
    fn callback<'a, F>(self, callback: F) -> BoxFuture<'a, ()>
    where
        Self: 'a,
        F: FnOnce(DocumentStoreResult<T>) + Send + 'a,
    {
        self.map(callback).boxed()
    }

    /// Resolves the future and calls `callback(error, value)`: the error is `Some` and the
    /// value `None` on failure, and the other way round on success.
    fn node_callback<'a, F>(self, callback: F) -> BoxFuture<'a, ()>
    where
        Self: 'a,
        F: FnOnce(Option<DocumentStoreError>, Option<T>) + Send + 'a,
    {
        self.map(|result| match result {
            Ok(value) => callback(None, Some(value)),
            Err(err) => callback(Some(err), None),
        })
        .boxed()
    }
}

impl<T, Fut> CallbackExt<T> for Fut where Fut: Future<Output = DocumentStoreResult<T>> + Send {}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn success_is_delivered_as_value() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        async { Ok::<_, DocumentStoreError>(42) }
            .node_callback(move |err, value| {
                *sink.lock() = Some((err.is_none(), value));
            })
            .await;

        assert_eq!(*seen.lock(), Some((true, Some(42))));
    }

    #[tokio::test]
    async fn failure_is_delivered_as_error() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        async { Err::<u32, _>(DocumentStoreError::Backend("down".into())) }
            .callback(move |result| {
                *sink.lock() = Some(result.is_err());
            })
            .await;

        assert_eq!(*seen.lock(), Some(true));
    }
}
