// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job handler seam.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use courier_core::CourierError;

use crate::job::QueueJob;

/// Processes jobs of one queue direction.
///
/// The returned value becomes the job's stored result and is handed to
/// callers waiting on the job. Errors for which
/// [`CourierError::is_retryable`] is false skip the remaining attempts.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CourierError>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wraps `f` so it can be registered as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(QueueJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, CourierError>> + Send + 'static,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(QueueJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, CourierError>> + Send + 'static,
{
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CourierError> {
        (self.f)(job.clone()).await
    }
}
