//! Process-wide exception reporting.

use crate::error::{JobError, JobResult};
use crate::metrics::ConsumerMetrics;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

/// Sink for errors that must not be lost, whether or not they are also
/// returned to a caller.
pub trait ExceptionSink: Send + Sync {
    /// Reports an error.
    fn report(&self, error: &JobError);
}

/// Logs reported errors and counts them by code.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExceptionSink;

impl ExceptionSink for TracingExceptionSink {
    fn report(&self, error: &JobError) {
        ConsumerMetrics::exception(error.code());
        error!(code = error.code(), error = %error, "Unhandled job error");
    }
}

/// Runs `future` as a detached task; a failure goes to `sink`.
///
/// The caller never awaits the task, so a slow or failing side channel
/// cannot hold up the primary operation.
pub fn spawn_reported(
    sink: Arc<dyn ExceptionSink>,
    future: BoxFuture<'static, JobResult<()>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = future.await {
            sink.report(&e);
        }
    })
}
