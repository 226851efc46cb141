//! Dispatcher seam: the collaborator that performs one unit of outbound work.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use fanout_core::{DispatchOutcome, TargetDescriptor};

/// One dispatch attempt handed to a [`Dispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    /// Unique per attempt within the process: `{session}-{worker}-{attempt}`.
    pub attempt_id: &'a str,
    pub payload: &'a [u8],
    pub target: &'a TargetDescriptor,
}

/// Performs one unit of work through one target and classifies the result.
///
/// Implementations own their own timeout. Failures are returned as
/// outcomes, never as errors; a panic is caught by the worker and recorded
/// as [`DispatchOutcome::Unexpected`].
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, request: DispatchRequest<'_>) -> impl Future<Output = DispatchOutcome> + Send;
}

/// Run one dispatch, converting a panic into an `Unexpected` outcome.
pub(crate) async fn dispatch_guarded<D: Dispatcher>(
    dispatcher: &D,
    request: DispatchRequest<'_>,
) -> DispatchOutcome {
    match AssertUnwindSafe(dispatcher.dispatch(request))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => DispatchOutcome::Unexpected {
            detail: format!("dispatcher panicked: {}", panic_message(panic.as_ref())),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
