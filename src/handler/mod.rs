//! Handler runtimes.
//!
//! A [`Handler`] turns an event/context pair into a [`HandlerResult`]. Two
//! implementations exist: [`FnHandler`] wraps a typed Rust function and runs it
//! on the blocking pool, and [`ProcessHandler`] runs an endpoint's code as a
//! subprocess speaking JSON over stdin/stdout.

pub mod process;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::InvocationContext;
use crate::error::SpaError;
use crate::event::InvocationEvent;
use crate::response::HandlerResult;

pub use process::ProcessHandler;

/// Plain handler function signature.
pub type HandlerFn = fn(InvocationEvent, InvocationContext) -> HandlerResult;

/// A unit of business logic invoked with an event and a context.
pub trait Handler: Send + Sync + 'static {
    /// Invoke the handler for endpoint `name`.
    fn invoke(
        &self,
        name: &str,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> BoxFuture<'static, crate::Result<HandlerResult>>;
}

/// Adapter running a synchronous function on tokio's blocking pool.
///
/// A panic inside the function is reported as [`SpaError::HandlerFailed`].
#[derive(Clone)]
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(InvocationEvent, InvocationContext) -> HandlerResult + Clone + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(InvocationEvent, InvocationContext) -> HandlerResult + Clone + Send + Sync + 'static,
{
    fn invoke(
        &self,
        name: &str,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> BoxFuture<'static, crate::Result<HandlerResult>> {
        let func = self.func.clone();
        let name = name.to_string();
        async move {
            tokio::task::spawn_blocking(move || func(event, context))
                .await
                .map_err(|e| {
                    let reason = if e.is_panic() {
                        "handler panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    SpaError::HandlerFailed(name, reason)
                })
        }
        .boxed()
    }
}
