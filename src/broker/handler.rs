use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use crate::envelope::MessageEnvelope;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Receives decoded envelopes.
///
/// Called from a dedicated worker task, one envelope at a time. Returning
/// an error or panicking is logged and never stops later deliveries.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: Arc<MessageEnvelope>) -> Result<(), HandlerError>;

    /// Used in logs. Override with something short.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as an [`EnvelopeHandler`].
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EnvelopeHandler>
where
    F: Fn(Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EnvelopeHandler for FnHandler<F>
where
    F: Fn(Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, envelope: Arc<MessageEnvelope>) -> Result<(), HandlerError> {
        (self.f)(envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Run a handler, turning a panic into `HandlerError::Panicked`.
///
/// `AssertUnwindSafe`: a handler that panics while holding its own lock
/// can leave that state poisoned; that is the handler's problem, not the
/// dispatcher's.
pub(crate) async fn invoke_guarded(
    handler: &dyn EnvelopeHandler,
    envelope: Arc<MessageEnvelope>,
) -> Result<(), HandlerError> {
    match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
