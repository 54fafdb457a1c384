use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use super::Delivery;

/// Failure reported by a subscription handler. The delivery has already
/// been acknowledged, so the error is only logged.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("no handler for routing key {0}")]
    UnknownRoutingKey(String),
    #[error("{0}")]
    Failed(String),
}

/// Processes deliveries from one subscription, one at a time, in arrival order.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a [`MessageHandler`].
///
/// ```ignore
/// bus.subscribe("emailQueue", &["contest.end"], handler_fn(|delivery| async move {
///     let ended: ItemEnded = delivery.decode()?;
///     Ok(())
/// })).await?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        (self.0)(delivery).await
    }
}
