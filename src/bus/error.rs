use thiserror::Error;

use super::BacklogError;

/// Errors raised by the bus client and broker channels.
#[derive(Debug, Error)]
pub enum BusError {
    /// No broker connection is currently established.
    #[error("not connected to the message broker")]
    NotConnected,
    /// Opening a connection to the broker failed.
    #[error("connection to the message broker failed: {0}")]
    ConnectionFailed(String),
    /// The channel was closed underneath the caller.
    #[error("broker channel is closed")]
    ChannelClosed,
    /// The broker refused the operation.
    #[error("broker rejected the operation: {0}")]
    Rejected(String),
    /// A subscription for this queue already exists.
    #[error("queue {0} already has a subscription")]
    AlreadySubscribed(String),
    /// The client was closed and accepts no further work.
    #[error("bus client is closed")]
    Closed,
    #[error(transparent)]
    Backlog(#[from] BacklogError),
    #[error("failed to encode message payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BusError {
    /// Errors that mean the connection is gone and should be re-established.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            BusError::NotConnected | BusError::ConnectionFailed(_) | BusError::ChannelClosed
        )
    }
}
