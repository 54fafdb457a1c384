use super::BusError;

/// Fire-and-forget publishing of encoded events.
///
/// Implementations return once the message is sent or safely queued for a
/// later send; success does not mean a consumer has received it.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

impl<T: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        (**self).publish(exchange, routing_key, payload)
    }
}
