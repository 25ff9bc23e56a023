use burrow_types::models::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Hands an outgoing message to the network.
///
/// `Ok` means the message left this device; the driver then marks it sent.
/// Any error puts it back in the queue for a later retry.
pub trait Transport: Send + Sync {
    fn deliver(&self, message: &Message) -> Result<(), DeliveryError>;

    /// Whether a successful delivery also stands for the peer's delivery
    /// receipt. When `true` the driver marks sent messages delivered itself.
    fn confirms_delivery(&self) -> bool {
        false
    }
}

/// Transport with no network behind it. Every delivery succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackTransport;

impl Transport for LoopbackTransport {
    fn deliver(&self, _message: &Message) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn confirms_delivery(&self) -> bool {
        true
    }
}
