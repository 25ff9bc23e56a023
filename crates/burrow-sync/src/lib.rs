pub mod driver;
pub mod packet;
pub mod transport;

pub use driver::{FlushReport, OutgoingMessage, SyncConfig, SyncDriver};
pub use packet::IncomingPacket;
pub use transport::{DeliveryError, LoopbackTransport, Transport};
