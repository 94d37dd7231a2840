pub mod consts;
pub mod envelope;
pub mod error;
pub mod link;

pub use envelope::{ClientEnvelope, ServerEnvelope, SignalPayload};
pub use error::SocketError;
pub use link::{LinkCommand, SignalLink};
