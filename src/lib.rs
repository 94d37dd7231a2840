//! Two-party real-time audio calling over a websocket signaling relay.
//!
//! The crate is organized around a single call-session state machine:
//!
//! - [`socket`]: the signaling link — owns the websocket to the relay and
//!   moves typed envelopes in arrival order.
//! - [`media`]: the local capture source — acquired once per process and
//!   shared across sequential calls.
//! - [`session`]: the session engine — one serialized event queue driving
//!   room membership, offer/answer/candidate sequencing, and teardown.
//! - [`manager`]: the [`CallClient`] facade exposed to presentation code.

pub mod config;
pub mod manager;
pub mod media;
pub mod session;
pub mod socket;
pub mod types;

pub use config::CallConfig;
pub use manager::CallClient;
pub use session::{CallError, CallEvent, SessionSnapshot, SessionState};
pub use types::{PeerId, RoomId};
