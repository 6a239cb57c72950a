//! TCP front end: listener supervision and the request protocol.

pub mod listener;
mod protocol;

pub use listener::{ConnectionHandler, DrainSignal, ListenerState, ListenerSupervisor};
pub use protocol::UserProtocol;
