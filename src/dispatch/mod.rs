//! Decoding and routing of inbound protocol messages.

mod reactor;
mod slot;

pub use reactor::{Channel, FramedChannel, Reactor, PROTOCOL_FAULT};
pub use slot::{MessageSlot, Slot};
