//! Slots: the bridge from packed argument arrays to typed handlers.
//!
//! This is the one place where dynamic wire bytes cross into statically
//! typed code; every protocol handler stays a plain typed function.

use std::marker::PhantomData;

use crate::protocol::wire::{pack_value, ArgTuple, WireValue};
use crate::protocol::{Message, ProtocolError};

/// A handler bound to one message shape.
pub trait Slot: Send {
    fn name(&self) -> &'static str;

    /// Decode the packed argument array, invoke the handler and pack its
    /// reply. `None` when the message's reply type is unit.
    fn call(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError>;
}

/// The typed slot for message `M`: stateless except for the callable.
pub struct MessageSlot<M, F> {
    handler: F,
    _message: PhantomData<fn(M)>,
}

impl<M, F> MessageSlot<M, F> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

impl<M, F> Slot for MessageSlot<M, F>
where
    M: Message,
    F: Fn(M::Args) -> M::Reply + Send,
{
    fn name(&self) -> &'static str {
        M::NAME
    }

    fn call(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let args = M::Args::unpack(payload)?;
        let reply = (self.handler)(args);
        if <M::Reply as WireValue>::IS_UNIT {
            Ok(None)
        } else {
            Ok(Some(pack_value(&reply)?))
        }
    }
}
