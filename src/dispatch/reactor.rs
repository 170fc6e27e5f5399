//! Reactors: one channel, one protocol, one slot table.

use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::dispatch::slot::{MessageSlot, Slot};
use crate::protocol::wire::{self, pack_value, unpack_value, ArgTuple, FrameReader, FrameWriter};
use crate::protocol::{Message, Protocol, ProtocolError};

/// Error code carried by protocol-fault `error` frames.
pub const PROTOCOL_FAULT: i32 = 1;

/// A message-passing endpoint: two-part messages, opcode then payload.
pub trait Channel {
    /// Receive one message; `None` on clean end of stream.
    fn recv(&mut self) -> Result<Option<(u32, Vec<u8>)>, ProtocolError>;

    fn send(&mut self, opcode: u32, payload: &[u8]) -> Result<(), ProtocolError>;
}

/// Channel over any byte stream, using checksummed frames.
pub struct FramedChannel<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: Read, W: Write> FramedChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }
}

impl<R: Read, W: Write> Channel for FramedChannel<R, W> {
    fn recv(&mut self) -> Result<Option<(u32, Vec<u8>)>, ProtocolError> {
        let Some(opcode_frame) = self.reader.read_frame()? else {
            return Ok(None);
        };
        let opcode = unpack_value::<u64>(&opcode_frame)? as u32;

        let payload = self.reader.read_frame()?.ok_or_else(|| {
            ProtocolError::Frame(wire::FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "message truncated after opcode frame",
            )))
        })?;
        Ok(Some((opcode, payload)))
    }

    fn send(&mut self, opcode: u32, payload: &[u8]) -> Result<(), ProtocolError> {
        let opcode_frame = pack_value(&(opcode as u64))?;
        self.writer.write_frame(&opcode_frame)?;
        self.writer.write_frame(payload)?;
        Ok(())
    }
}

/// Binds a protocol tag to a slot table indexed by opcode.
pub struct Reactor<P> {
    slots: Vec<Option<Box<dyn Slot>>>,
    _proto: PhantomData<fn(P)>,
}

impl<P: Protocol> Default for Reactor<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Reactor<P> {
    pub fn new() -> Self {
        Self {
            slots: (0..P::SPAN).map(|_| None).collect(),
            _proto: PhantomData,
        }
    }

    /// Install `handler` at the message's opcode; re-installation replaces.
    pub fn on<M, F>(&mut self, handler: F)
    where
        M: Message<Proto = P>,
        F: Fn(M::Args) -> M::Reply + Send + 'static,
    {
        self.slots[M::OPCODE as usize] = Some(Box::new(MessageSlot::<M, F>::new(handler)));
    }

    /// Route one message to the slot at its opcode.
    pub fn dispatch(&self, opcode: u32, payload: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let slot = self
            .slots
            .get(opcode as usize)
            .and_then(Option::as_ref)
            .ok_or(ProtocolError::UnknownOpcode(opcode))?;
        slot.call(payload)
    }

    /// Drain a channel until end of stream.
    ///
    /// Dispatch failures terminate the offending session, never the reactor;
    /// transport failures propagate.
    pub fn serve(&self, channel: &mut dyn Channel) -> Result<(), ProtocolError> {
        while let Some((opcode, payload)) = channel.recv()? {
            match self.dispatch(opcode, &payload) {
                Ok(Some(reply)) => channel.send(opcode, &reply)?,
                Ok(None) => {}
                Err(err) => self.fault(channel, &payload, err)?,
            }
        }
        Ok(())
    }

    fn fault(
        &self,
        channel: &mut dyn Channel,
        payload: &[u8],
        err: ProtocolError,
    ) -> Result<(), ProtocolError> {
        match P::ERROR_OPCODE {
            Some(opcode) => {
                let session = wire::peek_session(payload);
                tracing::warn!(protocol = P::NAME, session, "protocol error: {err}");
                let mut frame = Vec::new();
                (session, PROTOCOL_FAULT, err.to_string()).pack(&mut frame)?;
                channel.send(opcode, &frame)
            }
            None => {
                tracing::warn!(protocol = P::NAME, "dropping frame: {err}");
                Ok(())
            }
        }
    }
}
