//! Declarative message catalogs for the node's protocols.
//!
//! A protocol is a tagged, ordered list of message shapes; the opcode of a
//! message is its position in that list, starting at zero, and is part of
//! the wire format. Appending a message is backward-compatible, reordering
//! is not.

pub mod wire;

pub use wire::{ArgTuple, FrameError, FrameReader, FrameWriter, ProtocolError, WireValue};

use minicbor::{Decoder, Encoder};

/// A protocol tag: names the message list and fixes its span.
pub trait Protocol: 'static {
    const NAME: &'static str;

    /// Number of opcodes in the protocol.
    const SPAN: u32;

    /// Opcode of the protocol's error message, when it carries one.
    /// Protocols without one drop undecodable frames with a warning.
    const ERROR_OPCODE: Option<u32> = None;
}

/// A message descriptor: opcode, typed argument tuple, reply type.
pub trait Message: 'static {
    type Proto: Protocol;
    type Args: ArgTuple;
    type Reply: WireValue;

    const OPCODE: u32;
    const NAME: &'static str;
}

/// Worker-facing protocol, node <-> slave.
///
/// A session is opened by `invoke`, carries zero or more `chunk`s and is
/// closed by exactly one of `choke` (success) or `error` (failure).
/// `heartbeat`, `terminate` and `suicide` are out-of-session.
pub mod rpc {
    use super::*;

    pub struct Rpc;

    impl Protocol for Rpc {
        const NAME: &'static str = "rpc";
        const SPAN: u32 = 7;
        const ERROR_OPCODE: Option<u32> = Some(Error::OPCODE);
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum SuicideReason {
        Normal = 0,
        Abnormal = 1,
    }

    impl WireValue for SuicideReason {
        const EXPECTED: &'static str = "suicide reason";

        fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
            encoder.i32(*self as i32)?;
            Ok(())
        }

        fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
            match decoder.i32()? {
                0 => Ok(SuicideReason::Normal),
                1 => Ok(SuicideReason::Abnormal),
                other => Err(minicbor::decode::Error::message(format!(
                    "invalid suicide reason {other}"
                ))),
            }
        }
    }

    /// Periodic liveness signal, worker to node. Stateless.
    pub struct Heartbeat;

    impl Message for Heartbeat {
        type Proto = Rpc;
        type Args = ();
        type Reply = ();
        const OPCODE: u32 = 0;
        const NAME: &'static str = "heartbeat";
    }

    /// Terminal announcement from worker to node; the node must not reply.
    pub struct Suicide;

    impl Message for Suicide {
        type Proto = Rpc;
        type Args = (SuicideReason, String);
        type Reply = ();
        const OPCODE: u32 = 1;
        const NAME: &'static str = "suicide";
    }

    /// Graceful shutdown order, node to worker.
    pub struct Terminate;

    impl Message for Terminate {
        type Proto = Rpc;
        type Args = ();
        type Reply = ();
        const OPCODE: u32 = 2;
        const NAME: &'static str = "terminate";
    }

    /// Opens a session.
    pub struct Invoke;

    impl Message for Invoke {
        type Proto = Rpc;
        type Args = (u64, String);
        type Reply = ();
        const OPCODE: u32 = 3;
        const NAME: &'static str = "invoke";
    }

    /// Streams payload within a session, either direction.
    pub struct Chunk;

    impl Message for Chunk {
        type Proto = Rpc;
        type Args = (u64, Vec<u8>);
        type Reply = ();
        const OPCODE: u32 = 4;
        const NAME: &'static str = "chunk";
    }

    /// Ends a session abnormally.
    pub struct Error;

    impl Message for Error {
        type Proto = Rpc;
        type Args = (u64, i32, String);
        type Reply = ();
        const OPCODE: u32 = 5;
        const NAME: &'static str = "error";
    }

    /// Ends a session normally.
    pub struct Choke;

    impl Message for Choke {
        type Proto = Rpc;
        type Args = (u64,);
        type Reply = ();
        const OPCODE: u32 = 6;
        const NAME: &'static str = "choke";
    }
}

/// Engine control protocol.
pub mod control {
    use super::*;

    pub struct Control;

    impl Protocol for Control {
        const NAME: &'static str = "control";
        const SPAN: u32 = 2;
    }

    /// Status snapshot request; replies with serialized engine info.
    pub struct Status;

    impl Message for Status {
        type Proto = Control;
        type Args = ();
        type Reply = String;
        const OPCODE: u32 = 0;
        const NAME: &'static str = "status";
    }

    pub struct Terminate;

    impl Message for Terminate {
        type Proto = Control;
        type Args = ();
        type Reply = ();
        const OPCODE: u32 = 1;
        const NAME: &'static str = "terminate";
    }
}

/// Logging service protocol.
pub mod logging {
    use super::*;

    pub struct Logging;

    impl Protocol for Logging {
        const NAME: &'static str = "logging";
        const SPAN: u32 = 1;
    }

    pub struct Emit;

    impl Message for Emit {
        type Proto = Logging;
        type Args = (i32, String, String);
        type Reply = bool;
        const OPCODE: u32 = 0;
        const NAME: &'static str = "emit";
    }
}
