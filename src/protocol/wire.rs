//! Wire primitives: checksummed frames and packed CBOR values.
//!
//! Every channel in the system carries frames: a u32 LE length, a crc32c of
//! the body, then the body itself. On top of that, typed values and argument
//! tuples are packed as definite-length CBOR.

use std::convert::Infallible;
use std::io::{Read, Write};

use crc32c::crc32c;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

/// Length (u32 LE) plus checksum (u32 LE).
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {got} bytes exceeds the {limit} byte limit")]
    TooLarge { limit: usize, got: usize },

    #[error("frame checksum mismatch: header says {expected}, body hashes to {got}")]
    Checksum { expected: u32, got: u32 },
}

/// Protocol-level failures: the dynamic wire disagreeing with the static
/// message catalog.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),

    #[error("argument sequence length mismatch: expected {expected}, got {got}")]
    ArityMismatch { expected: u64, got: u64 },

    #[error("argument {index} type mismatch: expected {expected}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
    },

    #[error("argument tuple must be a definite-length array")]
    IndefiniteTuple,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("malformed payload: {0}")]
    Decode(#[from] minicbor::decode::Error),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
}

// =============================================================================
// Framing
// =============================================================================

pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read one frame. `Ok(None)` is a clean end of stream; truncation in the
    /// middle of a frame is an error.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match fill(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < FRAME_HEADER_LEN => {
                return Err(truncated("frame header truncated"));
            }
            _ => {}
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if length > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge {
                limit: MAX_FRAME_BYTES,
                got: length,
            });
        }

        let mut body = vec![0u8; length];
        if fill(&mut self.reader, &mut body)? < length {
            return Err(truncated("frame body truncated"));
        }

        let got = crc32c(&body);
        if got != expected {
            return Err(FrameError::Checksum { expected, got });
        }
        Ok(Some(body))
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        if body.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge {
                limit: MAX_FRAME_BYTES,
                got: body.len(),
            });
        }
        let length = body.len() as u32;
        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&crc32c(body).to_le_bytes())?;
        self.writer.write_all(body)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Encode a frame into a standalone buffer (announce datagrams).
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32c(body).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut read = 0;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

fn truncated(what: &str) -> FrameError {
    FrameError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        what.to_string(),
    ))
}

// =============================================================================
// Packed values
// =============================================================================

/// A value that can cross the worker wire as one CBOR item.
pub trait WireValue: Sized {
    /// Human name of the expected CBOR shape, for type mismatch errors.
    const EXPECTED: &'static str;

    /// Unit replies produce no reply frame at all.
    const IS_UNIT: bool = false;

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError>;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error>;
}

impl WireValue for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.u64(*self)?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.u64()
    }
}

impl WireValue for i32 {
    const EXPECTED: &'static str = "integer";

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.i32(*self)?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.i32()
    }
}

impl WireValue for String {
    const EXPECTED: &'static str = "text string";

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.str(self)?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.str().map(str::to_string)
    }
}

impl WireValue for Vec<u8> {
    const EXPECTED: &'static str = "byte string";

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.bytes(self)?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.bytes().map(<[u8]>::to_vec)
    }
}

impl WireValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.bool(*self)?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.bool()
    }
}

impl WireValue for () {
    const EXPECTED: &'static str = "null";
    const IS_UNIT: bool = true;

    fn encode(&self, encoder: &mut Encoder<&mut Vec<u8>>) -> Result<(), ProtocolError> {
        encoder.null()?;
        Ok(())
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, minicbor::decode::Error> {
        decoder.null()
    }
}

/// Pack a single value into a standalone buffer.
pub fn pack_value<V: WireValue>(value: &V) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    value.encode(&mut encoder)?;
    Ok(buf)
}

/// Unpack a single value from a buffer produced by [`pack_value`].
pub fn unpack_value<V: WireValue>(payload: &[u8]) -> Result<V, ProtocolError> {
    let mut decoder = Decoder::new(payload);
    Ok(V::decode(&mut decoder)?)
}

// =============================================================================
// Argument tuples
// =============================================================================

/// A message's typed argument tuple: packed as a definite CBOR array whose
/// length equals the declared arity.
pub trait ArgTuple: Sized {
    const ARITY: u64;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError>;

    /// Decode a packed array, left to right. On any failure the
    /// already-decoded prefix is dropped and no handler runs.
    fn unpack(payload: &[u8]) -> Result<Self, ProtocolError>;
}

fn open_array(decoder: &mut Decoder<'_>, arity: u64) -> Result<(), ProtocolError> {
    let len = decoder.array()?.ok_or(ProtocolError::IndefiniteTuple)?;
    if len != arity {
        return Err(ProtocolError::ArityMismatch {
            expected: arity,
            got: len,
        });
    }
    Ok(())
}

fn element<V: WireValue>(decoder: &mut Decoder<'_>, index: usize) -> Result<V, ProtocolError> {
    V::decode(decoder).map_err(|_| ProtocolError::TypeMismatch {
        index,
        expected: V::EXPECTED,
    })
}

impl ArgTuple for () {
    const ARITY: u64 = 0;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        Encoder::new(buf).array(0)?;
        Ok(())
    }

    fn unpack(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = Decoder::new(payload);
        open_array(&mut decoder, 0)?;
        Ok(())
    }
}

impl<A: WireValue> ArgTuple for (A,) {
    const ARITY: u64 = 1;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut encoder = Encoder::new(buf);
        encoder.array(1)?;
        self.0.encode(&mut encoder)?;
        Ok(())
    }

    fn unpack(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = Decoder::new(payload);
        open_array(&mut decoder, 1)?;
        Ok((element::<A>(&mut decoder, 0)?,))
    }
}

impl<A: WireValue, B: WireValue> ArgTuple for (A, B) {
    const ARITY: u64 = 2;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut encoder = Encoder::new(buf);
        encoder.array(2)?;
        self.0.encode(&mut encoder)?;
        self.1.encode(&mut encoder)?;
        Ok(())
    }

    fn unpack(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = Decoder::new(payload);
        open_array(&mut decoder, 2)?;
        Ok((
            element::<A>(&mut decoder, 0)?,
            element::<B>(&mut decoder, 1)?,
        ))
    }
}

impl<A: WireValue, B: WireValue, C: WireValue> ArgTuple for (A, B, C) {
    const ARITY: u64 = 3;

    fn pack(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut encoder = Encoder::new(buf);
        encoder.array(3)?;
        self.0.encode(&mut encoder)?;
        self.1.encode(&mut encoder)?;
        self.2.encode(&mut encoder)?;
        Ok(())
    }

    fn unpack(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = Decoder::new(payload);
        open_array(&mut decoder, 3)?;
        Ok((
            element::<A>(&mut decoder, 0)?,
            element::<B>(&mut decoder, 1)?,
            element::<C>(&mut decoder, 2)?,
        ))
    }
}

/// Best-effort peek of a session id from a packed tuple whose first argument
/// should be one. Used when building error frames for payloads that failed to
/// decode.
pub fn peek_session(payload: &[u8]) -> u64 {
    let mut decoder = Decoder::new(payload);
    match decoder.array() {
        Ok(Some(len)) if len > 0 => decoder.u64().unwrap_or(0),
        _ => 0,
    }
}
