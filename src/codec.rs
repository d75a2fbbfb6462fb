//! Framing codec contract and the serializers shipped with the crate.
//!
//! Every connection variant frames messages the same way: a fixed-size
//! header carrying the body length (big-endian), followed by the body.
//! A [`Serializer`] supplies the message-specific half: how to turn a
//! message into body bytes and back.

use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FramelinkError, Result};

/// Width of the length-prefix header in bytes.
const HEADER_LEN: usize = 4;

/// Default cap on body size for the shipped serializers (16 MiB).
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Message framing contract consumed by every connection variant.
///
/// `serialize` must emit the complete frame (header followed by body) and
/// `body_size` must read back the same layout the header was written with;
/// a mismatch corrupts framing silently on a stream.
pub trait Serializer: Send + Sync + 'static {
    /// The decoded message type this serializer produces and consumes.
    type Message: Send + 'static;

    /// Size of the fixed frame header in bytes.
    fn header_size(&self) -> usize;

    /// Extract the body length from a header of exactly `header_size()` bytes.
    fn body_size(&self, header: &[u8]) -> usize;

    /// Check a received header before trusting its length field.
    fn validate_header(&self, header: &[u8]) -> bool;

    /// Encode a message into a complete frame: header then body.
    fn serialize(&self, message: &Self::Message) -> Result<Bytes>;

    /// Decode a message from the body bytes of one frame.
    fn deserialize(&self, body: &[u8]) -> Result<Self::Message>;
}

fn encode_frame(body: &[u8], max_body: usize) -> Result<Bytes> {
    if body.len() > max_body {
        return Err(FramelinkError::MessageTooLarge {
            size: body.len(),
            max: max_body,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Reference serializer for UTF-8 string messages.
///
/// Frames are `[4-byte big-endian length][payload]`, so `"hi"` encodes to
/// `[0, 0, 0, 2, b'h', b'i']`.
#[derive(Debug, Clone)]
pub struct StringSerializer {
    max_body: usize,
}

impl StringSerializer {
    /// Create a serializer with the default body-size bound.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY)
    }

    /// Create a serializer rejecting bodies larger than `max_body` bytes.
    ///
    /// The length field is 4 bytes wide, so bounds beyond `u32::MAX`
    /// collapse to `u32::MAX`.
    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            max_body: max_body.min(u32::MAX as usize),
        }
    }
}

impl Default for StringSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer for StringSerializer {
    type Message = String;

    fn header_size(&self) -> usize {
        HEADER_LEN
    }

    fn body_size(&self, header: &[u8]) -> usize {
        BigEndian::read_u32(header) as usize
    }

    fn validate_header(&self, header: &[u8]) -> bool {
        header.len() == HEADER_LEN && self.body_size(header) <= self.max_body
    }

    fn serialize(&self, message: &String) -> Result<Bytes> {
        encode_frame(message.as_bytes(), self.max_body)
    }

    fn deserialize(&self, body: &[u8]) -> Result<String> {
        String::from_utf8(body.to_vec())
            .map_err(|e| FramelinkError::Codec(format!("invalid utf-8 body: {}", e)))
    }
}

/// Serializer for any `serde`-encodable message type, with JSON bodies.
///
/// Uses the same length-prefixed frame layout as [`StringSerializer`].
#[derive(Debug)]
pub struct JsonSerializer<T> {
    max_body: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Create a serializer with the default body-size bound.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY)
    }

    /// Create a serializer rejecting bodies larger than `max_body` bytes.
    ///
    /// The length field is 4 bytes wide, so bounds beyond `u32::MAX`
    /// collapse to `u32::MAX`.
    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            max_body: max_body.min(u32::MAX as usize),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        Self {
            max_body: self.max_body,
            _marker: PhantomData,
        }
    }
}

impl<T> Serializer for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Message = T;

    fn header_size(&self) -> usize {
        HEADER_LEN
    }

    fn body_size(&self, header: &[u8]) -> usize {
        BigEndian::read_u32(header) as usize
    }

    fn validate_header(&self, header: &[u8]) -> bool {
        header.len() == HEADER_LEN && self.body_size(header) <= self.max_body
    }

    fn serialize(&self, message: &T) -> Result<Bytes> {
        let body = serde_json::to_vec(message)
            .map_err(|e| FramelinkError::Codec(format!("json encode failed: {}", e)))?;
        encode_frame(&body, self.max_body)
    }

    fn deserialize(&self, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body)
            .map_err(|e| FramelinkError::Codec(format!("json decode failed: {}", e)))
    }
}
