//! Definitions and implementations of extended messages.
//!
//! Only extended messages that fit into a single chunk are supported.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;

use super::ParseError;
use super::header::ExtendedMessageType;

/// Maximum data bytes in a single extended message chunk.
pub const MAX_EXTENDED_CHUNK_LEN: usize = 26;

bitfield! {
    /// Extended message header.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Whether the message is chunked.
        pub chunked: bool @ 15,
        /// Chunk number of this extended message.
        pub chunk_number: u8 @ 11..=14,
        /// Request chunk flag.
        pub request_chunk: bool @ 10,
        /// Payload size in bytes.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Create a header for the first and only chunk of a payload.
    pub fn new(data_size: u16) -> Self {
        Self(0).with_chunked(true).with_data_size(data_size)
    }
}

/// The payload of an extended message: extended header and data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtendedPayload {
    /// The extended header.
    pub header: ExtendedHeader,
    /// Message data, without padding.
    pub data: Vec<u8, MAX_EXTENDED_CHUNK_LEN>,
}

impl ExtendedPayload {
    /// Create a single chunk payload, failing if `data` does not fit into one chunk.
    pub fn new(data: &[u8]) -> Result<Self, ParseError> {
        let data = Vec::from_slice(data).map_err(|_| ParseError::ChunkingNotSupported(data.len() as u16))?;

        Ok(Self {
            header: ExtendedHeader::new(data.len() as u16),
            data,
        })
    }

    /// Create a single chunk payload from data that is known to fit.
    pub fn from_data(data: Vec<u8, MAX_EXTENDED_CHUNK_LEN>) -> Self {
        Self {
            header: ExtendedHeader::new(data.len() as u16),
            data,
        }
    }

    /// Parse an extended payload, including its extended header.
    pub fn parse(message_type: ExtendedMessageType, payload: &[u8]) -> Result<Self, ParseError> {
        if message_type == ExtendedMessageType::Reserved {
            return Err(ParseError::InvalidMessageType(message_type as u8));
        }

        if payload.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: payload.len(),
            });
        }

        let header = ExtendedHeader(LittleEndian::read_u16(payload));
        let size = usize::from(header.data_size());

        if size > MAX_EXTENDED_CHUNK_LEN || header.chunk_number() != 0 {
            return Err(ParseError::ChunkingNotSupported(header.data_size()));
        }

        let data = payload
            .get(2..2 + size)
            .ok_or(ParseError::InvalidLength {
                expected: 2 + size,
                found: payload.len(),
            })?;

        Ok(Self {
            header,
            data: Vec::from_slice(data).map_err(|_| ParseError::ChunkingNotSupported(header.data_size()))?,
        })
    }

    /// Number of 32-bit objects the padded payload occupies.
    pub fn num_objects(&self) -> u8 {
        (2 + self.data.len()).div_ceil(4) as u8
    }

    /// Serialize the payload with zero padding to a whole number of objects, returning the number of written bytes.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        let len = usize::from(self.num_objects()) * 4;

        LittleEndian::write_u16(buf, self.header.0);
        buf[2..2 + self.data.len()].copy_from_slice(&self.data);
        buf[2 + self.data.len()..len].fill(0);
        len
    }
}
