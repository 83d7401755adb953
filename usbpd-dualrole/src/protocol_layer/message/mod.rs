//! Definitions of message content.
//!
//! A message is a header, followed by zero to seven 32-bit data objects, or an extended header and
//! up to one chunk of extended data.
pub mod data;
pub mod extended;
pub mod header;

use header::{ControlMessageType, Header, MessageType};

/// Maximum size of a message without CRC: header and seven data objects.
pub const MAX_MESSAGE_SIZE: usize = 30;

/// Errors that can occur during message/header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is not supported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// An unknown or reserved message type was encountered.
    #[error("unknown or reserved message type `{0}`")]
    InvalidMessageType(u8),
    /// An extended message spans more than one chunk.
    #[error("extended message of {0} bytes needs more than one chunk")]
    ChunkingNotSupported(u16),
    /// Other parsing error with a message.
    #[error("other parse error: {0}")]
    Other(&'static str),
}

/// Payload of a USB PD message, if any.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    /// Payload for a data message.
    Data(data::Data),
    /// Payload for an extended message.
    Extended(extended::ExtendedPayload),
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Optional payload for data and extended messages.
    pub payload: Option<Payload>,
}

impl Message {
    /// Create a new message from a message header.
    pub fn new(header: Header) -> Self {
        Self { header, payload: None }
    }

    /// Create a new message from a message header and payload data.
    pub fn new_with_data(header: Header, data: data::Data) -> Self {
        Self {
            header,
            payload: Some(Payload::Data(data)),
        }
    }

    /// Create a new message from a message header and extended payload.
    pub fn new_with_extended(header: Header, extended: extended::ExtendedPayload) -> Self {
        Self {
            header,
            payload: Some(Payload::Extended(extended)),
        }
    }

    /// The message type encoded in the header.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    /// Whether this is the given control message.
    pub fn is_control(&self, message_type: ControlMessageType) -> bool {
        self.header.is_control(message_type)
    }

    /// The data payload, if this is a data message.
    pub fn data(&self) -> Option<&data::Data> {
        match &self.payload {
            Some(Payload::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// The extended payload, if this is an extended message.
    pub fn extended(&self) -> Option<&extended::ExtendedPayload> {
        match &self.payload {
            Some(Payload::Extended(extended)) => Some(extended),
            _ => None,
        }
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        self.header.to_bytes(buffer)
            + match self.payload.as_ref() {
                Some(Payload::Data(data)) => data.to_bytes(&mut buffer[2..]),
                Some(Payload::Extended(extended)) => extended.to_bytes(&mut buffer[2..]),
                None => 0,
            }
    }

    /// Parse a message from a slice of bytes.
    ///
    /// The number of data objects in the header must match the payload length.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(data)?;
        let payload = &data[2..];

        let expected = header.num_objects() * 4;
        if payload.len() != expected {
            return Err(ParseError::InvalidLength {
                expected: expected + 2,
                found: data.len(),
            });
        }

        let mut message = Self::new(header);
        match header.message_type() {
            MessageType::Control(ControlMessageType::Reserved) => {
                return Err(ParseError::InvalidMessageType(header.message_type_raw()));
            }
            MessageType::Control(_) => (),
            MessageType::Data(message_type) => {
                message.payload = Some(Payload::Data(data::Data::parse(message_type, payload)?));
            }
            MessageType::Extended(message_type) => {
                message.payload = Some(Payload::Extended(extended::ExtendedPayload::parse(
                    message_type,
                    payload,
                )?));
            }
        }

        Ok(message)
    }
}
