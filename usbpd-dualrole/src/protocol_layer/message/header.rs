//! The 16-bit message header that starts every PD message, and the message type tables.
//!
//! A port keeps one header as a template that carries its present roles and revision. Outgoing
//! headers are stamped from it, so a role swap or a revision downgrade only touches the template.
use core::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::protocol_layer::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// Message header.
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Set for extended messages.
        pub extended: bool @ 15,
        /// Number of 32-bit data objects after the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// Rolling message ID of the originator.
        pub message_id: u8 @ 9..=11,
        /// Power role of the sender. On SOP' and SOP'', this is the cable plug bit instead.
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// Specification revision. The reserved value fails to parse.
        pub spec_revision: u8 [try_get SpecificationRevision, set SpecificationRevision] @ 6..=7,
        /// Data role of the sender. Reserved on SOP' and SOP''.
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// Message type code, interpreted together with `extended` and `num_objects`.
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// The template of a port in the given roles.
    ///
    /// Message ID, type and length are filled in per message.
    pub fn for_port(power_role: PowerRole, data_role: DataRole, revision: SpecificationRevision) -> Self {
        Self(0)
            .with_port_power_role(power_role)
            .with_port_data_role(data_role)
            .with_spec_revision(revision)
    }

    /// The same template after a power or data role change.
    pub fn with_roles(self, power_role: PowerRole, data_role: DataRole) -> Self {
        self.with_port_power_role(power_role).with_port_data_role(data_role)
    }

    fn stamp(self, message_id: u8, message_type: MessageType, num_objects: u8) -> Self {
        let (raw, extended) = match message_type {
            MessageType::Control(control) => (control as u8, false),
            MessageType::Data(data) => (data as u8, false),
            MessageType::Extended(extended) => (extended as u8, true),
        };

        self.with_message_id(message_id)
            .with_message_type_raw(raw)
            .with_num_objects(num_objects)
            .with_extended(extended)
    }

    /// A control message header, built from this template.
    pub fn control_message(self, message_id: u8, message_type: ControlMessageType) -> Self {
        self.stamp(message_id, MessageType::Control(message_type), 0)
    }

    /// A data message header, built from this template.
    pub fn data_message(self, message_id: u8, message_type: DataMessageType, num_objects: u8) -> Self {
        self.stamp(message_id, MessageType::Data(message_type), num_objects)
    }

    /// An extended message header, built from this template.
    ///
    /// `num_objects` counts the extended header and the padded payload.
    pub fn extended_message(self, message_id: u8, message_type: ExtendedMessageType, num_objects: u8) -> Self {
        self.stamp(message_id, MessageType::Extended(message_type), num_objects)
    }

    /// The GoodCRC that acknowledges `received`.
    pub fn good_crc_for(self, received: Header) -> Self {
        self.control_message(received.message_id(), ControlMessageType::GoodCRC)
    }

    /// Parse a header, and reject the reserved revision.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        let header = Header(LittleEndian::read_u16(buf));
        header.spec_revision()?;
        Ok(header)
    }

    /// Serialize the header, returning its length.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// The message type, which depends on the extended bit and the object count.
    pub fn message_type(&self) -> MessageType {
        let raw = self.message_type_raw();

        match (self.extended(), self.num_objects()) {
            (true, _) => MessageType::Extended(raw.into()),
            (false, 0) => MessageType::Control(raw.into()),
            (false, _) => MessageType::Data(raw.into()),
        }
    }

    /// Whether the header encodes the given control message.
    pub fn is_control(&self, message_type: ControlMessageType) -> bool {
        self.message_type() == MessageType::Control(message_type)
    }

    /// Whether the header belongs to a GoodCRC.
    pub fn is_good_crc(&self) -> bool {
        self.is_control(ControlMessageType::GoodCRC)
    }
}

/// PD specification revisions, in the order of the two header bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(non_camel_case_types, missing_docs)]
pub enum SpecificationRevision {
    R1_0,
    R2_0,
    R3_X,
}

impl SpecificationRevision {
    /// The revision that both ports speak: the lower of the two.
    pub fn negotiate(self, partner: Self) -> Self {
        self.min(partner)
    }

    /// Extended messages, Not_Supported and the PD 3.0 information exchange need revision 3.
    pub fn has_pd3_messages(self) -> bool {
        self >= Self::R3_X
    }
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        [Self::R1_0, Self::R2_0, Self::R3_X]
            .get(usize::from(value))
            .copied()
            .ok_or(ParseError::UnsupportedSpecificationRevision(value))
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        value as u8
    }
}

/// The type of message that a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum MessageType {
    Control(ControlMessageType),
    Data(DataMessageType),
    Extended(ExtendedMessageType),
}

/// Declare a message type table, with `Reserved` for every unlisted code.
macro_rules! message_types {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[allow(missing_docs)]
        pub enum $name {
            $($variant = $code,)*
            Reserved = 0x1f,
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    $($code => Self::$variant,)*
                    _ => Self::Reserved,
                }
            }
        }
    };
}

message_types! {
    /// Control messages, which carry no data objects.
    ControlMessageType {
        GoodCRC = 0x01,
        GotoMin = 0x02,
        Accept = 0x03,
        Reject = 0x04,
        Ping = 0x05,
        PsRdy = 0x06,
        GetSourceCap = 0x07,
        GetSinkCap = 0x08,
        DrSwap = 0x09,
        PrSwap = 0x0a,
        VconnSwap = 0x0b,
        Wait = 0x0c,
        SoftReset = 0x0d,
        DataReset = 0x0e,
        DataResetComplete = 0x0f,
        NotSupported = 0x10,
        GetSourceCapExtended = 0x11,
        GetStatus = 0x12,
        FrSwap = 0x13,
        GetPpsStatus = 0x14,
        GetCountryCodes = 0x15,
        GetSinkCapExtended = 0x16,
        GetSourceInfo = 0x17,
        GetRevision = 0x18,
    }
}

message_types! {
    /// Data messages.
    DataMessageType {
        SourceCapabilities = 0x01,
        Request = 0x02,
        Bist = 0x03,
        SinkCapabilities = 0x04,
        BatteryStatus = 0x05,
        Alert = 0x06,
        GetCountryInfo = 0x07,
        EnterUsb = 0x08,
        EprRequest = 0x09,
        EprMode = 0x0a,
        SourceInfo = 0x0b,
        Revision = 0x0c,
        VendorDefined = 0x0f,
    }
}

message_types! {
    /// Extended messages, which start with an extended header.
    ExtendedMessageType {
        SourceCapabilitiesExtended = 0x01,
        Status = 0x02,
        GetBatteryCap = 0x03,
        GetBatteryStatus = 0x04,
        BatteryCapabilities = 0x05,
        GetManufacturerInfo = 0x06,
        ManufacturerInfo = 0x07,
        SecurityRequest = 0x08,
        SecurityResponse = 0x09,
        FirmwareUpdateRequest = 0x0a,
        FirmwareUpdateResponse = 0x0b,
        PpsStatus = 0x0c,
        CountryInfo = 0x0d,
        CountryCodes = 0x0e,
        SinkCapabilitiesExtended = 0x0f,
        ExtendedControl = 0x10,
    }
}
