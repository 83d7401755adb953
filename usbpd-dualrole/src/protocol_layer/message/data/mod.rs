//! Definitions and implementations of data messages.
//!
//! Every data message carries one to seven 32-bit objects, reinterpreted according to the message
//! type.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use super::ParseError;
use crate::protocol_layer::message::header::DataMessageType;

/// Maximum number of objects that follow a VDM header.
pub const MAX_VDOS: usize = 6;

/// Payload of a data message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Data {
    /// Source capabilities.
    SourceCapabilities(source_capabilities::SourceCapabilities),
    /// Sink capabilities.
    SinkCapabilities(sink_capabilities::SinkCapabilities),
    /// Request for a power level from the source.
    ///
    /// Kept raw, since its layout depends on the PDO it refers to. See [`request::PowerSource::interpret`].
    Request(request::RawDataObject),
    /// Built-in self test request.
    Bist(bist::BistDataObject),
    /// Battery status, in reply to Get_Battery_Status.
    BatteryStatus(status::BatteryStatusDataObject),
    /// Alert notification.
    Alert(status::AlertDataObject),
    /// Request for country specific information.
    GetCountryInfo(status::CountryCodeDataObject),
    /// Vendor defined message, a VDM header and its objects.
    VendorDefined((vendor_defined::VdmHeader, Vec<u32, MAX_VDOS>)),
    /// A data message that is not handled.
    Unknown(DataMessageType),
}

impl Data {
    /// Parse a data message payload.
    pub fn parse(message_type: DataMessageType, payload: &[u8]) -> Result<Self, ParseError> {
        let first = || {
            if payload.len() < 4 {
                Err(ParseError::InvalidLength {
                    expected: 4,
                    found: payload.len(),
                })
            } else {
                Ok(LittleEndian::read_u32(payload))
            }
        };

        Ok(match message_type {
            DataMessageType::SourceCapabilities => {
                Data::SourceCapabilities(source_capabilities::SourceCapabilities::parse(payload))
            }
            DataMessageType::SinkCapabilities => Data::SinkCapabilities(sink_capabilities::SinkCapabilities::parse(payload)),
            DataMessageType::Request => Data::Request(request::RawDataObject(first()?)),
            DataMessageType::Bist => Data::Bist(bist::BistDataObject(first()?)),
            DataMessageType::BatteryStatus => Data::BatteryStatus(status::BatteryStatusDataObject(first()?)),
            DataMessageType::Alert => Data::Alert(status::AlertDataObject(first()?)),
            DataMessageType::GetCountryInfo => Data::GetCountryInfo(status::CountryCodeDataObject(first()?)),
            DataMessageType::VendorDefined => {
                let header = vendor_defined::VdmHeader::from(first()?);
                let objects = payload[4..]
                    .chunks_exact(4)
                    .take(MAX_VDOS)
                    .map(LittleEndian::read_u32)
                    .collect::<Vec<u32, MAX_VDOS>>();

                trace!("VDM RX: {:?} {:?}", header, objects);
                Data::VendorDefined((header, objects))
            }
            DataMessageType::Reserved => return Err(ParseError::InvalidMessageType(message_type as u8)),
            _ => {
                debug!("Unhandled data message type {:?}", message_type);
                Data::Unknown(message_type)
            }
        })
    }

    /// The data message type that carries this payload.
    pub fn message_type(&self) -> DataMessageType {
        match self {
            Self::SourceCapabilities(_) => DataMessageType::SourceCapabilities,
            Self::SinkCapabilities(_) => DataMessageType::SinkCapabilities,
            Self::Request(_) => DataMessageType::Request,
            Self::Bist(_) => DataMessageType::Bist,
            Self::BatteryStatus(_) => DataMessageType::BatteryStatus,
            Self::Alert(_) => DataMessageType::Alert,
            Self::GetCountryInfo(_) => DataMessageType::GetCountryInfo,
            Self::VendorDefined(_) => DataMessageType::VendorDefined,
            Self::Unknown(message_type) => *message_type,
        }
    }

    /// Number of 32-bit objects that the payload occupies.
    pub fn num_objects(&self) -> u8 {
        match self {
            Self::SourceCapabilities(caps) => caps.num_objects(),
            Self::SinkCapabilities(caps) => caps.num_objects(),
            Self::VendorDefined((_, objects)) => 1 + objects.len() as u8,
            Self::Unknown(_) => 0,
            _ => 1,
        }
    }

    /// Serialize message data to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        match self {
            Self::SourceCapabilities(caps) => caps.to_bytes(payload),
            Self::SinkCapabilities(caps) => caps.to_bytes(payload),
            Self::Request(rdo) => write_single(payload, rdo.0),
            Self::Bist(bdo) => write_single(payload, bdo.0),
            Self::BatteryStatus(bsdo) => write_single(payload, bsdo.0),
            Self::Alert(ado) => write_single(payload, ado.0),
            Self::GetCountryInfo(ccdo) => write_single(payload, ccdo.0),
            Self::VendorDefined((header, objects)) => {
                LittleEndian::write_u32(payload, u32::from(*header));
                for (index, object) in objects.iter().enumerate() {
                    LittleEndian::write_u32(&mut payload[4 + index * 4..], *object);
                }
                4 + objects.len() * 4
            }
            Self::Unknown(_) => 0,
        }
    }
}

fn write_single(payload: &mut [u8], raw: u32) -> usize {
    LittleEndian::write_u32(payload, raw);
    4
}

#[allow(missing_docs)]
pub mod bist;

#[allow(missing_docs)]
pub mod request;

#[allow(missing_docs)]
pub mod sink_capabilities;

#[allow(missing_docs)]
pub mod source_capabilities;

#[allow(missing_docs)]
pub mod status;

#[allow(missing_docs)]
pub mod vendor_defined;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_object_is_rejected() {
        assert_eq!(
            Data::parse(DataMessageType::Request, &[]),
            Err(ParseError::InvalidLength { expected: 4, found: 0 })
        );
    }

    #[test]
    fn vendor_defined_keeps_objects() {
        let header = vendor_defined::VdmHeaderStructured::default()
            .with_standard_or_vid(vendor_defined::PD_SID)
            .with_command(vendor_defined::VdmCommand::DiscoverIdentity)
            .with_command_type(vendor_defined::VdmCommandType::ResponderAck);
        let mut objects = Vec::<u32, MAX_VDOS>::new();
        objects.push(0x6C00_04E8).unwrap();
        objects.push(0).unwrap();
        objects.push(0xA020_0000).unwrap();

        let data = Data::VendorDefined((vendor_defined::VdmHeader::Structured(header), objects));
        let mut buf = [0u8; 28];
        let len = data.to_bytes(&mut buf);

        assert_eq!(len, 16);
        assert_eq!(data.num_objects(), 4);
        assert_eq!(Data::parse(DataMessageType::VendorDefined, &buf[..len]), Ok(data));
    }
}
