//! Classification of the attached partner.
use crate::protocol_layer::message::data::source_capabilities::SourceCapabilities;
use crate::protocol_layer::message::data::vendor_defined::{DISPLAYPORT_SID, Identity, SAMSUNG_VID};

/// The kind of device that is attached, as far as it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachedDevice {
    /// Nothing is attached, or nothing is known yet.
    #[default]
    None,
    /// A source without PD communication.
    TypeCSource,
    /// A PD source with fixed supplies only.
    PdCharger,
    /// A PD source that offers a programmable supply.
    PpsCharger,
    /// A PD sink.
    PdSink,
    /// A Gear VR headset.
    GearVr,
    /// A DeX station.
    DexStation,
    /// A DeX pad.
    DexPad,
    /// An HDMI adapter.
    HdmiAdapter,
    /// A multi-port adapter.
    MultiPortAdapter,
    /// A partner with DisplayPort alternate mode.
    DisplayPortAccessory,
    /// A partner that answered Discover Identity, but is not known otherwise.
    UnknownVdmDevice,
}

/// What is known about the partner.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartnerInfo<'a> {
    /// The partner's identity, if it answered Discover Identity.
    pub identity: Option<&'a Identity>,
    /// SVIDs that the partner reported.
    pub svids: &'a [u16],
    /// The partner's source capabilities, if it is a source.
    pub source_capabilities: Option<&'a SourceCapabilities>,
    /// Whether the partner communicated over PD.
    pub pd_capable: bool,
    /// Whether the partner is a sink.
    pub sink: bool,
}

fn samsung_accessory(pid: u16) -> Option<AttachedDevice> {
    Some(match pid {
        0xA500..=0xA505 => AttachedDevice::GearVr,
        0xA020 => AttachedDevice::DexStation,
        0xA029 => AttachedDevice::DexPad,
        0xA025 => AttachedDevice::HdmiAdapter,
        0xA026 => AttachedDevice::MultiPortAdapter,
        _ => return None,
    })
}

/// Classify the partner.
///
/// Known vendor products take precedence over alternate modes, which take precedence over power roles.
pub fn classify(partner: &PartnerInfo) -> AttachedDevice {
    let product = partner
        .identity
        .filter(|identity| identity.vid() == SAMSUNG_VID)
        .and_then(|identity| samsung_accessory(identity.pid()));
    if let Some(device) = product {
        return device;
    }

    if partner.svids.contains(&DISPLAYPORT_SID) {
        return AttachedDevice::DisplayPortAccessory;
    }

    if partner.identity.is_some() {
        return AttachedDevice::UnknownVdmDevice;
    }

    match partner.source_capabilities {
        Some(capabilities) if capabilities.has_pps() => AttachedDevice::PpsCharger,
        Some(_) => AttachedDevice::PdCharger,
        None if partner.pd_capable && partner.sink => AttachedDevice::PdSink,
        None if !partner.sink => AttachedDevice::TypeCSource,
        None => AttachedDevice::None,
    }
}
