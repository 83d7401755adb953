//! The device policy manager (DPM) allows a device to control the policy engine, and be informed about status changes.
//!
//! Through the DPM, a device posts commands (swaps, resets, PD 3.0 requests, VDMs), switches its
//! power supply or sink path when told to, and answers PD 3.0 information requests from the partner.
use core::future::Future;

use heapless::Vec;

use crate::manager::Event;
use crate::manager::accessory::AttachedDevice;
use crate::protocol_layer::message::data::status::{AlertDataObject, BatteryStatusDataObject};
use crate::protocol_layer::message::data::vendor_defined::{DisplayPortConfigure, DisplayPortStatus};
use crate::protocol_layer::message::extended::MAX_EXTENDED_CHUNK_LEN;
use crate::protocol_layer::message::header::ExtendedMessageType;
use crate::units::{ElectricCurrent, ElectricPotential};
use crate::{DataRole, PowerRole};

/// Data of a single chunk extended message.
pub type InfoData = Vec<u8, MAX_EXTENDED_CHUNK_LEN>;

/// An explicit power contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contract {
    /// The power role of this port within the contract.
    pub power_role: PowerRole,
    /// 1-based position of the selected PDO.
    pub object_position: u8,
    /// Negotiated voltage.
    pub voltage: ElectricPotential,
    /// Negotiated operating current.
    pub current: ElectricCurrent,
    /// The contract refers to a programmable supply.
    pub pps: bool,
    /// The sink signaled that it needs more than offered.
    pub capability_mismatch: bool,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Contract {
    fn format(&self, fmt: defmt::Formatter) {
        use uom::si::electric_current::milliampere;
        use uom::si::electric_potential::millivolt;

        defmt::write!(
            fmt,
            "Contract {{ position: {}, {} mV, {} mA, pps: {} }}",
            self.object_position,
            self.voltage.get::<millivolt>(),
            self.current.get::<milliampere>(),
            self.pps,
        )
    }
}

/// Output levels that a source is told to provide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyLevel {
    /// VBUS off, at vSafe0V.
    Off,
    /// vSafe5V, the default after attach and hard reset.
    VSafe5V,
    /// The level of an explicit contract.
    Contract(Contract),
}

/// PD 3.0 information that one port can request from the other.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum InfoRequest {
    SourceCapabilitiesExtended,
    Status,
    PpsStatus,
    /// Battery capabilities of the referenced battery.
    BatteryCapabilities(u8),
    /// Status of the referenced battery.
    BatteryStatus(u8),
    ManufacturerInfo {
        /// 0 for the port, 1 for a battery.
        target: u8,
        /// Battery reference, if the target is a battery.
        reference: u8,
    },
    CountryCodes,
    /// Country specific information, for a two character country code.
    CountryInfo(u16),
    Security(InfoData),
    FirmwareUpdate(InfoData),
}

impl InfoRequest {
    /// The extended message type that carries the answer.
    ///
    /// Battery status is answered with a data message, and has no extended response type.
    pub fn response_type(&self) -> Option<ExtendedMessageType> {
        Some(match self {
            InfoRequest::SourceCapabilitiesExtended => ExtendedMessageType::SourceCapabilitiesExtended,
            InfoRequest::Status => ExtendedMessageType::Status,
            InfoRequest::PpsStatus => ExtendedMessageType::PpsStatus,
            InfoRequest::BatteryCapabilities(_) => ExtendedMessageType::BatteryCapabilities,
            InfoRequest::BatteryStatus(_) => return None,
            InfoRequest::ManufacturerInfo { .. } => ExtendedMessageType::ManufacturerInfo,
            InfoRequest::CountryCodes => ExtendedMessageType::CountryCodes,
            InfoRequest::CountryInfo(_) => ExtendedMessageType::CountryInfo,
            InfoRequest::Security(_) => ExtendedMessageType::SecurityResponse,
            InfoRequest::FirmwareUpdate(_) => ExtendedMessageType::FirmwareUpdateResponse,
        })
    }
}

/// Notifications from the policy engine to the device.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Notification {
    /// A partner was attached, or was classified anew.
    Attached(AttachedDevice),
    /// The partner was detached.
    Detached,
    /// An explicit contract was established.
    ContractEstablished(Contract),
    /// No source capabilities arrived within the Type-C sink wait time. Type-C current applies.
    TypeCFallback,
    /// No sink answered the source capabilities.
    SourceDisabled,
    /// A hard reset was sent or received.
    HardReset,
    /// The power role changed through a swap.
    PowerRoleChanged(PowerRole),
    /// The data role changed through a swap.
    DataRoleChanged(DataRole),
    /// This port started or stopped sourcing VCONN.
    VconnSourceChanged(bool),
    /// The partner rejected, or asked to wait on, a request of this port.
    RequestDeclined,
    /// An alternate mode was entered.
    ModeEntered {
        svid: u16,
        object_position: u8,
    },
    /// An alternate mode was exited.
    ModeExited {
        svid: u16,
    },
    /// DisplayPort status of the partner.
    DisplayPortStatus(DisplayPortStatus),
    /// The partner accepted a DisplayPort configuration.
    DisplayPortConfigured(DisplayPortConfigure),
    /// The partner sent an Attention VDM.
    Attention {
        svid: u16,
        vdo: Option<u32>,
    },
    /// The partner answered a PD 3.0 information request.
    InfoReceived {
        message_type: ExtendedMessageType,
        data: InfoData,
    },
    /// The partner reported the status of a battery.
    BatteryStatusReceived(BatteryStatusDataObject),
    /// The partner does not support the last request.
    NotSupported,
    /// The partner sent an alert.
    AlertReceived(AlertDataObject),
    /// The port gave up, and asks the Type-C layer for error recovery.
    ErrorRecovery,
}

/// Trait for the device policy manager.
///
/// This entity commands the policy engine and enforces device policy.
pub trait DevicePolicyManager {
    /// The policy engine gets device policy events while it waits for partner messages or timers.
    ///
    /// The future is dropped whenever a message or timer wins the race, so it must not lose an
    /// event that it has not returned yet. By default, this is a future that never resolves.
    fn get_event(&mut self) -> impl Future<Output = Event> {
        async { core::future::pending().await }
    }

    /// Inform the device about a change of state.
    fn notify(&mut self, _notification: Notification) -> impl Future<Output = ()> {
        async {}
    }

    /// As a sink, transition to the power level of an accepted contract.
    fn transition_power(&mut self, _contract: &Contract) -> impl Future<Output = ()> {
        async {}
    }

    /// As a source, drive VBUS to the given level.
    ///
    /// Completes once the supply has reached the level.
    fn source_supply(&mut self, _level: SupplyLevel) -> impl Future<Output = ()> {
        async {}
    }

    /// A hard reset takes place. A sink falls back to default power.
    fn hard_reset(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Answer a PD 3.0 information request of the partner.
    ///
    /// Requests that are answered with `None` are not supported.
    fn provide_info(&mut self, _request: &InfoRequest) -> impl Future<Output = Option<InfoData>> {
        async { None }
    }

    /// Report the status of a battery.
    fn battery_status(&mut self, _battery: u8) -> impl Future<Output = BatteryStatusDataObject> {
        async { BatteryStatusDataObject::invalid_reference() }
    }
}
