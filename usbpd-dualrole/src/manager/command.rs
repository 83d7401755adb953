//! Commands that the device posts to the policy engine.
//!
//! Several commands can be pending at once. The policy engine services one per `Ready` pass, in
//! bit order: resets and swaps come before power requests, information requests and VDMs.
use bitflags::bitflags;

use crate::config::SinkPolicy;
use crate::device_policy_manager::InfoData;
use crate::protocol_layer::message::data::status::AlertDataObject;

/// A set of pending commands.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command(u32);

bitflags! {
    impl Command: u32 {
        const HARD_RESET = 1 << 0;
        const SOFT_RESET = 1 << 1;
        const PR_SWAP = 1 << 2;
        const DR_SWAP = 1 << 3;
        const VCONN_SWAP = 1 << 4;
        /// Renegotiate the contract: re-request as a sink, re-advertise as a source.
        const NEW_POWER_REQUEST = 1 << 5;
        const GET_SOURCE_CAP = 1 << 6;
        const GET_SINK_CAP = 1 << 7;
        const GET_SOURCE_CAP_EXTENDED = 1 << 8;
        const GET_STATUS = 1 << 9;
        const GET_PPS_STATUS = 1 << 10;
        const GET_BATTERY_CAP = 1 << 11;
        const GET_BATTERY_STATUS = 1 << 12;
        const GET_MANUFACTURER_INFO = 1 << 13;
        const GET_COUNTRY_CODES = 1 << 14;
        const GET_COUNTRY_INFO = 1 << 15;
        const SECURITY_REQUEST = 1 << 16;
        const FIRMWARE_UPDATE_REQUEST = 1 << 17;
        const SEND_ALERT = 1 << 18;
        const VDM_DISCOVER_IDENTITY = 1 << 19;
        const VDM_DISCOVER_SVIDS = 1 << 20;
        const VDM_DISCOVER_MODES = 1 << 21;
        const VDM_ENTER_MODE = 1 << 22;
        const VDM_STATUS_UPDATE = 1 << 23;
        const VDM_CONFIGURE = 1 << 24;
        const VDM_EXIT_MODE = 1 << 25;
    }
}

impl Command {
    /// The pending command with the highest priority.
    pub fn highest_priority(self) -> Option<Command> {
        let bits = self.bits();
        if bits == 0 {
            None
        } else {
            Some(Command::from_bits_retain(bits & bits.wrapping_neg()))
        }
    }
}

/// Events that the device policy manager can send to the policy engine.
///
/// Commands without arguments are posted with [`Event::Command`], possibly several at once.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Post the given commands.
    Command(Command),
    /// Use a new sink policy and request power again.
    RequestPower(SinkPolicy),
    /// Request the capabilities of a battery.
    GetBatteryCap(u8),
    /// Request the status of a battery.
    GetBatteryStatus(u8),
    /// Request manufacturer information of the port (target 0) or a battery (target 1).
    GetManufacturerInfo {
        /// Port or battery.
        target: u8,
        /// Battery reference.
        reference: u8,
    },
    /// Request country specific information.
    GetCountryInfo(u16),
    /// Send a security request.
    SecurityRequest(InfoData),
    /// Send a firmware update request.
    FirmwareUpdateRequest(InfoData),
    /// Send an alert.
    SendAlert(AlertDataObject),
    /// Enter an alternate mode of the partner.
    EnterMode {
        /// Standard or vendor ID of the mode.
        svid: u16,
        /// 1-based position of the mode in the Discover Modes response.
        object_position: u8,
    },
    /// Exit the active alternate mode.
    ExitMode,
}

/// Arguments of the commands that take any.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct CommandArgs {
    pub battery: u8,
    pub manufacturer_info: (u8, u8),
    pub country_code: u16,
    pub security: InfoData,
    pub firmware_update: InfoData,
    pub alert: AlertDataObject,
    pub mode: Option<(u16, u8)>,
}

impl CommandArgs {
    /// Store the arguments of an event, and return the commands it posts.
    pub(crate) fn take_event(&mut self, event: Event) -> (Command, Option<SinkPolicy>) {
        let command = match event {
            Event::Command(command) => command,
            Event::RequestPower(policy) => return (Command::NEW_POWER_REQUEST, Some(policy)),
            Event::GetBatteryCap(battery) => {
                self.battery = battery;
                Command::GET_BATTERY_CAP
            }
            Event::GetBatteryStatus(battery) => {
                self.battery = battery;
                Command::GET_BATTERY_STATUS
            }
            Event::GetManufacturerInfo { target, reference } => {
                self.manufacturer_info = (target, reference);
                Command::GET_MANUFACTURER_INFO
            }
            Event::GetCountryInfo(country_code) => {
                self.country_code = country_code;
                Command::GET_COUNTRY_INFO
            }
            Event::SecurityRequest(data) => {
                self.security = data;
                Command::SECURITY_REQUEST
            }
            Event::FirmwareUpdateRequest(data) => {
                self.firmware_update = data;
                Command::FIRMWARE_UPDATE_REQUEST
            }
            Event::SendAlert(alert) => {
                self.alert = alert;
                Command::SEND_ALERT
            }
            Event::EnterMode { svid, object_position } => {
                self.mode = Some((svid, object_position));
                Command::VDM_ENTER_MODE
            }
            Event::ExitMode => Command::VDM_EXIT_MODE,
        };

        (command, None)
    }
}
