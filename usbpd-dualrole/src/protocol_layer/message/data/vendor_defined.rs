//! Vendor defined messages: VDM headers and the objects exchanged during discovery and
//! DisplayPort alternate mode.
use proc_bitfield::bitfield;

/// The PD standard ID, used for discovery commands.
pub const PD_SID: u16 = 0xFF00;
/// The DisplayPort standard ID.
pub const DISPLAYPORT_SID: u16 = 0xFF01;
/// Samsung's USB vendor ID.
pub const SAMSUNG_VID: u16 = 0x04E8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommandType {
    InitiatorReq,
    ResponderAck,
    ResponderNak,
    ResponderBusy,
}

impl From<VdmCommandType> for u8 {
    fn from(value: VdmCommandType) -> Self {
        match value {
            VdmCommandType::InitiatorReq => 0,
            VdmCommandType::ResponderAck => 1,
            VdmCommandType::ResponderNak => 2,
            VdmCommandType::ResponderBusy => 3,
        }
    }
}

impl From<u8> for VdmCommandType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => VdmCommandType::InitiatorReq,
            1 => VdmCommandType::ResponderAck,
            2 => VdmCommandType::ResponderNak,
            _ => VdmCommandType::ResponderBusy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommand {
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes,
    EnterMode,
    ExitMode,
    Attention,
    DisplayPortStatus,
    DisplayPortConfigure,
    /// Reserved or SVID specific commands that are not handled.
    Other(u8),
}

impl From<VdmCommand> for u8 {
    fn from(value: VdmCommand) -> Self {
        match value {
            VdmCommand::DiscoverIdentity => 0x01,
            VdmCommand::DiscoverSvids => 0x02,
            VdmCommand::DiscoverModes => 0x03,
            VdmCommand::EnterMode => 0x04,
            VdmCommand::ExitMode => 0x05,
            VdmCommand::Attention => 0x06,
            VdmCommand::DisplayPortStatus => 0x10,
            VdmCommand::DisplayPortConfigure => 0x11,
            VdmCommand::Other(command) => command,
        }
    }
}

impl From<u8> for VdmCommand {
    fn from(value: u8) -> Self {
        match value {
            0x01 => VdmCommand::DiscoverIdentity,
            0x02 => VdmCommand::DiscoverSvids,
            0x03 => VdmCommand::DiscoverModes,
            0x04 => VdmCommand::EnterMode,
            0x05 => VdmCommand::ExitMode,
            0x06 => VdmCommand::Attention,
            0x10 => VdmCommand::DisplayPortStatus,
            0x11 => VdmCommand::DisplayPortConfigure,
            other => VdmCommand::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmType {
    Unstructured,
    Structured,
}

impl From<VdmType> for bool {
    fn from(value: VdmType) -> Self {
        matches!(value, VdmType::Structured)
    }
}

impl From<bool> for VdmType {
    fn from(value: bool) -> Self {
        if value { VdmType::Structured } else { VdmType::Unstructured }
    }
}

/// A VDM header, structured or unstructured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VdmHeader {
    Structured(VdmHeaderStructured),
    Unstructured(VdmHeaderUnstructured),
}

impl VdmHeader {
    pub fn standard_or_vid(&self) -> u16 {
        match self {
            VdmHeader::Structured(header) => header.standard_or_vid(),
            VdmHeader::Unstructured(header) => header.standard_or_vid(),
        }
    }

    /// The structured header, if this is one.
    pub fn structured(&self) -> Option<VdmHeaderStructured> {
        match self {
            VdmHeader::Structured(header) => Some(*header),
            VdmHeader::Unstructured(_) => None,
        }
    }
}

impl From<VdmHeader> for u32 {
    fn from(value: VdmHeader) -> Self {
        match value {
            VdmHeader::Structured(header) => header.0,
            VdmHeader::Unstructured(header) => header.0,
        }
    }
}

impl From<u32> for VdmHeader {
    fn from(value: u32) -> Self {
        match VdmHeaderRaw(value).vdm_type() {
            VdmType::Structured => VdmHeader::Structured(VdmHeaderStructured(value)),
            VdmType::Unstructured => VdmHeader::Unstructured(VdmHeaderUnstructured(value)),
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VdmHeaderRaw(pub u32): Debug, FromStorage, IntoStorage {
        pub standard_or_vid: u16 @ 16..=31,
        pub vdm_type: bool [get VdmType, set VdmType] @ 15,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VdmHeaderStructured(pub u32): Debug, FromStorage, IntoStorage {
        /// Standard or vendor ID
        pub standard_or_vid: u16 @ 16..=31,
        pub vdm_type: bool [get VdmType, set VdmType] @ 15,
        /// Structured VDM version, major (01b for 2.x)
        pub vdm_version_major: u8 @ 13..=14,
        /// Structured VDM version, minor
        pub vdm_version_minor: u8 @ 11..=12,
        /// Object position, for Enter/Exit Mode and Attention
        pub object_position: u8 @ 8..=10,
        pub command_type: u8 [get VdmCommandType, set VdmCommandType] @ 6..=7,
        pub command: u8 [get VdmCommand, set VdmCommand] @ 0..=4,
    }
}

impl Default for VdmHeaderStructured {
    fn default() -> Self {
        VdmHeaderStructured(0)
            .with_vdm_type(VdmType::Structured)
            .with_vdm_version_major(0b01)
    }
}

impl VdmHeaderStructured {
    /// A request from the initiator.
    pub fn request(svid: u16, command: VdmCommand, object_position: u8) -> Self {
        Self::default()
            .with_standard_or_vid(svid)
            .with_command(command)
            .with_command_type(VdmCommandType::InitiatorReq)
            .with_object_position(object_position)
    }

    /// A response to this request, with the given command type.
    pub fn response(&self, command_type: VdmCommandType) -> Self {
        self.with_command_type(command_type)
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VdmHeaderUnstructured(pub u32): Debug, FromStorage, IntoStorage {
        pub standard_or_vid: u16 @ 16..=31,
        pub vdm_type: bool [get VdmType, set VdmType] @ 15,
        /// Vendor defined content
        pub data: u16 @ 0..=14,
    }
}

bitfield! {
    /// ID header VDO, the first object of a Discover Identity response.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct IdHeaderVdo(pub u32): Debug, FromStorage, IntoStorage {
        pub host_data: bool @ 31,
        pub device_data: bool @ 30,
        pub product_type_ufp: u8 @ 27..=29,
        pub modal_supported: bool @ 26,
        pub product_type_dfp: u8 @ 23..=25,
        pub connector_type: u8 @ 21..=22,
        pub vid: u16 @ 0..=15,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CertStatVdo(pub u32): Debug, FromStorage, IntoStorage {
        /// USB-IF assigned XID
        pub xid: u32 @ 0..=31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ProductVdo(pub u32): Debug, FromStorage, IntoStorage {
        /// USB product ID
        pub pid: u16 @ 16..=31,
        pub bcd_device: u16 @ 0..=15,
    }
}

/// The identity a partner reports in its Discover Identity ACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {
    pub id_header: IdHeaderVdo,
    pub cert_stat: CertStatVdo,
    pub product: ProductVdo,
}

impl Identity {
    /// Read the identity from the objects that follow the VDM header.
    pub fn from_vdos(vdos: &[u32]) -> Option<Self> {
        match vdos {
            [id_header, cert_stat, product, ..] => Some(Self {
                id_header: IdHeaderVdo(*id_header),
                cert_stat: CertStatVdo(*cert_stat),
                product: ProductVdo(*product),
            }),
            _ => None,
        }
    }

    pub fn to_vdos(&self) -> [u32; 3] {
        [self.id_header.0, self.cert_stat.0, self.product.0]
    }

    pub fn vid(&self) -> u16 {
        self.id_header.vid()
    }

    pub fn pid(&self) -> u16 {
        self.product.pid()
    }
}

/// DisplayPort pin assignment C.
pub const DP_PIN_ASSIGNMENT_C: u8 = 1 << 2;
/// DisplayPort pin assignment D.
pub const DP_PIN_ASSIGNMENT_D: u8 = 1 << 3;
/// DisplayPort pin assignment E.
pub const DP_PIN_ASSIGNMENT_E: u8 = 1 << 4;

bitfield! {
    /// DisplayPort capabilities, the mode VDO reported for the DisplayPort SVID.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct DisplayPortCapabilities(pub u32): Debug, FromStorage, IntoStorage {
        /// UFP_D pin assignments supported (receptacle based)
        pub ufp_d_pin_assignments: u8 @ 16..=23,
        /// DFP_D pin assignments supported (receptacle based)
        pub dfp_d_pin_assignments: u8 @ 8..=15,
        pub usb2_signaling_not_used: bool @ 7,
        pub receptacle_indication: bool @ 6,
        pub signaling: u8 @ 2..=5,
        /// 01b UFP_D capable, 10b DFP_D capable, 11b both
        pub port_capability: u8 @ 0..=1,
    }
}

impl DisplayPortCapabilities {
    /// Pin assignments that the partner offers as UFP_D.
    ///
    /// A plug reports its assignments in the DFP_D field.
    pub fn ufp_pin_assignments(&self) -> u8 {
        if self.receptacle_indication() {
            self.ufp_d_pin_assignments()
        } else {
            self.dfp_d_pin_assignments()
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct DisplayPortStatus(pub u32): Debug, FromStorage, IntoStorage {
        pub irq_hpd: bool @ 8,
        pub hpd_state: bool @ 7,
        pub exit_dp_mode_request: bool @ 6,
        pub usb_configuration_request: bool @ 5,
        pub multi_function_preferred: bool @ 4,
        pub enabled: bool @ 3,
        pub power_low: bool @ 2,
        /// 01b DFP_D connected, 10b UFP_D connected, 11b both
        pub connected: u8 @ 0..=1,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct DisplayPortConfigure(pub u32): Debug, FromStorage, IntoStorage {
        /// Selected UFP_D pin assignment, a single bit
        pub pin_assignment: u8 @ 8..=15,
        /// 0001b DP v1.3 signaling
        pub signaling: u8 @ 2..=5,
        /// 00b USB, 01b UFP_U as DFP_D, 10b UFP_U as UFP_D
        pub select_configuration: u8 @ 0..=1,
    }
}

impl DisplayPortConfigure {
    /// Configure the partner as UFP_D with the preferred pin assignment out of `offered`.
    pub fn ufp_d(offered: u8, multi_function: bool) -> Option<Self> {
        let preference: &[u8] = if multi_function {
            &[DP_PIN_ASSIGNMENT_D, DP_PIN_ASSIGNMENT_C, DP_PIN_ASSIGNMENT_E]
        } else {
            &[DP_PIN_ASSIGNMENT_C, DP_PIN_ASSIGNMENT_E, DP_PIN_ASSIGNMENT_D]
        };

        preference.iter().find(|pin| offered & **pin != 0).map(|pin| {
            Self(0)
                .with_pin_assignment(*pin)
                .with_signaling(0b0001)
                .with_select_configuration(0b10)
        })
    }
}
