//! BIST data object, used to request physical layer test modes.
use proc_bitfield::bitfield;

/// Test modes that a BIST message can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BistMode {
    /// Transmit a continuous carrier signal for `tBISTContMode`.
    CarrierMode2,
    /// Receive test frames until hard reset, without forwarding them.
    TestData,
    /// Shared capacity test mode entry.
    SharedTestModeEntry,
    /// Shared capacity test mode exit.
    SharedTestModeExit,
    /// Any mode that is not supported.
    Other(u8),
}

impl From<u8> for BistMode {
    fn from(value: u8) -> Self {
        match value {
            0b0101 => Self::CarrierMode2,
            0b1000 => Self::TestData,
            0b1001 => Self::SharedTestModeEntry,
            0b1010 => Self::SharedTestModeExit,
            other => Self::Other(other),
        }
    }
}

impl From<BistMode> for u8 {
    fn from(value: BistMode) -> Self {
        match value {
            BistMode::CarrierMode2 => 0b0101,
            BistMode::TestData => 0b1000,
            BistMode::SharedTestModeEntry => 0b1001,
            BistMode::SharedTestModeExit => 0b1010,
            BistMode::Other(other) => other,
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BistDataObject(pub u32): Debug, FromStorage, IntoStorage {
        pub mode: u8 [get BistMode, set BistMode] @ 28..=31,
    }
}

impl BistDataObject {
    pub fn new(mode: BistMode) -> Self {
        Self(0).with_mode(mode)
    }
}
