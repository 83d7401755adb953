//! Request data objects, sent by a sink to select a source PDO.
//!
//! The layout of a request depends on the PDO that it selects, so a received request stays raw until
//! the source interprets it against its own capabilities.
use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::source_capabilities::{Kind, SourceCapabilities};
use crate::_20millivolts_mod::_20millivolts;
use crate::_50milliamperes_mod::_50milliamperes;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

bitfield! {
    /// The bits that all request layouts share.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct RawDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based position of the selected PDO.
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        /// The sink wants more than the selected PDO offers.
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
    }
}

bitfield! {
    /// Request for a fixed or variable supply.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        /// The sink can fall back to the minimum current on GotoMin.
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        /// 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// 10 mA units. The minimum current, if the giveback flag is set.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableSupply {
    /// Request a current (10 mA units) from the supply at `position`.
    ///
    /// The sink is a USB device that does not suspend.
    pub fn for_position(position: u8, operating_10ma: u16, max_operating_10ma: u16) -> Self {
        Self::default()
            .with_object_position(position)
            .with_raw_operating_current(operating_10ma)
            .with_raw_max_operating_current(max_operating_10ma)
            .with_usb_communications_capable(true)
            .with_no_usb_suspend(true)
    }

    #[allow(missing_docs)]
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    #[allow(missing_docs)]
    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

bitfield! {
    /// Request for a battery supply, in power instead of current.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        /// 250 mW units.
        pub raw_operating_power: u16 @ 10..=19,
        /// 250 mW units.
        pub raw_max_operating_power: u16 @ 0..=9,
    }
}

impl Battery {
    #[allow(missing_docs)]
    pub fn operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_operating_power().into())
    }
}

bitfield! {
    /// Request for an output voltage of a programmable supply.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct Pps(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        /// 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// 50 mA units.
        pub raw_operating_current: u16 @ 0..=6,
    }
}

impl Pps {
    /// Request an output voltage (20 mV units) and current (50 mA units) from the APDO at `position`.
    ///
    /// The same request is repeated periodically to keep the programmable supply alive.
    pub fn for_position(position: u8, voltage_20mv: u16, current_50ma: u16) -> Self {
        Self::default()
            .with_object_position(position)
            .with_raw_output_voltage(voltage_20mv)
            .with_raw_operating_current(current_50ma)
            .with_usb_communications_capable(true)
            .with_no_usb_suspend(true)
    }

    #[allow(missing_docs)]
    pub fn output_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_20millivolts>(self.raw_output_voltage().into())
    }

    #[allow(missing_docs)]
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_operating_current().into())
    }
}

/// A power request towards a source, interpreted according to the PDO it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum PowerSource {
    FixedVariableSupply(FixedVariableSupply),
    Battery(Battery),
    Pps(Pps),
    /// The selected position is empty, or holds an unknown PDO.
    Unknown(RawDataObject),
}

impl PowerSource {
    /// Interpret a raw request object against the capabilities that it refers to.
    pub fn interpret(raw: RawDataObject, capabilities: &SourceCapabilities) -> Self {
        let kind = capabilities
            .at_object_position(raw.object_position())
            .and_then(|pdo| pdo.kind());

        match kind {
            Some(Kind::FixedSupply | Kind::VariableSupply) => Self::FixedVariableSupply(FixedVariableSupply(raw.0)),
            Some(Kind::Battery) => Self::Battery(Battery(raw.0)),
            Some(Kind::Pps) => Self::Pps(Pps(raw.0)),
            None => Self::Unknown(raw),
        }
    }

    /// The shared view of the request.
    pub fn raw(&self) -> RawDataObject {
        RawDataObject(match self {
            Self::FixedVariableSupply(rdo) => rdo.0,
            Self::Battery(rdo) => rdo.0,
            Self::Pps(rdo) => rdo.0,
            Self::Unknown(rdo) => rdo.0,
        })
    }

    #[allow(missing_docs)]
    pub fn object_position(&self) -> u8 {
        self.raw().object_position()
    }

    #[allow(missing_docs)]
    pub fn capability_mismatch(&self) -> bool {
        self.raw().capability_mismatch()
    }

    /// Whether the request must be repeated while the contract lasts.
    pub fn is_pps(&self) -> bool {
        matches!(self, Self::Pps(_))
    }

    /// Write the request object, returning the number of written bytes.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.raw().0);
        4
    }
}
