//! Sink power data objects, sent in Sink_Capabilities messages.
//!
//! The sink variants differ from the source variants in the flag bits of the fixed supply PDO.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::source_capabilities::MAX_PDOS;
use crate::_50millivolts_mod::_50millivolts;
use crate::units::{ElectricCurrent, ElectricPotential};

bitfield! {
    /// A sink fixed supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SinkFixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply (00b)
        pub kind: u8 @ 30..=31,
        pub dual_role_power: bool @ 29,
        /// The sink needs more than vSafe5V for full functionality.
        pub higher_capability: bool @ 28,
        pub unconstrained_power: bool @ 27,
        pub usb_communications_capable: bool @ 26,
        pub dual_role_data: bool @ 25,
        /// Fast role swap current requirement.
        pub raw_fast_role_swap: u8 @ 23..=24,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Operational current in 10 mA units
        pub raw_operational_current: u16 @ 0..=9,
    }
}

impl SinkFixedSupply {
    /// A sink fixed supply at the given voltage (50 mV units) and current (10 mA units).
    pub fn new(voltage_50mv: u16, operational_current_10ma: u16) -> Self {
        Self(0)
            .with_raw_voltage(voltage_50mv)
            .with_raw_operational_current(operational_current_10ma)
    }

    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    pub fn operational_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operational_current().into())
    }
}

bitfield! {
    /// A sink variable or battery supply PDO.
    ///
    /// The lower ten bits hold the operational current (variable) or power (battery).
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SinkRangeSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery (01b) or variable supply (10b)
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Operational current (10 mA units) or power (250 mW units)
        pub raw_operational: u16 @ 0..=9,
    }
}

/// A sink power data object.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkPowerDataObject {
    /// Fixed voltage supply requirement.
    FixedSupply(SinkFixedSupply),
    /// Battery supply requirement.
    Battery(SinkRangeSupply),
    /// Variable voltage supply requirement.
    VariableSupply(SinkRangeSupply),
    /// Augmented or unknown requirement, kept raw.
    Unknown(u32),
}

impl SinkPowerDataObject {
    /// Decode a raw sink PDO.
    pub fn from_raw(raw: u32) -> Self {
        match raw >> 30 {
            0b00 => Self::FixedSupply(SinkFixedSupply(raw)),
            0b01 => Self::Battery(SinkRangeSupply(raw)),
            0b10 => Self::VariableSupply(SinkRangeSupply(raw)),
            _ => Self::Unknown(raw),
        }
    }

    /// Convert the PDO to its raw u32 representation.
    pub fn to_raw(&self) -> u32 {
        match self {
            SinkPowerDataObject::FixedSupply(pdo) => pdo.0,
            SinkPowerDataObject::Battery(pdo) => pdo.0,
            SinkPowerDataObject::VariableSupply(pdo) => pdo.0,
            SinkPowerDataObject::Unknown(raw) => *raw,
        }
    }
}

/// Sink capabilities message content.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SinkCapabilities(pub Vec<SinkPowerDataObject, MAX_PDOS>);

impl SinkCapabilities {
    /// Sink capabilities with only the mandatory vSafe5V entry.
    pub fn new_vsafe5v_only(operational_current_10ma: u16) -> Self {
        let mut pdos = Vec::new();
        pdos.push(SinkPowerDataObject::FixedSupply(SinkFixedSupply::new(
            100,
            operational_current_10ma,
        )))
        .ok();
        Self(pdos)
    }

    /// Parse from little-endian data objects.
    pub fn parse(payload: &[u8]) -> Self {
        Self(
            payload
                .chunks_exact(4)
                .take(MAX_PDOS)
                .map(|buf| SinkPowerDataObject::from_raw(LittleEndian::read_u32(buf)))
                .collect(),
        )
    }

    pub fn pdos(&self) -> &[SinkPowerDataObject] {
        &self.0
    }

    pub fn num_objects(&self) -> u8 {
        self.0.len() as u8
    }

    /// Whether the sink reports dual-role power in its vSafe5V entry.
    pub fn dual_role_power(&self) -> bool {
        matches!(self.0.first(), Some(SinkPowerDataObject::FixedSupply(pdo)) if pdo.dual_role_power())
    }

    /// Write the data objects, returning the number of written bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        for (index, pdo) in self.0.iter().enumerate() {
            LittleEndian::write_u32(&mut buffer[index * 4..], pdo.to_raw());
        }
        self.0.len() * 4
    }
}
