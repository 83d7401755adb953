//! Source power data objects, and the source capabilities list they form.
//!
//! A dual-role port meets these twice: as the list it advertises when it is source, and as the
//! partner's offer that it evaluates when it is sink. The vSafe5V object at position 1 carries the
//! port-wide flags in both cases.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::decivolt;

use crate::_50milliamperes_mod::_50milliamperes;
use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// Maximum number of PDOs in a capabilities message.
pub const MAX_PDOS: usize = 7;

/// vSafe5V in 50 mV units.
const VSAFE_5V_50MV: u16 = 100;

/// Kinds of supplies that can be reported within source capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Kind {
    FixedSupply,
    Battery,
    VariableSupply,
    Pps,
}

/// One offered supply.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum PowerDataObject {
    FixedSupply(FixedSupply),
    Battery(Battery),
    VariableSupply(VariableSupply),
    Pps(SprProgrammablePowerSupply),
    /// Augmented objects other than SPR PPS, e.g. EPR AVS.
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// Decode a raw PDO.
    pub fn from_raw(raw: u32) -> Self {
        match RawPowerDataObject(raw).kind() {
            0b00 => Self::FixedSupply(FixedSupply(raw)),
            0b01 => Self::Battery(Battery(raw)),
            0b10 => Self::VariableSupply(VariableSupply(raw)),
            _ if SprProgrammablePowerSupply(raw).supply() == 0b00 => Self::Pps(SprProgrammablePowerSupply(raw)),
            _ => {
                debug!("Unhandled augmented PDO {:#010x}", raw);
                Self::Unknown(RawPowerDataObject(raw))
            }
        }
    }

    /// The raw 32-bit representation.
    pub fn to_raw(&self) -> u32 {
        match self {
            Self::FixedSupply(pdo) => pdo.0,
            Self::Battery(pdo) => pdo.0,
            Self::VariableSupply(pdo) => pdo.0,
            Self::Pps(pdo) => pdo.0,
            Self::Unknown(pdo) => pdo.0,
        }
    }

    /// The kind of supply, if known.
    pub fn kind(&self) -> Option<Kind> {
        Some(match self {
            Self::FixedSupply(_) => Kind::FixedSupply,
            Self::Battery(_) => Kind::Battery,
            Self::VariableSupply(_) => Kind::VariableSupply,
            Self::Pps(_) => Kind::Pps,
            Self::Unknown(_) => return None,
        })
    }

    /// Lowest and highest voltage that the supply may output.
    pub fn voltage_range(&self) -> Option<(ElectricPotential, ElectricPotential)> {
        match self {
            Self::FixedSupply(pdo) => Some((pdo.voltage(), pdo.voltage())),
            Self::Battery(pdo) => Some((pdo.min_voltage(), pdo.max_voltage())),
            Self::VariableSupply(pdo) => Some((pdo.min_voltage(), pdo.max_voltage())),
            Self::Pps(pdo) => Some((pdo.min_voltage(), pdo.max_voltage())),
            Self::Unknown(_) => None,
        }
    }

    /// The maximum current in 10 mA units, for supplies that are limited by current.
    pub fn raw_max_current_10ma(&self) -> Option<u16> {
        match self {
            Self::FixedSupply(pdo) => Some(pdo.raw_max_current()),
            Self::VariableSupply(pdo) => Some(pdo.raw_max_current()),
            Self::Pps(pdo) => Some(u16::from(pdo.raw_max_current()) * 5),
            Self::Battery(_) | Self::Unknown(_) => None,
        }
    }
}

/// Quantity accessors over raw bitfield values.
macro_rules! quantities {
    ($pdo:ident { $($name:ident: $quantity:ident = $raw:ident in $unit:ty;)* }) => {
        #[allow(missing_docs)]
        impl $pdo {
            $(
                pub fn $name(&self) -> $quantity {
                    $quantity::new::<$unit>(self.$raw().into())
                }
            )*
        }
    };
}

bitfield! {
    /// Only the kind bits, which select the layout of the rest.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// 00b fixed, 01b battery, 10b variable, 11b augmented.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply. At position 1, it is vSafe5V and carries the port flags.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        /// The port can also sink power, so power role swaps make sense.
        pub dual_role_power: bool @ 29,
        pub usb_suspend_supported: bool @ 28,
        /// External power, or a sink without battery drain.
        pub unconstrained_power: bool @ 27,
        pub usb_communications_capable: bool @ 26,
        /// The port can also be UFP, so data role swaps make sense.
        pub dual_role_data: bool @ 25,
        pub unchunked_extended_messages_supported: bool @ 24,
        pub peak_current: u8 @ 20..=21,
        /// 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl FixedSupply {
    /// A fixed supply at the given voltage (50 mV units) and current (10 mA units).
    pub fn new(voltage_50mv: u16, max_current_10ma: u16) -> Self {
        Self(0)
            .with_raw_voltage(voltage_50mv)
            .with_raw_max_current(max_current_10ma)
    }

    /// The vSafe5V object of a port, with its dual-role flags.
    pub fn vsafe_5v(max_current_10ma: u16, dual_role_power: bool, dual_role_data: bool) -> Self {
        Self::new(VSAFE_5V_50MV, max_current_10ma)
            .with_dual_role_power(dual_role_power)
            .with_dual_role_data(dual_role_data)
            .with_usb_communications_capable(dual_role_data)
    }
}

quantities!(FixedSupply {
    voltage: ElectricPotential = raw_voltage in _50millivolts;
    max_current: ElectricCurrent = raw_max_current in centiampere;
});

bitfield! {
    /// A battery supply, limited by power.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        /// 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// 250 mW units.
        pub raw_max_power: u16 @ 0..=9,
    }
}

quantities!(Battery {
    max_voltage: ElectricPotential = raw_max_voltage in _50millivolts;
    min_voltage: ElectricPotential = raw_min_voltage in _50millivolts;
    max_power: Power = raw_max_power in _250milliwatts;
});

bitfield! {
    /// A variable supply, which may output any voltage in its range.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        /// 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

quantities!(VariableSupply {
    max_voltage: ElectricPotential = raw_max_voltage in _50millivolts;
    min_voltage: ElectricPotential = raw_min_voltage in _50millivolts;
    max_current: ElectricCurrent = raw_max_current in centiampere;
});

bitfield! {
    /// A programmable supply, whose output the sink sets in 20 mV steps.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct SprProgrammablePowerSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        /// 00b for SPR PPS.
        pub supply: u8 @ 28..=29,
        pub pps_power_limited: bool @ 27,
        /// 100 mV units.
        pub raw_max_voltage: u8 @ 17..=24,
        /// 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// 50 mA units.
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl Default for SprProgrammablePowerSupply {
    fn default() -> Self {
        Self(0).with_kind(0b11)
    }
}

quantities!(SprProgrammablePowerSupply {
    max_voltage: ElectricPotential = raw_max_voltage in decivolt;
    min_voltage: ElectricPotential = raw_min_voltage in decivolt;
    max_current: ElectricCurrent = raw_max_current in _50milliamperes;
});

impl SprProgrammablePowerSupply {
    /// Whether an output voltage in 20 mV units lies within the supply range.
    pub fn covers_raw_voltage_20mv(&self, voltage_20mv: u16) -> bool {
        // 100 mV is five steps of 20 mV.
        let min = u16::from(self.raw_min_voltage()) * 5;
        let max = u16::from(self.raw_max_voltage()) * 5;
        (min..=max).contains(&voltage_20mv)
    }
}

/// The capabilities of a source, as advertised in a Source_Capabilities message.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceCapabilities(pub(crate) Vec<PowerDataObject, MAX_PDOS>);

impl SourceCapabilities {
    /// Build capabilities from a list of PDOs. The first one must be the vSafe5V fixed supply.
    pub fn new(pdos: Vec<PowerDataObject, MAX_PDOS>) -> Self {
        Self(pdos)
    }

    /// Parse from little-endian data objects.
    pub fn parse(payload: &[u8]) -> Self {
        Self(
            payload
                .chunks_exact(4)
                .take(MAX_PDOS)
                .map(|buf| PowerDataObject::from_raw(LittleEndian::read_u32(buf)))
                .collect(),
        )
    }

    /// Write the data objects, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        for (pdo, buf) in self.0.iter().zip(payload.chunks_exact_mut(4)) {
            LittleEndian::write_u32(buf, pdo.to_raw());
        }
        self.0.len() * 4
    }

    #[allow(missing_docs)]
    pub fn num_objects(&self) -> u8 {
        self.0.len() as u8
    }

    /// All PDOs, in object position order.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// The PDOs with their 1-based object positions, as a request refers to them.
    pub fn positions(&self) -> impl Iterator<Item = (u8, &PowerDataObject)> {
        (1..).zip(self.0.iter())
    }

    /// The PDO at a 1-based object position.
    pub fn at_object_position(&self, position: u8) -> Option<&PowerDataObject> {
        self.0.get(usize::from(position).checked_sub(1)?)
    }

    /// The vSafe5V supply at position 1, if the list is well-formed.
    pub fn vsafe_5v(&self) -> Option<&FixedSupply> {
        match self.0.first() {
            Some(PowerDataObject::FixedSupply(supply)) => Some(supply),
            _ => None,
        }
    }

    /// The partner can swap power roles.
    pub fn dual_role_power(&self) -> bool {
        self.vsafe_5v().is_some_and(|supply| supply.dual_role_power())
    }

    /// The partner can swap data roles.
    pub fn dual_role_data(&self) -> bool {
        self.vsafe_5v().is_some_and(|supply| supply.dual_role_data())
    }

    /// The source runs from external power.
    pub fn unconstrained_power(&self) -> bool {
        self.vsafe_5v().is_some_and(|supply| supply.unconstrained_power())
    }

    /// Whether the source offers a programmable supply.
    pub fn has_pps(&self) -> bool {
        self.0.iter().any(|pdo| matches!(pdo, PowerDataObject::Pps(_)))
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_potential::millivolt;

    use super::*;

    #[test]
    fn positions_start_at_one() {
        let mut pdos = Vec::new();
        pdos.push(PowerDataObject::FixedSupply(FixedSupply::vsafe_5v(300, true, false)))
            .unwrap();
        pdos.push(PowerDataObject::FixedSupply(FixedSupply::new(180, 300)))
            .unwrap();
        let capabilities = SourceCapabilities::new(pdos);

        let positions: std::vec::Vec<u8> = capabilities.positions().map(|(position, _)| position).collect();
        assert_eq!(positions, [1, 2]);
        assert!(capabilities.at_object_position(0).is_none());
        assert!(capabilities.at_object_position(3).is_none());

        assert!(capabilities.dual_role_power());
        assert!(!capabilities.dual_role_data());
    }

    #[test]
    fn pps_range_in_20mv_steps() {
        // 3.3 V to 11 V.
        let apdo = SprProgrammablePowerSupply::default()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(110)
            .with_raw_max_current(60);

        assert!(apdo.covers_raw_voltage_20mv(165));
        assert!(apdo.covers_raw_voltage_20mv(550));
        assert!(!apdo.covers_raw_voltage_20mv(551));
        assert!(!apdo.covers_raw_voltage_20mv(164));

        let (min, max) = PowerDataObject::Pps(apdo).voltage_range().unwrap();
        assert_eq!(min.get::<millivolt>(), 3300);
        assert_eq!(max.get::<millivolt>(), 11000);
    }
}
