//! A dual-role USB PD port stack for `no_std` targets.
//!
//! The stack is split into
//! - the protocol layer, which provides acknowledged and deduplicated message transfer on top of a PHY driver,
//! - the policy engine, which implements the source, sink, swap, VDM, BIST and PD 3.0 state families,
//! - the manager, which makes policy decisions and classifies the attached partner,
//! - the port, which ties a policy engine to Type-C attach and detach detection.
//!
//! Hardware access is abstracted by the traits in [`usbpd_dualrole_traits`].
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod fmt;

pub mod config;
pub mod counters;
pub mod device_policy_manager;
pub mod manager;
pub mod policy_engine;
pub mod port;
pub mod protocol_layer;
pub mod timers;

#[cfg(test)]
pub mod dummy;

#[macro_use]
extern crate uom;

pub use usbpd_dualrole_traits::{Attach, DataRole, Driver, PhyStatus, PowerRole, RpLevel, Sop, TypeC};

/// Quantities with integer storage in milli-units.
#[allow(missing_docs)]
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

/// Electric potential in 50 mV steps.
#[allow(missing_docs)]
pub mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

/// Electric potential in 20 mV steps.
#[allow(missing_docs)]
pub mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

/// Electric current in 50 mA steps.
#[allow(missing_docs)]
pub mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamperes", "_50milliamperes";
    }
}

/// Power in 250 mW steps.
#[allow(missing_docs)]
pub mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}
