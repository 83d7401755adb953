//! Traits for the dual-role USB PD port stack.
//!
//! Provides the driver trait through which the protocol layer talks to a PD PHY, and the
//! Type-C trait through which a port learns about attach and detach on the CC lines.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
use core::future::Future;

use bitflags::bitflags;

/// Receive Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverRxError {
    /// Received message discarded, e.g. due to CRC errors.
    Discarded,

    /// Hard Reset received before or during reception.
    HardReset,
}

/// Transmit Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverTxError {
    /// Concurrent receive in progress or excessive noise on the line.
    Discarded,

    /// Hard Reset received before or during transmission.
    HardReset,
}

/// Start-of-packet type of a frame.
///
/// Distinguishes messages for the port partner from messages for the cable plugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sop {
    /// Port partner.
    Sop,
    /// Cable plug nearest to the VCONN source.
    SopPrime,
    /// Far cable plug.
    SopDoublePrime,
}

impl Sop {
    /// Index of this SOP type, for per-SOP bookkeeping.
    pub const fn index(self) -> usize {
        match self {
            Sop::Sop => 0,
            Sop::SopPrime => 1,
            Sop::SopDoublePrime => 2,
        }
    }
}

/// The power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    /// The port provides power.
    Source,
    /// The port consumes power.
    Sink,
}

impl PowerRole {
    /// The opposite power role.
    pub fn swapped(self) -> Self {
        match self {
            PowerRole::Source => PowerRole::Sink,
            PowerRole::Sink => PowerRole::Source,
        }
    }
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    /// Upstream facing port (device).
    Ufp,
    /// Downstream facing port (host).
    Dfp,
}

impl DataRole {
    /// The opposite data role.
    pub fn swapped(self) -> Self {
        match self {
            DataRole::Ufp => DataRole::Dfp,
            DataRole::Dfp => DataRole::Ufp,
        }
    }
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}

/// Rp current advertisement of a source port.
///
/// On PD 3.0 links, 3.0 A doubles as `SinkTxOk` and 1.5 A as `SinkTxNG`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RpLevel {
    /// Default USB power.
    Default,
    /// 1.5 A.
    Current1A5,
    /// 3.0 A.
    Current3A0,
}

/// Status bits that a PHY reports about the line.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyStatus(pub u32);

bitflags! {
    impl PhyStatus: u32 {
        /// VBUS is above vSafe5V.
        const VBUS_PRESENT = 1 << 0;
        /// VBUS is below vSafe0V.
        const VBUS_SAFE_0V = 1 << 1;
        /// A partner is attached on the CC lines.
        const CC_ATTACHED = 1 << 2;
        /// The partner presents Rp for 1.5 A.
        const RP_1A5 = 1 << 3;
        /// The partner presents Rp for 3.0 A.
        const RP_3A0 = 1 << 4;
        /// VCONN is sourced by this port.
        const VCONN_ON = 1 << 5;
        /// A received frame waits in the PHY.
        const RX_PENDING = 1 << 6;
    }
}

/// Driver trait, through which the protocol layer talks to the PHY.
pub trait Driver {
    /// If this is `true`, the protocol layer will not send its own
    /// GoodCRC messages and will instead rely on the hardware.
    ///
    /// Such a driver only reports a successful transmission once the partner's GoodCRC arrived.
    const HAS_AUTO_GOOD_CRC: bool = false;

    /// Wait for availability of VBus voltage.
    fn wait_for_vbus(&self) -> impl Future<Output = ()>;

    /// Receive a packet, and report its SOP type.
    fn receive(&mut self, buffer: &mut [u8]) -> impl Future<Output = Result<(usize, Sop), DriverRxError>>;

    /// Transmit a packet.
    fn transmit(&mut self, sop: Sop, data: &[u8]) -> impl Future<Output = Result<(), DriverTxError>>;

    /// Transmit a hard reset signal.
    fn transmit_hard_reset(&mut self) -> impl Future<Output = Result<(), DriverTxError>>;

    /// Reset the PHY's own message bookkeeping after a soft reset.
    fn soft_reset(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Transmit BIST carrier mode 2 until told otherwise.
    fn transmit_bist_carrier(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Read the line status.
    fn status(&mut self) -> impl Future<Output = PhyStatus> {
        async { PhyStatus::empty() }
    }

    /// Check whether the PHY has pending work, e.g. a received frame.
    fn poll_status(&mut self) -> impl Future<Output = bool> {
        async { false }
    }

    /// Present the given power role on the CC lines and in GoodCRC headers.
    fn set_power_role(&mut self, _role: PowerRole) -> impl Future<Output = ()> {
        async {}
    }

    /// Use the given data role in GoodCRC headers and for the USB data path.
    fn set_data_role(&mut self, _role: DataRole) -> impl Future<Output = ()> {
        async {}
    }

    /// Switch VCONN on or off.
    fn set_vconn_source(&mut self, _enable: bool) -> impl Future<Output = ()> {
        async {}
    }

    /// Enable or disable the CC line terminations.
    ///
    /// Disabling opens both CC lines, as required during error recovery.
    fn set_cc_control(&mut self, _enable: bool) -> impl Future<Output = ()> {
        async {}
    }

    /// Change the Rp current advertisement.
    fn set_rp_control(&mut self, _level: RpLevel) -> impl Future<Output = ()> {
        async {}
    }
}

/// Result of Type-C attach detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attach {
    /// Initial power role, source when presenting Rp.
    pub power_role: PowerRole,
    /// Whether the port sources VCONN after attach.
    pub vconn_source: bool,
}

impl Attach {
    /// The data role that follows the initial power role.
    pub fn data_role(&self) -> DataRole {
        match self.power_role {
            PowerRole::Source => DataRole::Dfp,
            PowerRole::Sink => DataRole::Ufp,
        }
    }
}

/// Type-C connection detection, external to the PD core.
pub trait TypeC {
    /// Wait until a partner is attached.
    fn wait_for_attach(&mut self) -> impl Future<Output = Attach>;

    /// Wait until the partner is detached.
    fn wait_for_detach(&mut self) -> impl Future<Output = ()>;

    /// Run the Type-C error recovery sequence, after which the partner is considered detached.
    fn error_recovery(&mut self) -> impl Future<Output = ()>;
}
