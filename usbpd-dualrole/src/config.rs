//! Configuration of a dual-role port.
//!
//! Holds what the port advertises, what it asks for as a sink, which swaps it accepts or
//! initiates, and what it answers to structured VDMs.
use heapless::Vec;
use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;

use crate::protocol_layer::message::data::sink_capabilities::{SinkCapabilities, SinkFixedSupply, SinkPowerDataObject};
use crate::protocol_layer::message::data::source_capabilities::{FixedSupply, MAX_PDOS, PowerDataObject, SourceCapabilities};
use crate::protocol_layer::message::data::vendor_defined::Identity;
use crate::protocol_layer::message::header::SpecificationRevision;
use crate::units::{ElectricCurrent, ElectricPotential};
use crate::{DataRole, PowerRole};

/// Maximum number of SVIDs that a port reports.
pub const MAX_SVIDS: usize = 6;

/// Operating point for a programmable supply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PpsTarget {
    /// Requested output voltage.
    pub voltage: ElectricPotential,
    /// Requested operating current.
    pub current: ElectricCurrent,
}

/// What the port asks for when it is a sink.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkPolicy {
    /// Fixed supplies above this voltage are never selected.
    pub max_voltage: ElectricPotential,
    /// Current that the sink draws in operation.
    pub operating_current: ElectricCurrent,
    /// Highest current that the sink may draw.
    pub max_operating_current: ElectricCurrent,
    /// The sink can reduce its draw on GotoMin.
    pub give_back: bool,
    /// Request a programmable supply at this point, if the source offers one that covers it.
    pub pps: Option<PpsTarget>,
}

impl Default for SinkPolicy {
    fn default() -> Self {
        Self {
            max_voltage: ElectricPotential::new::<millivolt>(9000),
            operating_current: ElectricCurrent::new::<milliampere>(2000),
            max_operating_current: ElectricCurrent::new::<milliampere>(2000),
            give_back: false,
            pps: None,
        }
    }
}

/// Which swaps the port accepts, and which roles it works towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SwapPolicy {
    pub accept_pr_swap: bool,
    pub accept_dr_swap: bool,
    pub accept_vconn_swap: bool,
    /// Request a power role swap after a contract, if the current role differs.
    pub preferred_power_role: Option<PowerRole>,
    /// Request a data role swap after a contract, if the current role differs.
    pub preferred_data_role: Option<DataRole>,
}

impl Default for SwapPolicy {
    fn default() -> Self {
        Self {
            accept_pr_swap: true,
            accept_dr_swap: true,
            accept_vconn_swap: true,
            preferred_power_role: None,
            preferred_data_role: None,
        }
    }
}

/// Structured VDM behaviour.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VdmConfig {
    /// Identity reported in Discover Identity responses. Requests are NAKed without one.
    pub identity: Option<Identity>,
    /// SVIDs reported in Discover SVIDs responses.
    pub svids: Vec<u16, MAX_SVIDS>,
    /// Mode VDOs reported per SVID in Discover Modes responses.
    pub modes: Vec<(u16, u32), MAX_SVIDS>,
    /// Discover the partner's identity and modes after an explicit contract as DFP.
    pub auto_discover: bool,
    /// Enter DisplayPort alternate mode if the partner offers it.
    pub enter_displayport: bool,
    /// Prefer a DisplayPort pin assignment that leaves USB data lanes.
    pub displayport_multi_function: bool,
}

/// Configuration of a dual-role port.
#[derive(Clone, Debug, PartialEq)]
pub struct PortConfig {
    /// Capabilities advertised as a source.
    pub source_capabilities: SourceCapabilities,
    /// Capabilities reported as a sink.
    pub sink_capabilities: SinkCapabilities,
    /// Sink request policy.
    pub sink: SinkPolicy,
    /// Swap policy.
    pub swap: SwapPolicy,
    /// Structured VDM behaviour.
    pub vdm: VdmConfig,
    /// Highest specification revision to use.
    pub spec_revision: SpecificationRevision,
}

impl Default for PortConfig {
    fn default() -> Self {
        let mut source_pdos = Vec::<PowerDataObject, MAX_PDOS>::new();
        source_pdos
            .push(PowerDataObject::FixedSupply(
                FixedSupply::new(100, 150)
                    .with_dual_role_power(true)
                    .with_dual_role_data(true)
                    .with_usb_communications_capable(true),
            ))
            .ok();

        let mut sink_pdos = Vec::<SinkPowerDataObject, MAX_PDOS>::new();
        sink_pdos
            .push(SinkPowerDataObject::FixedSupply(
                SinkFixedSupply::new(100, 200)
                    .with_dual_role_power(true)
                    .with_dual_role_data(true)
                    .with_usb_communications_capable(true),
            ))
            .ok();
        sink_pdos
            .push(SinkPowerDataObject::FixedSupply(SinkFixedSupply::new(180, 200)))
            .ok();

        Self {
            source_capabilities: SourceCapabilities::new(source_pdos),
            sink_capabilities: SinkCapabilities(sink_pdos),
            sink: Default::default(),
            swap: Default::default(),
            vdm: Default::default(),
            spec_revision: SpecificationRevision::R3_X,
        }
    }
}
