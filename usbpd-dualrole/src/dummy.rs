//! Implements a dummy driver, timer, device policy manager and Type-C detector for testing.
use std::cell::Cell;
use std::collections::VecDeque;
use std::future::pending;
use std::task::Poll;
use std::vec::Vec;

use usbpd_dualrole_traits::{Attach, DriverRxError, DriverTxError, RpLevel, Sop, TypeC};

use crate::device_policy_manager::{Contract, DevicePolicyManager, InfoData, InfoRequest, Notification, SupplyLevel};
use crate::manager::Event;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::{ControlMessageType, Header, SpecificationRevision};
use crate::timers::Timer;
use crate::{DataRole, Driver, PowerRole};

thread_local! {
    static NOW: Cell<u64> = const { Cell::new(0) };
}

/// A dummy timer for testing.
///
/// Time is virtual: waiting advances the clock of the current thread instantly.
pub struct DummyTimer {}

impl Timer for DummyTimer {
    async fn after_millis(milliseconds: u64) {
        NOW.with(|now| now.set(now.get() + milliseconds));
    }

    fn now_millis() -> u64 {
        NOW.with(Cell::get)
    }
}

enum RxItem {
    Frame(Vec<u8>, Sop),
    HardReset,
}

/// A dummy driver for testing.
///
/// Receiving pends while no data is injected, which lets timers win the race.
#[derive(Default)]
pub struct DummyDriver {
    rx_queue: VecDeque<RxItem>,
    tx_log: Vec<(Sop, Vec<u8>)>,
    auto_ack: bool,
    stall_good_crc: bool,
    hard_resets: usize,
    power_roles: Vec<PowerRole>,
    data_roles: Vec<DataRole>,
    vconn: Vec<bool>,
    bist_carrier: usize,
}

impl std::fmt::Debug for DummyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyDriver")
            .field("pending_rx", &self.rx_queue.len())
            .field("transmitted", &self.tx_log.len())
            .finish()
    }
}

impl DummyDriver {
    /// Create a new dummy driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the partner acknowledge every transmitted message with a GoodCRC.
    pub fn set_auto_ack(&mut self, auto_ack: bool) {
        self.auto_ack = auto_ack;
    }

    /// Keep GoodCRC transmissions in flight, until this is cleared again.
    pub fn set_stall_good_crc(&mut self, stall: bool) {
        self.stall_good_crc = stall;
    }

    /// Inject received data that can be retrieved later.
    pub fn inject_received_data(&mut self, data: &[u8], sop: Sop) {
        self.rx_queue.push_back(RxItem::Frame(data.to_vec(), sop));
    }

    /// Inject a message from the port partner.
    pub fn inject_message(&mut self, message: &Message) {
        let mut buffer = [0u8; 30];
        let size = message.to_bytes(&mut buffer);
        self.inject_received_data(&buffer[..size], Sop::Sop);
    }

    /// Inject hard reset signaling from the port partner.
    pub fn inject_hard_reset(&mut self) {
        self.rx_queue.push_back(RxItem::HardReset);
    }

    /// Number of injected items that were not received yet.
    pub fn pending_rx(&self) -> usize {
        self.rx_queue.len()
    }

    /// All messages that the stack transmitted towards the port partner, GoodCRC included.
    pub fn transmitted(&self) -> Vec<Message> {
        self.tx_log
            .iter()
            .filter(|(sop, _)| *sop == Sop::Sop)
            .map(|(_, data)| Message::from_bytes(data).unwrap())
            .collect()
    }

    /// Transmitted messages without GoodCRC.
    pub fn transmitted_messages(&self) -> Vec<Message> {
        self.transmitted()
            .into_iter()
            .filter(|message| !message.is_control(ControlMessageType::GoodCRC))
            .collect()
    }

    /// Forget all transmitted messages.
    pub fn clear_transmitted(&mut self) {
        self.tx_log.clear();
    }

    /// Number of transmitted hard resets.
    pub fn hard_resets(&self) -> usize {
        self.hard_resets
    }

    /// Power roles set by the stack, in order.
    pub fn power_roles(&self) -> &[PowerRole] {
        &self.power_roles
    }

    /// Data roles set by the stack, in order.
    pub fn data_roles(&self) -> &[DataRole] {
        &self.data_roles
    }

    /// VCONN states set by the stack, in order.
    pub fn vconn(&self) -> &[bool] {
        &self.vconn
    }

    /// Number of BIST carrier mode transmissions.
    pub fn bist_carrier(&self) -> usize {
        self.bist_carrier
    }
}

impl Driver for DummyDriver {
    async fn wait_for_vbus(&self) {
        // VBUS is always present.
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, Sop), DriverRxError> {
        let item = std::future::poll_fn(|_| match self.rx_queue.pop_front() {
            Some(item) => Poll::Ready(item),
            None => Poll::Pending,
        })
        .await;

        match item {
            RxItem::Frame(data, sop) => {
                buffer[..data.len()].copy_from_slice(&data);
                Ok((data.len(), sop))
            }
            RxItem::HardReset => Err(DriverRxError::HardReset),
        }
    }

    async fn transmit(&mut self, sop: Sop, data: &[u8]) -> Result<(), DriverTxError> {
        let header = Header::from_bytes(data).unwrap();
        if self.stall_good_crc && header.is_control(ControlMessageType::GoodCRC) {
            pending::<()>().await;
        }

        self.tx_log.push((sop, data.to_vec()));
        if self.auto_ack && !header.is_control(ControlMessageType::GoodCRC) {
            let partner = Header::for_port(PowerRole::Source, DataRole::Dfp, SpecificationRevision::R3_X);
            let good_crc = Message::new(partner.good_crc_for(header));
            let mut buffer = [0u8; 2];
            good_crc.to_bytes(&mut buffer);
            self.rx_queue.push_front(RxItem::Frame(buffer.to_vec(), sop));
        }

        Ok(())
    }

    async fn transmit_hard_reset(&mut self) -> Result<(), DriverTxError> {
        self.hard_resets += 1;
        Ok(())
    }

    async fn transmit_bist_carrier(&mut self) {
        self.bist_carrier += 1;
    }

    async fn set_power_role(&mut self, role: PowerRole) {
        self.power_roles.push(role);
    }

    async fn set_data_role(&mut self, role: DataRole) {
        self.data_roles.push(role);
    }

    async fn set_vconn_source(&mut self, enable: bool) {
        self.vconn.push(enable);
    }

    async fn set_rp_control(&mut self, _level: RpLevel) {}
}

/// A device policy manager that records what it is told, and hands out scripted events.
#[derive(Debug, Default)]
pub struct DummyDevicePolicyManager {
    /// Events returned by `get_event`, in order.
    pub events: VecDeque<Event>,
    /// All notifications, in order.
    pub notifications: Vec<Notification>,
    /// Contracts that the sink transitioned to.
    pub contracts: Vec<Contract>,
    /// Supply levels that the source was told to provide.
    pub supply: Vec<SupplyLevel>,
    /// Answer to information requests of the partner.
    pub info: Option<InfoData>,
    /// Number of hard resets.
    pub hard_resets: usize,
}

impl DummyDevicePolicyManager {
    /// Whether a notification was recorded.
    pub fn notified(&self, notification: &Notification) -> bool {
        self.notifications.contains(notification)
    }
}

impl DevicePolicyManager for DummyDevicePolicyManager {
    async fn get_event(&mut self) -> Event {
        std::future::poll_fn(|_| match self.events.pop_front() {
            Some(event) => Poll::Ready(event),
            None => Poll::Pending,
        })
        .await
    }

    async fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    async fn transition_power(&mut self, contract: &Contract) {
        self.contracts.push(*contract);
    }

    async fn source_supply(&mut self, level: SupplyLevel) {
        self.supply.push(level);
    }

    async fn hard_reset(&mut self) {
        self.hard_resets += 1;
    }

    async fn provide_info(&mut self, _request: &InfoRequest) -> Option<InfoData> {
        self.info.clone()
    }
}

/// A Type-C detector that attaches once.
#[derive(Debug)]
pub struct DummyTypeC {
    /// Result of attach detection.
    pub attach: Attach,
    /// Report detach as soon as it is waited for.
    pub detach_immediately: bool,
    /// Number of error recoveries.
    pub error_recoveries: usize,
    attached: bool,
}

impl DummyTypeC {
    /// Create a detector for the given attach result.
    pub fn new(attach: Attach) -> Self {
        Self {
            attach,
            detach_immediately: false,
            error_recoveries: 0,
            attached: false,
        }
    }
}

impl TypeC for DummyTypeC {
    async fn wait_for_attach(&mut self) -> Attach {
        if self.attached {
            pending::<()>().await;
        }
        self.attached = true;
        self.attach
    }

    async fn wait_for_detach(&mut self) {
        if !self.detach_immediately {
            pending::<()>().await;
        }
    }

    async fn error_recovery(&mut self) {
        self.error_recoveries += 1;
    }
}

/// Dummy capabilities to deserialize.
///
/// - Fixed 5 V at 3 A
/// - Fixed 9 V at 3 A
/// - Fixed 15 V at 3 A
/// - Fixed 20 V at 2.25 A
/// - PPS 3.3-11 V at 5 A
/// - PPS 3.3-16 V at 3 A
/// - PPS 3.3-21 V at 2.25 A
pub const DUMMY_CAPABILITIES: [u8; 30] = [
    0xA1, // Header
    0x71, // Header
    0x2c, // +
    0x91, // | Fixed 5V @ 3A
    0x01, // |
    0x08, // +
    0x2c, // +
    0xD1, // |
    0x02, // | Fixed 9V @ 3A
    0x00, // +
    0x2C, // +
    0xB1, // |
    0x04, // | Fixed 15V @ 3A
    0x00, // +
    0xE1, // +
    0x40, // |
    0x06, // | Fixed 20V @ 2.25A
    0x00, // +
    0x64, // +
    0x21, // |
    0xDC, // | PPS 3.3-11V @ 5A
    0xC8, // +
    0x3C, // +
    0x21, // |
    0x40, // | PPS 3.3-16V @ 3A
    0xC9, // +
    0x2D, // +
    0x21, // |
    0xA4, // | PPS 3.3-21V @ 2.25A
    0xC9, // +
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_layer::message::data::Data;
    use crate::protocol_layer::message::header::{DataMessageType, MessageType};

    #[tokio::test]
    async fn test_receive() {
        let mut driver = DummyDriver::new();

        let mut injected_data = [0u8; 30];
        injected_data[0] = 123;
        driver.inject_received_data(&injected_data, Sop::Sop);

        injected_data[1] = 255;
        driver.inject_received_data(&injected_data, Sop::SopPrime);

        let mut buf = [0u8; 30];
        assert_eq!(driver.receive(&mut buf).await, Ok((30, Sop::Sop)));
        assert_eq!(buf[0], 123);
        assert_eq!(buf[1], 0);

        let mut buf = [0u8; 30];
        assert_eq!(driver.receive(&mut buf).await, Ok((30, Sop::SopPrime)));
        assert_eq!(buf[0], 123);
        assert_eq!(buf[1], 255);
    }

    #[test]
    fn capabilities_parse() {
        let message = Message::from_bytes(&DUMMY_CAPABILITIES).unwrap();
        assert_eq!(
            message.message_type(),
            MessageType::Data(DataMessageType::SourceCapabilities)
        );

        let Some(Data::SourceCapabilities(capabilities)) = message.data() else {
            panic!("expected source capabilities");
        };
        assert_eq!(capabilities.pdos().len(), 7);
        assert!(capabilities.has_pps());
    }

    #[tokio::test]
    async fn clock_advances_while_waiting() {
        let start = DummyTimer::now_millis();
        DummyTimer::after_millis(25).await;
        assert_eq!(DummyTimer::now_millis(), start + 25);
    }
}
