//! The protocol layer is controlled by the policy engine, and commands the PHY layer.
//!
//! Handles
//! - construction of messages and their message IDs,
//! - GoodCRC acknowledgement in both directions,
//! - retransmission of unacknowledged messages,
//! - detection of retransmitted received messages,
//! - soft and hard reset of its own bookkeeping.
//!
//! Message IDs are tracked separately for each SOP type.
pub mod message;

use core::marker::PhantomData;

use embassy_futures::select::{Either, select};
use message::data::{Data, MAX_VDOS};
use message::data::vendor_defined::VdmHeader;
use message::extended::ExtendedPayload;
use message::header::{ControlMessageType, DataMessageType, ExtendedMessageType, Header, MessageType, SpecificationRevision};
use message::{MAX_MESSAGE_SIZE, Message, ParseError};
use usbpd_dualrole_traits::{DriverRxError, DriverTxError, Sop};

use crate::counters::{Counter, CounterType};
use crate::timers::{CRC_RECEIVE_MILLIS, Timer};
use crate::{DataRole, Driver, PowerRole};

const SOP_COUNT: usize = 3;

/// Errors that occur while receiving.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// Hard reset signaling was received.
    #[error("hard reset received")]
    HardReset,
    /// The partner sent Soft_Reset. Message IDs of SOP were already reset.
    #[error("soft reset received")]
    SoftReset,
    /// The message type is reserved, or not supported by this stack.
    #[error("unsupported message")]
    UnsupportedMessage,
    /// The message could not be parsed.
    #[error("failed to parse message: {0}")]
    ParseError(ParseError),
}

/// Errors that occur while transmitting.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// Hard reset signaling was received during transmission.
    #[error("hard reset during transmission")]
    HardReset,
    /// The transmission was abandoned, because the partner sent a message first.
    ///
    /// The partner's message is delivered by the next receive call.
    #[error("transmission discarded")]
    Discarded,
}

/// Errors that the protocol layer reports to the policy engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An error during reception.
    #[error("receive error: {0}")]
    RxError(RxError),
    /// An error during transmission.
    #[error("transmit error: {0}")]
    TxError(TxError),
    /// No GoodCRC arrived for the message, after all retries.
    #[error("transmit retries exceeded for {0:?}")]
    TransmitRetriesExceeded(MessageType),
    /// A message arrived that is not valid in the current policy state.
    #[error("unexpected message")]
    UnexpectedMessage,
}

impl From<RxError> for ProtocolError {
    fn from(value: RxError) -> Self {
        ProtocolError::RxError(value)
    }
}

impl From<TxError> for ProtocolError {
    fn from(value: TxError) -> Self {
        ProtocolError::TxError(value)
    }
}

impl From<ParseError> for RxError {
    fn from(value: ParseError) -> Self {
        match value {
            ParseError::InvalidMessageType(_) | ParseError::ChunkingNotSupported(_) => RxError::UnsupportedMessage,
            other => RxError::ParseError(other),
        }
    }
}

/// States of the transmitting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum TxState {
    PhyLayerReset,
    WaitForMessageRequest,
    LayerResetForTransmit,
    ConstructMessage,
    WaitForPhyResponse,
    /// A GoodCRC with the given message ID arrived.
    MatchMessageId(u8),
    MessageSent,
    CheckRetryCounter,
    TransmissionError,
    DiscardMessage,
}

/// States of the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum RxState {
    LayerResetForReceive,
    WaitForPhyMessage,
    SendGoodCrc,
    CheckMessageId,
    StoreMessageId,
}

/// Outcome of the last transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStatus {
    /// Nothing was sent since the last reset.
    #[default]
    None,
    /// The last message was acknowledged.
    Sent,
    /// The last message was not acknowledged, or discarded.
    Error,
}

/// A frame that was taken from the driver, but not handed out yet.
///
/// It survives cancellation of a receive call, so that the next call picks it up where the last one
/// stopped.
#[derive(Debug)]
struct RxFrame {
    sop: Sop,
    header: Header,
    parsed: Result<Message, ParseError>,
    acknowledged: bool,
}

/// Outcome of waiting for a GoodCRC.
enum GoodCrcError {
    Timeout,
    Protocol(ProtocolError),
}

#[derive(Debug)]
struct Counters {
    rx_message: [Option<Counter>; SOP_COUNT],
    tx_message: [Counter; SOP_COUNT],
    retry: Counter,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            rx_message: [None; SOP_COUNT],
            tx_message: [Counter::new(CounterType::MessageId); SOP_COUNT],
            retry: Counter::new(CounterType::Retry),
        }
    }
}

impl Counters {
    fn reset_sop(&mut self, sop: Sop) {
        self.rx_message[sop.index()] = None;
        self.tx_message[sop.index()].reset();
        self.retry.reset();
    }
}

/// The USB PD protocol layer.
#[derive(Debug)]
pub struct ProtocolLayer<DRIVER: Driver, TIMER: Timer> {
    driver: DRIVER,
    counters: Counters,
    header_template: Header,
    /// The highest revision this port speaks, restored on every reset.
    max_spec_revision: SpecificationRevision,
    tx_state: TxState,
    rx_state: RxState,
    tx_status: TxStatus,
    rx_frame: Option<RxFrame>,
    /// A message that interrupted a transmission, not yet handed to the policy engine.
    pending_rx: Option<Message>,
    _timer: PhantomData<TIMER>,
}

impl<DRIVER: Driver, TIMER: Timer> ProtocolLayer<DRIVER, TIMER> {
    /// Create a new protocol layer from a driver and header template.
    pub fn new(driver: DRIVER, header_template: Header) -> Self {
        Self {
            driver,
            counters: Default::default(),
            header_template,
            max_spec_revision: header_template.spec_revision().unwrap_or(SpecificationRevision::R2_0),
            tx_state: TxState::PhyLayerReset,
            rx_state: RxState::LayerResetForReceive,
            tx_status: TxStatus::None,
            rx_frame: None,
            pending_rx: None,
            _timer: PhantomData,
        }
    }

    /// Reset all message IDs and states, e.g. after attach, detach or hard reset.
    ///
    /// The revision that a partner negotiated down is forgotten.
    pub fn reset(&mut self) {
        trace!("Reset protocol layer");
        self.counters = Default::default();
        self.header_template = self.header_template.with_spec_revision(self.max_spec_revision);
        self.tx_state = TxState::WaitForMessageRequest;
        self.rx_state = RxState::WaitForPhyMessage;
        self.tx_status = TxStatus::None;
        self.rx_frame = None;
        self.pending_rx = None;
    }

    /// Reset the message IDs of one SOP type, after a soft reset.
    pub fn soft_reset(&mut self, sop: Sop) {
        trace!("Soft reset protocol layer for {:?}", sop);
        self.counters.reset_sop(sop);
        if sop == Sop::Sop {
            self.rx_frame = None;
            self.pending_rx = None;
        }
    }

    /// Access the driver.
    pub fn driver(&mut self) -> &mut DRIVER {
        &mut self.driver
    }

    /// The header template that outgoing messages are built from.
    pub fn header(&self) -> &Header {
        &self.header_template
    }

    /// Use new port roles in outgoing headers.
    pub fn set_roles(&mut self, power_role: PowerRole, data_role: DataRole) {
        self.header_template = self.header_template.with_roles(power_role, data_role);
    }

    /// Set the highest specification revision of this port, and use it in outgoing headers.
    pub fn set_spec_revision(&mut self, revision: SpecificationRevision) {
        self.max_spec_revision = revision;
        self.header_template = self.header_template.with_spec_revision(revision);
    }

    /// The specification revision used in outgoing headers.
    pub fn spec_revision(&self) -> SpecificationRevision {
        self.header_template.spec_revision().unwrap_or(SpecificationRevision::R2_0)
    }

    /// State of the transmitting side.
    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    /// State of the receiving side.
    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    /// Outcome of the last transmission.
    pub fn tx_status(&self) -> TxStatus {
        self.tx_status
    }

    /// The message ID that the next message towards `sop` will carry.
    pub fn tx_message_id(&self, sop: Sop) -> u8 {
        self.counters.tx_message[sop.index()].value()
    }

    /// Wait for VBUS to be available.
    pub async fn wait_for_vbus(&mut self) {
        self.driver.wait_for_vbus().await
    }

    fn get_message_buffer() -> [u8; MAX_MESSAGE_SIZE] {
        [0u8; MAX_MESSAGE_SIZE]
    }

    /// Acknowledge the stored frame, unless that already happened.
    async fn acknowledge(&mut self) -> Result<(), ProtocolError> {
        let (sop, header) = match self.rx_frame.as_ref() {
            Some(frame) if !frame.acknowledged => (frame.sop, frame.header),
            _ => return Ok(()),
        };

        self.rx_state = RxState::SendGoodCrc;
        if !DRIVER::HAS_AUTO_GOOD_CRC {
            self.transmit_good_crc(sop, header).await?;
        }
        if let Some(frame) = self.rx_frame.as_mut() {
            frame.acknowledged = true;
        }
        Ok(())
    }

    /// Check the message ID of an acknowledged frame.
    ///
    /// Returns `true`, if the frame is new and shall be forwarded.
    fn check_message_id(&mut self, sop: Sop, header: Header) -> bool {
        self.rx_state = RxState::CheckMessageId;
        if header.is_control(ControlMessageType::SoftReset) {
            // A soft reset always starts a new message ID sequence.
            self.counters.reset_sop(sop);
        }

        let rx_counter = &mut self.counters.rx_message[sop.index()];
        if rx_counter.is_some_and(|counter| counter.value() == header.message_id()) {
            trace!("Received retransmission of message ID {} on {:?}", header.message_id(), sop);
            self.rx_state = RxState::WaitForPhyMessage;
            return false;
        }

        self.rx_state = RxState::StoreMessageId;
        *rx_counter = Some(Counter::new_from_value(CounterType::MessageId, header.message_id()));

        if sop == Sop::Sop {
            if let Ok(revision) = header.spec_revision() {
                let negotiated = self.spec_revision().negotiate(revision);
                if negotiated != self.spec_revision() {
                    debug!("Partner uses revision {:?}", revision);
                    self.header_template = self.header_template.with_spec_revision(negotiated);
                }
            }
        }

        self.rx_state = RxState::WaitForPhyMessage;
        true
    }

    /// Take the next frame from the driver, and keep it until it is handled.
    ///
    /// Returns the frame that a cancelled call left behind first.
    async fn next_frame(&mut self) -> Result<(Sop, Header), ProtocolError> {
        if let Some(frame) = self.rx_frame.as_ref() {
            return Ok((frame.sop, frame.header));
        }

        let (sop, header, parsed) = Self::receive_frame(&mut self.driver).await?;
        self.rx_frame = Some(RxFrame {
            sop,
            header,
            parsed,
            acknowledged: false,
        });
        Ok((sop, header))
    }

    /// Acknowledge the stored frame and check its message ID.
    ///
    /// Returns the parsed message, if the frame is new.
    async fn accept_frame(&mut self) -> Result<Option<(Sop, Result<Message, ParseError>)>, ProtocolError> {
        self.acknowledge().await?;

        let Some(frame) = self.rx_frame.take() else {
            return Ok(None);
        };
        if self.check_message_id(frame.sop, frame.header) {
            Ok(Some((frame.sop, frame.parsed)))
        } else {
            Ok(None)
        }
    }

    /// Send a GoodCRC message for a received header.
    async fn transmit_good_crc(&mut self, sop: Sop, received: Header) -> Result<(), ProtocolError> {
        trace!("Transmit GoodCRC for message ID {} on {:?}", received.message_id(), sop);

        let mut buffer = Self::get_message_buffer();
        let size = Message::new(self.header_template.good_crc_for(received)).to_bytes(&mut buffer);

        match self.driver.transmit(sop, &buffer[..size]).await {
            Ok(()) | Err(DriverTxError::Discarded) => Ok(()),
            Err(DriverTxError::HardReset) => Err(TxError::HardReset.into()),
        }
    }

    /// Receive one frame from the driver, returning its header, parse result and SOP type.
    ///
    /// Frames with an unreadable header are dropped, like frames with a bad CRC.
    async fn receive_frame(
        driver: &mut DRIVER,
    ) -> Result<(Sop, Header, Result<Message, ParseError>), ProtocolError> {
        loop {
            let mut buffer = Self::get_message_buffer();

            let (length, sop) = match driver.receive(&mut buffer).await {
                Ok(received) => received,
                Err(DriverRxError::Discarded) => continue,
                Err(DriverRxError::HardReset) => return Err(RxError::HardReset.into()),
            };

            let header = match Header::from_bytes(&buffer[..length]) {
                Ok(header) => header,
                Err(error) => {
                    warn!("Dropping frame with invalid header: {:?}", error);
                    continue;
                }
            };

            return Ok((sop, header, Message::from_bytes(&buffer[..length])));
        }
    }

    /// Wait for a GoodCRC for the message in flight.
    ///
    /// Any other message that arrives meanwhile is acknowledged and kept for the next receive call,
    /// and the transmission is discarded.
    async fn wait_for_good_crc(&mut self, sop: Sop) -> Result<u8, GoodCrcError> {
        loop {
            let receive_fut = self.next_frame();
            let timeout_fut = TIMER::after_millis(CRC_RECEIVE_MILLIS);

            let (rx_sop, header) = match select(receive_fut, timeout_fut).await {
                Either::First(received) => received.map_err(GoodCrcError::Protocol)?,
                Either::Second(()) => return Err(GoodCrcError::Timeout),
            };

            if header.is_good_crc() {
                self.rx_frame = None;
                if rx_sop == sop {
                    return Ok(header.message_id());
                }
                continue;
            }

            debug!("Message {:?} interrupts transmission", header.message_type());
            if let Some((Sop::Sop, parsed)) = self.accept_frame().await.map_err(GoodCrcError::Protocol)? {
                match parsed {
                    Ok(message) => self.pending_rx = Some(message),
                    Err(error) => warn!("Dropping unparsable message: {:?}", error),
                }
                return Err(GoodCrcError::Protocol(TxError::Discarded.into()));
            }
        }
    }

    /// Transmit a message and wait for its acknowledgement.
    ///
    /// The message ID is taken from the protocol layer's counter for `sop`.
    pub async fn transmit(&mut self, sop: Sop, mut message: Message) -> Result<(), ProtocolError> {
        let message_type = message.header.message_type();

        if message.is_control(ControlMessageType::SoftReset) {
            self.tx_state = TxState::LayerResetForTransmit;
            self.soft_reset(sop);
        } else if sop == Sop::Sop && (self.pending_rx.is_some() || self.partner_frame_waiting()) {
            // The partner spoke first.
            self.tx_state = TxState::DiscardMessage;
            self.tx_status = TxStatus::Error;
            return Err(TxError::Discarded.into());
        }

        self.counters.retry.reset();
        trace!("Transmit message {:?} on {:?}", message_type, sop);

        loop {
            self.tx_state = TxState::ConstructMessage;
            message.header = message
                .header
                .with_message_id(self.counters.tx_message[sop.index()].value());

            let mut buffer = Self::get_message_buffer();
            let size = message.to_bytes(&mut buffer);

            match self.driver.transmit(sop, &buffer[..size]).await {
                Ok(()) => (),
                Err(DriverTxError::Discarded) => {
                    self.tx_state = TxState::DiscardMessage;
                    self.tx_status = TxStatus::Error;
                    return Err(TxError::Discarded.into());
                }
                Err(DriverTxError::HardReset) => return Err(TxError::HardReset.into()),
            }

            if DRIVER::HAS_AUTO_GOOD_CRC {
                self.message_sent(sop);
                return Ok(());
            }

            self.tx_state = TxState::WaitForPhyResponse;
            match self.wait_for_good_crc(sop).await {
                Ok(message_id) => {
                    self.tx_state = TxState::MatchMessageId(message_id);
                    if message_id == self.counters.tx_message[sop.index()].value() {
                        self.message_sent(sop);
                        return Ok(());
                    }
                    debug!("GoodCRC with wrong message ID {}", message_id);
                }
                Err(GoodCrcError::Timeout) => trace!("No GoodCRC for {:?}", message_type),
                Err(GoodCrcError::Protocol(ProtocolError::TxError(TxError::Discarded))) => {
                    self.tx_state = TxState::DiscardMessage;
                    self.tx_status = TxStatus::Error;
                    return Err(TxError::Discarded.into());
                }
                Err(GoodCrcError::Protocol(error)) => return Err(error),
            }

            self.tx_state = TxState::CheckRetryCounter;
            if self.counters.retry.exhausted() {
                warn!("Transmit retries exceeded for {:?}", message_type);
                self.tx_state = TxState::TransmissionError;
                self.tx_status = TxStatus::Error;
                self.counters.tx_message[sop.index()].increment();
                return Err(ProtocolError::TransmitRetriesExceeded(message_type));
            }

            self.counters.retry.increment();
            debug!("Retransmission {} of {:?}", self.counters.retry.value(), message_type);
        }
    }

    /// Whether a message of the partner was taken from the driver, but not handled yet.
    fn partner_frame_waiting(&self) -> bool {
        self.rx_frame
            .as_ref()
            .is_some_and(|frame| frame.sop == Sop::Sop && !frame.header.is_good_crc())
    }

    fn message_sent(&mut self, sop: Sop) {
        self.tx_state = TxState::MessageSent;
        self.tx_status = TxStatus::Sent;
        self.counters.retry.reset();
        self.counters.tx_message[sop.index()].increment();
        self.tx_state = TxState::WaitForMessageRequest;
    }

    /// Receive the next new message from the port partner.
    ///
    /// Every frame is acknowledged, but retransmissions are only delivered once. Cable plug
    /// messages are acknowledged and dropped.
    pub async fn receive_message(&mut self) -> Result<Message, ProtocolError> {
        if let Some(message) = self.pending_rx.take() {
            return Self::deliver(message);
        }

        loop {
            self.rx_state = RxState::WaitForPhyMessage;
            let (sop, header) = self.next_frame().await?;

            if header.is_good_crc() {
                trace!("Ignoring GoodCRC outside of transmission");
                self.rx_frame = None;
                continue;
            }

            let Some((sop, parsed)) = self.accept_frame().await? else {
                continue;
            };

            if sop != Sop::Sop {
                debug!("Dropping {:?} message {:?}", sop, header.message_type());
                continue;
            }

            return Self::deliver(parsed.map_err(RxError::from)?);
        }
    }

    fn deliver(message: Message) -> Result<Message, ProtocolError> {
        trace!("Received message {:?}", message.header.message_type());

        if message.is_control(ControlMessageType::SoftReset) {
            Err(RxError::SoftReset.into())
        } else {
            Ok(message)
        }
    }

    /// Perform a hard reset: signal it, and reset all message IDs.
    pub async fn hard_reset(&mut self) -> Result<(), ProtocolError> {
        self.reset();

        loop {
            match self.driver.transmit_hard_reset().await {
                Ok(_) | Err(DriverTxError::HardReset) => break,
                Err(DriverTxError::Discarded) => (),
            }
        }

        Ok(())
    }

    /// Transmit a control message of the provided type.
    pub async fn transmit_control_message(&mut self, message_type: ControlMessageType) -> Result<(), ProtocolError> {
        let header = self
            .header_template
            .control_message(self.tx_message_id(Sop::Sop), message_type);

        self.transmit(Sop::Sop, Message::new(header)).await
    }

    /// Transmit a data message.
    pub async fn transmit_data_message(&mut self, data: Data) -> Result<(), ProtocolError> {
        let message_type: DataMessageType = data.message_type();
        let header = self
            .header_template
            .data_message(self.tx_message_id(Sop::Sop), message_type, data.num_objects());

        self.transmit(Sop::Sop, Message::new_with_data(header, data)).await
    }

    /// Transmit an extended message with a single chunk payload.
    pub async fn transmit_extended_message(
        &mut self,
        message_type: ExtendedMessageType,
        payload: ExtendedPayload,
    ) -> Result<(), ProtocolError> {
        let header = self
            .header_template
            .extended_message(self.tx_message_id(Sop::Sop), message_type, payload.num_objects());

        self.transmit(Sop::Sop, Message::new_with_extended(header, payload))
            .await
    }

    /// Transmit a vendor defined message to the port partner.
    pub async fn transmit_vdm(&mut self, header: VdmHeader, objects: &[u32]) -> Result<(), ProtocolError> {
        let objects = objects.iter().copied().take(MAX_VDOS).collect();

        self.transmit_data_message(Data::VendorDefined((header, objects))).await
    }
}
