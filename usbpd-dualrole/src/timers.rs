//! Timers that are used by the protocol layer and policy engine.
//!
//! The policy engine owns one [`Timers`] set. Starting a timer arms a deadline, and expiry is only
//! recorded as a bit in the expired mask. The policy engine consumes at most one expiry per pass.
use core::future::{Future, pending};
use core::marker::PhantomData;

use bitflags::bitflags;

/// The timer trait to implement by the user application.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;

    /// A monotonic time stamp in milliseconds.
    fn now_millis() -> u64;
}

/// Named policy timers.
///
/// The declaration order is the order in which simultaneous expiries are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// `tPSHardReset`
    PSHardReset,
    /// `tSrcRecover`
    SrcRecover,
    /// `tSenderResponse`
    SenderResponse,
    /// `tSenderResponse` variant used by a source waiting for a request.
    SenderResponseSrc,
    /// `tTypeCSendSourceCap`
    SourceCapability,
    /// `tSinkWaitCap`
    SinkWaitCap,
    /// `tTypeCSinkWaitCap`
    TypeCSinkWaitCap,
    /// `tPSTransition`
    PSTransition,
    /// `tSrcTransition`
    SrcTransition,
    /// `tPSSourceOff`
    PSSourceOff,
    /// `tPSSourceOn`
    PSSourceOn,
    /// `tSwapSourceStart`
    SwapSourceStart,
    /// `tVCONNSourceOn`
    VconnSourceOn,
    /// `tVDMSenderResponse`
    VdmSenderResponse,
    /// `tVDMWaitModeEntry`
    VdmWaitModeEntry,
    /// `tVDMWaitModeExit`
    VdmWaitModeExit,
    /// `tDiscoverIdentity`
    DiscoverIdentity,
    /// `tSinkRequest`
    SinkRequest,
    /// `tBISTContMode`
    BistContMode,
    /// `tPPSRequest`
    SinkPpsPeriodic,
}

impl TimerId {
    /// Number of named timers.
    pub const COUNT: usize = 20;

    /// All timers, in reporting order.
    pub const ALL: [TimerId; Self::COUNT] = [
        TimerId::PSHardReset,
        TimerId::SrcRecover,
        TimerId::SenderResponse,
        TimerId::SenderResponseSrc,
        TimerId::SourceCapability,
        TimerId::SinkWaitCap,
        TimerId::TypeCSinkWaitCap,
        TimerId::PSTransition,
        TimerId::SrcTransition,
        TimerId::PSSourceOff,
        TimerId::PSSourceOn,
        TimerId::SwapSourceStart,
        TimerId::VconnSourceOn,
        TimerId::VdmSenderResponse,
        TimerId::VdmWaitModeEntry,
        TimerId::VdmWaitModeExit,
        TimerId::DiscoverIdentity,
        TimerId::SinkRequest,
        TimerId::BistContMode,
        TimerId::SinkPpsPeriodic,
    ];

    /// The duration of this timer in milliseconds.
    pub const fn duration_millis(self) -> u64 {
        match self {
            TimerId::PSHardReset => 22,
            TimerId::SrcRecover => 880,
            TimerId::SenderResponse => 25,
            TimerId::SenderResponseSrc => 300,
            TimerId::SourceCapability => 100,
            TimerId::SinkWaitCap => 2500,
            TimerId::TypeCSinkWaitCap => 600,
            TimerId::PSTransition => 550,
            TimerId::SrcTransition => 25,
            TimerId::PSSourceOff => 750,
            TimerId::PSSourceOn => 420,
            TimerId::SwapSourceStart => 20,
            TimerId::VconnSourceOn => 100,
            TimerId::VdmSenderResponse => 35,
            TimerId::VdmWaitModeEntry => 50,
            TimerId::VdmWaitModeExit => 50,
            TimerId::DiscoverIdentity => 50,
            TimerId::SinkRequest => 100,
            TimerId::BistContMode => 45,
            TimerId::SinkPpsPeriodic => 5000,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn mask(self) -> TimerMask {
        TimerMask::from_bits_retain(1 << self.index())
    }
}

/// The window in which a GoodCRC must arrive, used by the protocol layer only.
pub(crate) const CRC_RECEIVE_MILLIS: u64 = 1;

/// A set of timers, one bit per [`TimerId`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerMask(u32);

bitflags! {
    impl TimerMask: u32 {
        const _ = !0;
    }
}

/// The set of named timers of one port.
#[derive(Debug)]
pub struct Timers<TIMER: Timer> {
    deadlines: [Option<u64>; TimerId::COUNT],
    expired: TimerMask,
    _timer: PhantomData<TIMER>,
}

impl<TIMER: Timer> Default for Timers<TIMER> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TIMER: Timer> Timers<TIMER> {
    /// Create a timer set with no running timers.
    pub fn new() -> Self {
        Self {
            deadlines: [None; TimerId::COUNT],
            expired: TimerMask::empty(),
            _timer: PhantomData,
        }
    }

    /// Arm a timer for its duration, restarting it if it already runs.
    pub fn start(&mut self, id: TimerId) {
        let deadline = TIMER::now_millis() + id.duration_millis();
        trace!("Start timer {:?}, deadline {}", id, deadline);

        self.deadlines[id.index()] = Some(deadline);
        self.expired.remove(id.mask());
    }

    /// Arm a timer, unless it already runs or has expired without being consumed.
    pub fn start_if_idle(&mut self, id: TimerId) {
        if !self.is_running(id) && !self.expired.contains(id.mask()) {
            self.start(id);
        }
    }

    /// Stop a timer and forget a pending expiry.
    pub fn cancel(&mut self, id: TimerId) {
        self.deadlines[id.index()] = None;
        self.expired.remove(id.mask());
    }

    /// Stop all timers and forget all pending expiries.
    pub fn cancel_all(&mut self) {
        self.deadlines = [None; TimerId::COUNT];
        self.expired = TimerMask::empty();
    }

    /// Whether the timer is armed and has not expired yet.
    pub fn is_running(&self, id: TimerId) -> bool {
        self.deadlines[id.index()].is_some()
    }

    /// Whether any timer is armed.
    pub fn any_running(&self) -> bool {
        self.deadlines.iter().any(Option::is_some)
    }

    /// Timers that expired, and were not consumed yet.
    pub fn expired(&self) -> TimerMask {
        self.expired
    }

    /// Milliseconds until the earliest deadline, if any timer is armed.
    fn next_delay(&self) -> Option<u64> {
        let now = TIMER::now_millis();
        self.deadlines
            .iter()
            .flatten()
            .min()
            .map(|deadline| deadline.saturating_sub(now))
    }

    /// A future that completes at the earliest deadline.
    ///
    /// The future does not borrow the timer set. Call [`Timers::update`] after it completes.
    pub fn wait(&self) -> impl Future<Output = ()> + use<TIMER> {
        let delay = self.next_delay();

        async move {
            match delay {
                Some(milliseconds) => TIMER::after_millis(milliseconds).await,
                None => pending().await,
            }
        }
    }

    /// Move all timers whose deadline passed into the expired mask.
    pub fn update(&mut self) {
        let now = TIMER::now_millis();

        for id in TimerId::ALL {
            match self.deadlines[id.index()] {
                Some(deadline) if deadline <= now => {
                    debug!("Timer {:?} expired", id);
                    self.deadlines[id.index()] = None;
                    self.expired.insert(id.mask());
                }
                _ => (),
            }
        }
    }

    /// Consume one expired timer, the first in reporting order.
    pub fn take_expired(&mut self) -> Option<TimerId> {
        let id = TimerId::ALL.into_iter().find(|id| self.expired.contains(id.mask()))?;
        self.expired.remove(id.mask());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerId, Timers};
    use crate::dummy::DummyTimer;

    #[tokio::test]
    async fn expiry_is_recorded_and_consumed_once() {
        let mut timers: Timers<DummyTimer> = Timers::new();
        timers.start(TimerId::SinkWaitCap);
        timers.start(TimerId::TypeCSinkWaitCap);

        timers.wait().await;
        timers.update();

        assert!(timers.is_running(TimerId::SinkWaitCap));
        assert!(!timers.is_running(TimerId::TypeCSinkWaitCap));
        assert_eq!(timers.take_expired(), Some(TimerId::TypeCSinkWaitCap));
        assert_eq!(timers.take_expired(), None);

        timers.wait().await;
        timers.update();
        assert_eq!(timers.take_expired(), Some(TimerId::SinkWaitCap));
        assert!(!timers.any_running());
    }

    #[tokio::test]
    async fn restart_replaces_deadline() {
        let mut timers: Timers<DummyTimer> = Timers::new();
        timers.start(TimerId::SenderResponse);
        timers.start(TimerId::PSTransition);

        timers.wait().await;
        timers.update();
        assert_eq!(timers.take_expired(), Some(TimerId::SenderResponse));

        // Restarting an expired timer arms it again, a pending expiry is dropped.
        timers.start(TimerId::SenderResponse);
        timers.update();
        timers.start(TimerId::SenderResponse);
        assert_eq!(timers.take_expired(), None);
        assert!(timers.is_running(TimerId::SenderResponse));

        // Starting only when idle keeps the deadline.
        timers.start_if_idle(TimerId::PSTransition);
        timers.cancel(TimerId::SenderResponse);
        timers.wait().await;
        timers.update();
        assert_eq!(timers.take_expired(), Some(TimerId::PSTransition));
    }

    #[tokio::test]
    async fn simultaneous_expiries_are_reported_in_order() {
        let mut timers: Timers<DummyTimer> = Timers::new();
        timers.start(TimerId::SrcTransition);
        timers.start(TimerId::SenderResponse);

        timers.wait().await;
        timers.update();

        assert_eq!(timers.take_expired(), Some(TimerId::SenderResponse));
        assert_eq!(timers.take_expired(), Some(TimerId::SrcTransition));

        timers.start(TimerId::SourceCapability);
        timers.cancel_all();
        assert!(!timers.any_running());
        assert_eq!(timers.take_expired(), None);
    }
}
