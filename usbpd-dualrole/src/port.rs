//! A dual-role port: Type-C attach detection around the policy engine.
//!
//! Every attach starts a new session. The session ends on detach, or when the policy engine asks for
//! error recovery. In both cases, the policy engine is brought back to its detached state.
use embassy_futures::select::{Either, select};

use crate::config::PortConfig;
use crate::device_policy_manager::DevicePolicyManager;
use crate::policy_engine::{Error, PolicyEngine};
use crate::timers::Timer;
use crate::{Driver, TypeC};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEnd {
    /// The partner was detached.
    Detached,
    /// The policy engine gave up, and the Type-C layer ran error recovery.
    ErrorRecovery,
}

/// A USB PD dual-role port.
#[derive(Debug)]
pub struct Port<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager, TYPEC: TypeC> {
    policy_engine: PolicyEngine<DRIVER, TIMER, DPM>,
    type_c: TYPEC,
}

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager, TYPEC: TypeC> Port<DRIVER, TIMER, DPM, TYPEC> {
    /// Create a new port.
    pub fn new(driver: DRIVER, device_policy_manager: DPM, type_c: TYPEC, config: PortConfig) -> Self {
        Self {
            policy_engine: PolicyEngine::new(driver, device_policy_manager, config),
            type_c,
        }
    }

    /// The policy engine of this port.
    pub fn policy_engine(&mut self) -> &mut PolicyEngine<DRIVER, TIMER, DPM> {
        &mut self.policy_engine
    }

    /// Wait for a partner, and run one session with it.
    pub async fn run_session(&mut self) -> SessionEnd {
        let attach = self.type_c.wait_for_attach().await;
        self.policy_engine.attach(attach).await;

        let end = match select(self.type_c.wait_for_detach(), self.policy_engine.run()).await {
            Either::First(()) => SessionEnd::Detached,
            Either::Second(result) => {
                if let Err(Error::Protocol(error)) = result {
                    error!("Policy engine stopped with {:?}", error);
                }
                self.type_c.error_recovery().await;
                SessionEnd::ErrorRecovery
            }
        };

        self.policy_engine.detach().await;
        info!("Session ended: {:?}", end);
        end
    }

    /// Run sessions forever.
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_session().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use usbpd_dualrole_traits::Attach;

    use super::*;
    use crate::PowerRole;
    use crate::device_policy_manager::Notification;
    use crate::dummy::{DummyDevicePolicyManager, DummyDriver, DummyTimer, DummyTypeC};

    fn port(attach: Attach) -> Port<DummyDriver, DummyTimer, DummyDevicePolicyManager, DummyTypeC> {
        let mut port = Port::new(
            DummyDriver::new(),
            DummyDevicePolicyManager::default(),
            DummyTypeC::new(attach),
            PortConfig::default(),
        );
        port.policy_engine().protocol_layer().driver().set_auto_ack(true);
        port
    }

    #[tokio::test]
    async fn silent_source_ends_in_error_recovery() {
        let mut port = port(Attach {
            power_role: PowerRole::Sink,
            vconn_source: false,
        });

        assert_eq!(port.run_session().await, SessionEnd::ErrorRecovery);
        assert_eq!(port.type_c.error_recoveries, 1);

        let device_policy_manager = port.policy_engine().device_policy_manager();
        assert!(device_policy_manager.notified(&Notification::ErrorRecovery));
        assert!(device_policy_manager.notified(&Notification::Detached));
    }

    #[tokio::test]
    async fn detach_ends_session() {
        let mut port = port(Attach {
            power_role: PowerRole::Source,
            vconn_source: true,
        });
        port.type_c.detach_immediately = true;

        assert_eq!(port.run_session().await, SessionEnd::Detached);
        assert_eq!(port.type_c.error_recoveries, 0);
        assert_eq!(port.policy_engine().power_role(), PowerRole::Source);
        assert!(!port.policy_engine().vconn_source());
        assert_eq!(port.policy_engine().protocol_layer().driver().vconn(), [true, false]);
        assert!(
            port.policy_engine()
                .device_policy_manager()
                .notified(&Notification::Detached)
        );
    }
}
