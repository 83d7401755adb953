//! PD 3.0 information exchange, alerts and BIST.
use super::*;
use crate::protocol_layer::message::data::status::CountryCodeDataObject;
use crate::protocol_layer::message::extended::ExtendedPayload;

impl<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> PolicyEngine<DRIVER, TIMER, DPM> {
    async fn transmit_info_request(&mut self, request: &InfoRequest) -> Result<(), ProtocolError> {
        let control = match request {
            InfoRequest::SourceCapabilitiesExtended => Some(ControlMessageType::GetSourceCapExtended),
            InfoRequest::Status => Some(ControlMessageType::GetStatus),
            InfoRequest::PpsStatus => Some(ControlMessageType::GetPpsStatus),
            InfoRequest::CountryCodes => Some(ControlMessageType::GetCountryCodes),
            _ => None,
        };
        if let Some(message_type) = control {
            return self.protocol_layer.transmit_control_message(message_type).await;
        }

        let (message_type, payload) = match request {
            InfoRequest::CountryInfo(country_code) => {
                let object = CountryCodeDataObject::default().with_country_code(*country_code);
                return self
                    .protocol_layer
                    .transmit_data_message(Data::GetCountryInfo(object))
                    .await;
            }
            InfoRequest::BatteryCapabilities(battery) => {
                (ExtendedMessageType::GetBatteryCap, ExtendedPayload::new(&[*battery]))
            }
            InfoRequest::BatteryStatus(battery) => {
                (ExtendedMessageType::GetBatteryStatus, ExtendedPayload::new(&[*battery]))
            }
            InfoRequest::ManufacturerInfo { target, reference } => (
                ExtendedMessageType::GetManufacturerInfo,
                ExtendedPayload::new(&[*target, *reference]),
            ),
            InfoRequest::Security(data) => (
                ExtendedMessageType::SecurityRequest,
                Ok(ExtendedPayload::from_data(data.clone())),
            ),
            InfoRequest::FirmwareUpdate(data) => (
                ExtendedMessageType::FirmwareUpdateRequest,
                Ok(ExtendedPayload::from_data(data.clone())),
            ),
            InfoRequest::SourceCapabilitiesExtended
            | InfoRequest::Status
            | InfoRequest::PpsStatus
            | InfoRequest::CountryCodes => return Ok(()),
        };

        let payload = payload.map_err(RxError::from)?;
        self.protocol_layer.transmit_extended_message(message_type, payload).await
    }

    pub(super) async fn update_info_state(&mut self, state: &InfoState) -> Result<State, Error> {
        match state {
            InfoState::Request(request) => {
                self.transmit_info_request(request).await?;

                let Some(message) = self.wait_message(TimerId::SenderResponse).await? else {
                    warn!("No answer to {:?}", request);
                    return Ok(self.ready_state());
                };

                if message.is_control(ControlMessageType::NotSupported) {
                    self.notify(Notification::NotSupported).await;
                    return Ok(self.ready_state());
                }

                if let (InfoRequest::BatteryStatus(_), Some(Data::BatteryStatus(status))) = (request, message.data()) {
                    self.notify(Notification::BatteryStatusReceived(*status)).await;
                    return Ok(self.ready_state());
                }

                match (message.message_type(), message.extended()) {
                    (MessageType::Extended(message_type), Some(payload))
                        if request.response_type() == Some(message_type) =>
                    {
                        let data = payload.data.clone();
                        self.notify(Notification::InfoReceived { message_type, data }).await;
                    }
                    _ => return self.handle_ready_message(message).await,
                }

                Ok(self.ready_state())
            }
            InfoState::Respond(request) => {
                if let InfoRequest::BatteryStatus(battery) = request {
                    let status = self.device_policy_manager.battery_status(*battery).await;
                    self.protocol_layer
                        .transmit_data_message(Data::BatteryStatus(status))
                        .await?;
                    return Ok(self.ready_state());
                }

                let response = match request.response_type() {
                    Some(message_type) => self
                        .device_policy_manager
                        .provide_info(request)
                        .await
                        .map(|data| (message_type, data)),
                    None => None,
                };

                match response {
                    Some((message_type, data)) => {
                        self.protocol_layer
                            .transmit_extended_message(message_type, ExtendedPayload::from_data(data))
                            .await?;
                        Ok(self.ready_state())
                    }
                    None => {
                        debug!("{:?} is not supported", request);
                        self.send_not_supported().await
                    }
                }
            }
            InfoState::SendAlert(alert) => {
                self.protocol_layer
                    .transmit_data_message(Data::Alert(*alert))
                    .await?;
                Ok(self.ready_state())
            }
            InfoState::AlertReceived(alert) => {
                debug!("Alert {:?}", alert);
                self.notify(Notification::AlertReceived(*alert)).await;
                Ok(self.ready_state())
            }
        }
    }

    pub(super) async fn update_bist_state(&mut self, state: BistState) -> Result<State, Error> {
        match state {
            BistState::CarrierMode => {
                info!("BIST carrier mode");
                self.protocol_layer.driver().transmit_bist_carrier().await;
                self.wait_timer(TimerId::BistContMode).await?;
                Ok(self.ready_state())
            }
            BistState::TestData => {
                // Test frames are acknowledged by the protocol layer and dropped. Only a hard reset ends this mode.
                loop {
                    if let PeEvent::Message(message) = self.wait_event(false).await? {
                        trace!("BIST test data {:?}", message.message_type());
                    }
                }
            }
        }
    }
}
