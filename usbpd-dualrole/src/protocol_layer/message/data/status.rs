//! Alert, battery status and country code data objects.
use proc_bitfield::bitfield;

bitfield! {
    /// Alert data object, sent by either port to report a change of status.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AlertDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Type of alert, one bit per event.
        pub type_of_alert: u8 @ 24..=31,
        pub extended_alert_event: bool @ 31,
        pub ovp_event: bool @ 30,
        pub source_input_change: bool @ 29,
        pub operating_condition_change: bool @ 28,
        pub otp_event: bool @ 27,
        pub ocp_event: bool @ 26,
        pub battery_status_change: bool @ 25,
        /// Fixed batteries whose status changed, one bit per battery.
        pub fixed_batteries: u8 @ 20..=23,
        /// Hot swappable batteries whose status changed, one bit per battery.
        pub hot_swappable_batteries: u8 @ 16..=19,
        pub extended_alert_event_type: u8 @ 0..=3,
    }
}

bitfield! {
    /// Battery status data object.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BatteryStatusDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Present capacity in 100 mWh units, 0xFFFF if unknown.
        pub raw_present_capacity: u16 @ 16..=31,
        pub invalid_battery_reference: bool @ 8,
        pub battery_present: bool @ 9,
        /// Charging status (00b charging, 01b discharging, 10b idle).
        pub charging_status: u8 @ 10..=11,
    }
}

impl BatteryStatusDataObject {
    /// Status for a battery reference that does not exist.
    pub fn invalid_reference() -> Self {
        Self(0).with_raw_present_capacity(0xFFFF).with_invalid_battery_reference(true)
    }
}

bitfield! {
    /// Country code data object, sent in Get_Country_Info.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CountryCodeDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Two ASCII characters, first character in the upper byte.
        pub country_code: u16 @ 16..=31,
    }
}
