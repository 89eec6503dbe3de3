//! Admission policy and peripheral classification.

use std::collections::BTreeSet;

use shared::{
    BthAddr, Psm,
    constants::{MOTION_NAME, NAVIGATION_NAME, SIXAXIS_NAME, WIRELESS_NAME},
};

/// Peripheral family, derived from the remote name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Sixaxis,
    Navigation,
    Motion,
    Wireless,
    Unknown,
}

impl DeviceType {
    /// Classify by remote name. Matching is exact, as the peripherals
    /// report fixed names.
    pub fn from_remote_name(name: Option<&str>) -> Self {
        match name {
            Some(SIXAXIS_NAME) => DeviceType::Sixaxis,
            Some(NAVIGATION_NAME) => DeviceType::Navigation,
            Some(MOTION_NAME) => DeviceType::Motion,
            Some(WIRELESS_NAME) => DeviceType::Wireless,
            _ => DeviceType::Unknown,
        }
    }
}

/// Read-only admission settings of one server.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// PSMs the server currently advertises.
    pub services: BTreeSet<Psm>,
    /// If non-empty, only these addresses may connect.
    pub allow: BTreeSet<BthAddr>,
    /// These addresses may never connect. Wins over `allow`.
    pub deny: BTreeSet<BthAddr>,
    pub sixaxis_enabled:    bool,
    pub navigation_enabled: bool,
    pub motion_enabled:     bool,
    pub wireless_enabled:   bool,
    pub allow_unknown_devices: bool,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            services: [Psm::HID_CONTROL, Psm::HID_INTERRUPT].into_iter().collect(),
            allow: BTreeSet::new(),
            deny: BTreeSet::new(),
            sixaxis_enabled: true,
            navigation_enabled: true,
            motion_enabled: true,
            wireless_enabled: true,
            allow_unknown_devices: true,
        }
    }
}

impl AdmissionPolicy {
    pub fn advertises(&self, psm: Psm) -> bool {
        self.services.contains(&psm)
    }

    pub fn address_permitted(&self, addr: BthAddr) -> bool {
        if self.deny.contains(&addr) {
            return false;
        }
        self.allow.is_empty() || self.allow.contains(&addr)
    }

    pub fn device_type_enabled(&self, ty: DeviceType) -> bool {
        match ty {
            DeviceType::Sixaxis => self.sixaxis_enabled,
            DeviceType::Navigation => self.navigation_enabled,
            DeviceType::Motion => self.motion_enabled,
            DeviceType::Wireless => self.wireless_enabled,
            DeviceType::Unknown => self.allow_unknown_devices,
        }
    }
}
