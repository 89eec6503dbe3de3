//! Accept or reject a remote L2CAP connect request.
//!
//! Runs at PASSIVE_LEVEL only; callers guarantee it. A rejection is a
//! normal outcome, reported as [`AdmissionDecision::Reject`].

use std::fmt;

use log::Level;
use shared::{IndicationParameters, Psm};

use crate::device::ServerContext;
use super::list::ConnectionHandle;
use super::policy::DeviceType;

/// Why a connect request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// PSM not advertised by this server.
    UnsupportedService,
    /// Address blocked by the allow/deny lists.
    PolicyDenied,
    /// Peripheral family switched off in the settings.
    DeviceTypeDisabled,
    /// Interrupt channel requested before the control channel.
    MissingControlChannel,
    /// The remote already holds the requested channel.
    AlreadyConnected,
    /// Parameters do not describe a connect request.
    MalformedRequest,
    /// The server's device is being torn down.
    DeviceRemoved,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept(ConnectionHandle),
    Reject(RejectReason),
}

impl AdmissionDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, AdmissionDecision::Accept(_))
    }
}

/// Decides whether a proposed connection is admitted.
pub trait ConnectionAdmission: Send + Sync {
    fn evaluate(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision;
}

/// Admission for the PS3 HID profile: control channel first, interrupt
/// channel second, both from the same remote.
#[derive(Debug, Default, Clone, Copy)]
pub struct L2capAdmission;

impl ConnectionAdmission for L2capAdmission {
    fn evaluate(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision {
        let Some(req) = params.connect_request() else {
            return AdmissionDecision::Reject(RejectReason::MalformedRequest);
        };
        let addr = params.bt_address;
        let policy = server.policy();

        if !policy.advertises(req.psm) {
            profile_log!(Level::Debug, "admission", "PSM {} from {} is not advertised", req.psm, addr);
            return AdmissionDecision::Reject(RejectReason::UnsupportedService);
        }
        if !policy.address_permitted(addr) {
            profile_log!(Level::Debug, "admission", "{} blocked by address policy", addr);
            return AdmissionDecision::Reject(RejectReason::PolicyDenied);
        }

        let conns = server.connections();
        let result = if req.psm == Psm::HID_INTERRUPT {
            conns.attach_interrupt(addr, params.connection_handle)
        } else {
            let name = server.remote_name(addr);
            let ty = DeviceType::from_remote_name(name.as_deref());
            if !policy.device_type_enabled(ty) {
                profile_log!(
                    Level::Debug,
                    "admission",
                    "{} ({:?}, name={:?}) disabled by settings",
                    addr,
                    ty,
                    name
                );
                return AdmissionDecision::Reject(RejectReason::DeviceTypeDisabled);
            }
            conns.open(addr, ty, params.connection_handle)
        };

        match result {
            Ok(handle) => AdmissionDecision::Accept(handle),
            Err(reason) => AdmissionDecision::Reject(reason),
        }
    }
}
