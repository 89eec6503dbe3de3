//! Indications delivered by the L2CAP stack to a profile driver.
//!
//! `IndicationCode` says what happened, `IndicationParameters` carries the
//! details. The payload shape depends on the code, but the whole value is
//! `Copy`: a handler may keep it past the callback that delivered it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bluetooth::{BthAddr, ChannelHandle, Psm};

/// Kind of event the stack is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicationCode {
    AddReference,
    ReleaseReference,
    RemoteConnect,
    RemoteDisconnect,
    RemoteConfigRequest,
    RemoteConfigResponse,
    FreeExtraOptions,
}

impl IndicationCode {
    pub const ALL: [IndicationCode; 7] = [
        IndicationCode::AddReference,
        IndicationCode::ReleaseReference,
        IndicationCode::RemoteConnect,
        IndicationCode::RemoteDisconnect,
        IndicationCode::RemoteConfigRequest,
        IndicationCode::RemoteConfigResponse,
        IndicationCode::FreeExtraOptions,
    ];
}

impl fmt::Display for IndicationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters of a remote connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub psm: Psm,
    #[serde(default)]
    pub remote_cid: u16,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout: u16,
}

impl ConnectRequest {
    pub fn new(psm: Psm) -> Self {
        Self {
            psm,
            remote_cid: 0,
            mtu: default_mtu(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

fn default_mtu() -> u16 {
    crate::constants::L2CAP_DEFAULT_MTU
}

fn default_flush_timeout() -> u16 {
    crate::constants::L2CAP_FLUSH_INFINITE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    LocalHost,
    RemoteHost,
    HardwareRemoval,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectInfo {
    pub reason: DisconnectReason,
    #[serde(default)]
    pub close_now: bool,
}

/// Options carried by configuration requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOptions {
    pub mtu: u16,
    pub flush_timeout: u16,
}

/// Code-dependent part of the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicationPayload {
    Connect(ConnectRequest),
    Disconnect(DisconnectInfo),
    ConfigRequest(ConfigOptions),
    ConfigResponse(ConfigOptions),
    ReferenceCount { count: u32 },
    #[default]
    None,
}

/// Full parameter block of one indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicationParameters {
    #[serde(default)]
    pub connection_handle: ChannelHandle,
    pub bt_address: BthAddr,
    #[serde(default)]
    pub payload: IndicationPayload,
}

impl IndicationParameters {
    /// Parameters of a connect request for `psm` from `addr`.
    pub fn connect(addr: BthAddr, psm: Psm) -> Self {
        Self {
            connection_handle: ChannelHandle::default(),
            bt_address: addr,
            payload: IndicationPayload::Connect(ConnectRequest::new(psm)),
        }
    }

    /// Parameters of a disconnect on `handle`.
    pub fn disconnect(addr: BthAddr, handle: ChannelHandle, reason: DisconnectReason) -> Self {
        Self {
            connection_handle: handle,
            bt_address: addr,
            payload: IndicationPayload::Disconnect(DisconnectInfo { reason, close_now: false }),
        }
    }

    /// The connect request, if this is one.
    pub fn connect_request(&self) -> Option<&ConnectRequest> {
        match &self.payload {
            IndicationPayload::Connect(req) => Some(req),
            _ => None,
        }
    }

    /// Requested PSM, if this is a connect request.
    pub fn psm(&self) -> Option<Psm> {
        self.connect_request().map(|r| r.psm)
    }
}
