//! Bluetooth value types shared between the profile engine, the host and
//! any tooling that records or replays stack indications.
//!
//! Everything here is plain `Copy` data so it can cross an execution
//! context boundary by value.

pub mod bluetooth;
pub mod constants;
pub mod indication;

pub use bluetooth::{AddrParseError, BthAddr, ChannelHandle, Psm};
pub use indication::{
    ConfigOptions, ConnectRequest, DisconnectInfo, DisconnectReason, IndicationCode,
    IndicationParameters, IndicationPayload,
};
