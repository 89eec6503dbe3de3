//! Per-device state: lifetime anchor and the server context every
//! indication for the device is delivered against.

pub mod lifetime;
pub mod server;

pub use lifetime::{DeviceLifetime, OutstandingRef, TeardownError};
pub use server::ServerContext;
