//! Connection admission and the state it produces.

pub mod admission;
pub mod context;
pub mod list;
pub mod policy;

pub use admission::{AdmissionDecision, ConnectionAdmission, L2capAdmission, RejectReason};
pub use context::ConnectionContext;
pub use list::{ClientConnection, ConnectionHandle, ConnectionList};
pub use policy::{AdmissionPolicy, DeviceType};
