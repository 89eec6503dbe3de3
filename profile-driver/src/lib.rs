// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point. Re-exports everything `main.rs` and the
// integration tests need.

#[macro_use]
pub mod macros;

pub mod config;
pub mod connection;
pub mod device;
pub mod diagnostics;
pub mod irql;
pub mod queue;
pub mod replay;
pub mod router;

pub use connection::{AdmissionDecision, ConnectionAdmission, ConnectionContext, RejectReason};
pub use device::{DeviceLifetime, ServerContext};
pub use queue::{DeferredDispatch, ResourceError, SystemWorkQueue, WorkItem};
pub use router::IndicationRouter;
