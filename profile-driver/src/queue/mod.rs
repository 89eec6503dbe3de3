//! Deferred dispatch: work items parented to a device, and the queue
//! that runs them at PASSIVE_LEVEL.

pub mod work_item;
pub mod worker;

pub use work_item::{ResourceError, WorkItem, WorkItemCallback};
pub use worker::{DeferredDispatch, SystemWorkQueue};
