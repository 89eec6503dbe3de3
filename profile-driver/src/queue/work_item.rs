//! Deferred unit of work bound to a device's lifetime.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::Level;
use shared::BthAddr;
use thiserror::Error;

use crate::{
    connection::ConnectionContext,
    device::{DeviceLifetime, OutstandingRef},
    irql,
};

/// Why a unit could not be created or queued. The indication is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("work queue is full ({capacity} item(s) pending)")]
    QueueFull { capacity: usize },

    #[error("work queue has been stopped")]
    QueueStopped,

    #[error("device is being removed")]
    DeviceRemoved,
}

/// Code run by a worker for one [`WorkItem`].
pub trait WorkItemCallback: Send + Sync {
    /// Handle the payload at PASSIVE_LEVEL. The context is dropped when
    /// this returns.
    fn run(&self, context: ConnectionContext);

    /// The owning device started teardown before the unit ran. Only
    /// release the payload here.
    fn cancelled(&self, context: ConnectionContext) {
        drop(context);
    }

    /// [`run`](Self::run) panicked for the indication from `address`. The
    /// payload is already gone.
    fn failed(&self, _address: BthAddr) {}
}

/// One deferred execution: payload, callback and a claim on the device.
///
/// Dropping the item in any state releases the payload and then the claim,
/// so teardown of the owner cannot finish while the payload is alive.
pub struct WorkItem {
    context:  ConnectionContext,
    callback: Arc<dyn WorkItemCallback>,
    owner:    OutstandingRef,
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("device", &self.owner.owner().name())
            .field("params", self.context.params())
            .finish()
    }
}

impl WorkItem {
    /// Create a unit parented to `owner` and attach `context` to it.
    pub fn create(
        owner: &Arc<DeviceLifetime>,
        context: ConnectionContext,
        callback: Arc<dyn WorkItemCallback>,
    ) -> Result<Self, ResourceError> {
        let owner = owner.acquire().ok_or(ResourceError::DeviceRemoved)?;
        Ok(Self { context, callback, owner })
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn device(&self) -> &Arc<DeviceLifetime> {
        self.owner.owner()
    }

    /// Run the callback, or cancel if the owner is already running down.
    /// Called once, by a worker at PASSIVE_LEVEL.
    pub fn execute(self) {
        debug_assert!(
            irql::current_priority_is_safe(),
            "work item executed at {}",
            irql::current_irql()
        );
        let WorkItem { context, callback, owner } = self;
        if !owner.may_execute() {
            callback.cancelled(context);
            return;
        }

        let address = context.params().bt_address;
        if panic::catch_unwind(AssertUnwindSafe(|| callback.run(context))).is_err() {
            profile_log!(Level::Error, "queue", "Work item for {} panicked", address);
            callback.failed(address);
        }
        drop(owner);
    }

    /// Release without running.
    pub fn cancel(self) {
        let WorkItem { context, callback, owner } = self;
        callback.cancelled(context);
        drop(owner);
    }
}
