//! Device lifetime and rundown of the work that references it.
//!
//! Every deferred unit created for a device holds an [`OutstandingRef`]
//! until it is dropped. [`DeviceLifetime::teardown`] flips the device into
//! rundown, after which no new reference can be taken and units that have
//! not started yet are cancelled, then waits for the count to reach zero.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::Level;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("device '{device}' still has {outstanding} outstanding work item(s) after {waited:?}")]
    DrainTimeout {
        device:      String,
        outstanding: usize,
        waited:      Duration,
    },
}

#[derive(Debug, Default)]
struct RundownState {
    outstanding:  usize,
    running_down: bool,
}

/// Lifetime anchor of one device instance.
pub struct DeviceLifetime {
    name:    String,
    state:   Mutex<RundownState>,
    drained: Condvar,
}

impl fmt::Debug for DeviceLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("DeviceLifetime")
            .field("name", &self.name)
            .field("outstanding", &st.outstanding)
            .field("running_down", &st.running_down)
            .finish()
    }
}

impl DeviceLifetime {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name:    name.into(),
            state:   Mutex::new(RundownState::default()),
            drained: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, RundownState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference that keeps teardown waiting until it is dropped.
    /// `None` once rundown has started.
    pub fn acquire(self: &Arc<Self>) -> Option<OutstandingRef> {
        let mut st = self.lock();
        if st.running_down {
            return None;
        }
        st.outstanding += 1;
        Some(OutstandingRef { owner: Arc::clone(self) })
    }

    pub fn is_running_down(&self) -> bool {
        self.lock().running_down
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Start rundown and wait up to `timeout` for outstanding work to drain.
    ///
    /// Work already executing is allowed to finish; work not yet started is
    /// cancelled by its worker. Must not be called from a worker thread of a
    /// queue that holds items for this device.
    pub fn teardown(&self, timeout: Duration) -> Result<(), TeardownError> {
        let started = Instant::now();
        let mut st = self.lock();
        if !st.running_down {
            st.running_down = true;
            profile_log!(
                Level::Info,
                "device",
                "Device {} entering teardown with {} outstanding item(s)",
                self.name,
                st.outstanding
            );
        }

        let (st, _) = self
            .drained
            .wait_timeout_while(st, timeout, |s| s.outstanding > 0)
            .unwrap_or_else(PoisonError::into_inner);

        if st.outstanding > 0 {
            return Err(TeardownError::DrainTimeout {
                device:      self.name.clone(),
                outstanding: st.outstanding,
                waited:      started.elapsed(),
            });
        }
        profile_log!(Level::Debug, "device", "Device {} drained", self.name);
        Ok(())
    }

    /// Wait up to `timeout` until no unit holds a reference, without
    /// starting rundown. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let st = self.lock();
        let (st, _) = self
            .drained
            .wait_timeout_while(st, timeout, |s| s.outstanding > 0)
            .unwrap_or_else(PoisonError::into_inner);
        st.outstanding == 0
    }

    fn release(&self) {
        let mut st = self.lock();
        st.outstanding -= 1;
        if st.outstanding == 0 {
            self.drained.notify_all();
        }
    }
}

/// One unit of work's claim on a device. Released on drop.
#[derive(Debug)]
pub struct OutstandingRef {
    owner: Arc<DeviceLifetime>,
}

impl OutstandingRef {
    pub fn owner(&self) -> &Arc<DeviceLifetime> {
        &self.owner
    }

    /// Whether rundown had not yet started at the moment of the call. The
    /// answer is taken under the rundown lock but may be stale as soon as it
    /// returns; a unit that got `true` keeps teardown waiting until this
    /// reference drops.
    pub fn may_execute(&self) -> bool {
        !self.owner.lock().running_down
    }
}

impl Drop for OutstandingRef {
    fn drop(&mut self) {
        self.owner.release();
    }
}
