//! Execution priority of the calling thread.
//!
//! The stack may call into the profile from any interrupt request level.
//! Only at [`SAFE_IRQL`] or below may a handler block, allocate from paged
//! pool, or run for long; above it the work must be deferred.
//!
//! The level is tracked per thread. Entry points that model an elevated
//! context (the host replaying a trace, tests) use [`raise`], which restores
//! the previous level when its guard drops. Worker threads never raise.

use std::{cell::Cell, fmt, marker::PhantomData};

use serde::{Deserialize, Serialize};

/// Interrupt request level, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Irql {
    #[default]
    Passive,
    Apc,
    Dispatch,
    Device,
}

impl fmt::Display for Irql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Irql::Passive => "PASSIVE_LEVEL",
            Irql::Apc => "APC_LEVEL",
            Irql::Dispatch => "DISPATCH_LEVEL",
            Irql::Device => "DIRQL",
        })
    }
}

/// Highest level at which blocking waits and paged allocation are permitted.
pub const SAFE_IRQL: Irql = Irql::Passive;

thread_local! {
    static CURRENT: Cell<Irql> = const { Cell::new(Irql::Passive) };
}

/// Level of the calling thread.
pub fn current_irql() -> Irql {
    CURRENT.with(Cell::get)
}

/// True when the calling thread may handle work inline.
///
/// Reads the live level on every call.
pub fn current_priority_is_safe() -> bool {
    current_irql() <= SAFE_IRQL
}

/// Restores the previous level on drop. Not `Send`: the level belongs to
/// the thread that raised it.
#[must_use = "the level is lowered again as soon as the guard is dropped"]
pub struct IrqlGuard {
    previous: Irql,
    _not_send: PhantomData<*const ()>,
}

impl IrqlGuard {
    pub fn previous(&self) -> Irql {
        self.previous
    }
}

impl Drop for IrqlGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Raise the calling thread to `level`.
///
/// Raising to a lower level than the current one is a caller bug.
pub fn raise(level: Irql) -> IrqlGuard {
    let previous = current_irql();
    debug_assert!(
        level >= previous,
        "attempt to raise IRQL from {previous} down to {level}"
    );
    CURRENT.with(|c| c.set(level));
    IrqlGuard { previous, _not_send: PhantomData }
}
