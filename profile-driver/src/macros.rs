//! Structured logging for library code.
//!
//! `profile_log!(level, component, fmt, args..)` logs under `target:
//! component`, so per-component filters (`[logging.levels]`) apply, and
//! prefixes the message with [`line_prefix`]:
//!
//! ```text
//! [2025-04-25T16:32:10+02:00][DEBUG][queue][pid=4568][tid=ThreadId(3)] Work queue started
//! ```
//!
//! Arguments are not evaluated when the target is filtered out.

use std::{process, thread};

use chrono::Local;
use log::Level;

/// `[timestamp][LEVEL][component][pid=..][tid=..]`.
pub fn line_prefix(level: Level, component: &str) -> String {
    format!(
        "[{}][{}][{}][pid={}][tid={:?}]",
        Local::now().to_rfc3339(),
        level,
        component,
        process::id(),
        thread::current().id()
    )
}

#[macro_export]
macro_rules! profile_log {
    ($level:expr, $component:literal, $($arg:tt)+) => {{
        let level: log::Level = $level;
        if log::log_enabled!(target: $component, level) {
            log::log!(
                target: $component,
                level,
                "{} {}",
                $crate::macros::line_prefix(level, $component),
                format_args!($($arg)+)
            );
        }
    }};
}
