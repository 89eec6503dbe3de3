//! Replay of recorded stack indications.
//!
//! One JSON object per line:
//!
//! ```text
//! {"code":"RemoteConnect","irql":"Dispatch","params":{"bt_address":"001BDC000001","payload":{"kind":"connect","psm":17}}}
//! {"code":"RemoteDisconnect","callback":"connection","params":{"bt_address":"001BDC000001","payload":{"kind":"disconnect","reason":"RemoteHost"}}}
//! ```
//!
//! Each record is delivered at its recorded IRQL (default PASSIVE_LEVEL)
//! to the server callback, or to the per-connection callback when
//! `callback` is `"connection"`. Blank lines and lines starting with `#`
//! are skipped.
//!
//! The stack only delivers per-connection indications for a channel it has
//! already answered, so before a `"connection"` record the replay waits for
//! the device's deferred admissions to finish.

use std::{
    collections::BTreeMap,
    io::{self, BufRead},
    sync::Arc,
    time::Duration,
};

use log::Level;
use serde::{Deserialize, Serialize};
use shared::{IndicationCode, IndicationParameters};
use thiserror::Error;

use crate::{
    device::ServerContext,
    irql::{self, Irql},
    router::IndicationRouter,
};

/// Longest wait for deferred work before a per-connection record.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    #[default]
    Server,
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub code:     IndicationCode,
    #[serde(default)]
    pub irql:     Irql,
    #[serde(default)]
    pub callback: CallbackKind,
    pub params:   IndicationParameters,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub delivered: usize,
    pub per_irql:  BTreeMap<Irql, usize>,
}

/// Parse every record first, then deliver them in order. A malformed line
/// aborts before anything is delivered.
pub fn replay<R: BufRead>(
    router: &IndicationRouter,
    server: &Arc<ServerContext>,
    reader: R,
) -> Result<ReplayStats, ReplayError> {
    let records = read_records(reader)?;
    let mut stats = ReplayStats::default();

    for rec in &records {
        if rec.callback == CallbackKind::Connection && !server.device().wait_idle(SETTLE_TIMEOUT) {
            profile_log!(
                Level::Warn,
                "replay",
                "Deferred work still pending after {:?}, delivering {} from {} anyway",
                SETTLE_TIMEOUT,
                rec.code,
                rec.params.bt_address
            );
        }
        let _level = irql::raise(rec.irql);
        match rec.callback {
            CallbackKind::Server => router.dispatch(server, rec.code, &rec.params),
            CallbackKind::Connection => router.connection_indication(server, rec.code, &rec.params),
        }
        stats.delivered += 1;
        *stats.per_irql.entry(rec.irql).or_insert(0) += 1;
    }

    profile_log!(Level::Info, "replay", "Replayed {} indication(s)", stats.delivered);
    Ok(stats)
}

pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<ReplayRecord>, ReplayError> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let rec = serde_json::from_str(trimmed)
            .map_err(|source| ReplayError::Parse { line: idx + 1, source })?;
        out.push(rec);
    }
    Ok(out)
}
