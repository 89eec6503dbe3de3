//! Diagnostic events emitted by dispatch and admission.
//!
//! The engine only knows the [`DiagnosticSink`] trait. [`LogSink`] writes
//! structured log lines and bumps `metrics` counters; [`RecordingSink`]
//! keeps the events for the host summary and for tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use log::Level;
use metrics::counter;
use shared::{BthAddr, IndicationCode, Psm};

use crate::{
    connection::{ConnectionHandle, RejectReason},
    irql::Irql,
    queue::ResourceError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    IndicationReceived { code: IndicationCode, address: BthAddr },
    DeferralTaken { address: BthAddr, irql: Irql },
    SubmissionFailed { address: BthAddr, error: ResourceError },
    AdmissionAccepted { address: BthAddr, psm: Option<Psm>, handle: ConnectionHandle },
    AdmissionRejected { address: BthAddr, psm: Option<Psm>, reason: RejectReason },
    DeferredCancelled { address: BthAddr },
    DeferredFailed { address: BthAddr },
    RoutingViolation { code: IndicationCode, address: BthAddr },
    Disconnected { address: BthAddr, handle: Option<ConnectionHandle> },
}

/// Field-less tag of a [`DiagnosticEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    IndicationReceived,
    DeferralTaken,
    SubmissionFailed,
    AdmissionAccepted,
    AdmissionRejected,
    DeferredCancelled,
    DeferredFailed,
    RoutingViolation,
    Disconnected,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::IndicationReceived => "indication_received",
            DiagnosticKind::DeferralTaken => "deferral_taken",
            DiagnosticKind::SubmissionFailed => "submission_failed",
            DiagnosticKind::AdmissionAccepted => "admission_accepted",
            DiagnosticKind::AdmissionRejected => "admission_rejected",
            DiagnosticKind::DeferredCancelled => "deferred_cancelled",
            DiagnosticKind::DeferredFailed => "deferred_failed",
            DiagnosticKind::RoutingViolation => "routing_violation",
            DiagnosticKind::Disconnected => "disconnected",
        }
    }
}

impl DiagnosticEvent {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            DiagnosticEvent::IndicationReceived { .. } => DiagnosticKind::IndicationReceived,
            DiagnosticEvent::DeferralTaken { .. } => DiagnosticKind::DeferralTaken,
            DiagnosticEvent::SubmissionFailed { .. } => DiagnosticKind::SubmissionFailed,
            DiagnosticEvent::AdmissionAccepted { .. } => DiagnosticKind::AdmissionAccepted,
            DiagnosticEvent::AdmissionRejected { .. } => DiagnosticKind::AdmissionRejected,
            DiagnosticEvent::DeferredCancelled { .. } => DiagnosticKind::DeferredCancelled,
            DiagnosticEvent::DeferredFailed { .. } => DiagnosticKind::DeferredFailed,
            DiagnosticEvent::RoutingViolation { .. } => DiagnosticKind::RoutingViolation,
            DiagnosticEvent::Disconnected { .. } => DiagnosticKind::Disconnected,
        }
    }
}

/// Destination of diagnostic events. Must not block: it is called from
/// elevated IRQL on the dispatch path.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, event: DiagnosticEvent);
}

/*──────────────────────────── log + metrics ─────────────────────────────*/

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, event: DiagnosticEvent) {
        counter!("bthps3_diagnostic_events_total", "kind" => event.kind().as_str()).increment(1);

        match event {
            DiagnosticEvent::IndicationReceived { code, address } => {
                profile_log!(Level::Trace, "dispatch", "Indication {} from {}", code, address);
            }
            DiagnosticEvent::DeferralTaken { address, irql } => {
                profile_log!(
                    Level::Debug,
                    "dispatch",
                    "IRQL {} too high, deferring connect from {}",
                    irql,
                    address
                );
            }
            DiagnosticEvent::SubmissionFailed { address, error } => {
                profile_log!(
                    Level::Error,
                    "dispatch",
                    "Dropped connect from {}: work item submission failed: {}",
                    address,
                    error
                );
            }
            DiagnosticEvent::AdmissionAccepted { address, psm, handle } => {
                profile_log!(
                    Level::Info,
                    "admission",
                    "Accepted connection {} for PSM {} from {}",
                    handle,
                    psm_label(psm),
                    address
                );
            }
            DiagnosticEvent::AdmissionRejected { address, psm, reason } => {
                profile_log!(
                    Level::Warn,
                    "admission",
                    "Rejected PSM {} from {}: {}",
                    psm_label(psm),
                    address,
                    reason
                );
            }
            DiagnosticEvent::DeferredCancelled { address } => {
                profile_log!(
                    Level::Info,
                    "dispatch",
                    "Deferred connect from {} cancelled by device teardown",
                    address
                );
            }
            DiagnosticEvent::DeferredFailed { address } => {
                profile_log!(
                    Level::Error,
                    "dispatch",
                    "Deferred connect from {} aborted: admission panicked",
                    address
                );
            }
            DiagnosticEvent::RoutingViolation { code, address } => {
                profile_log!(
                    Level::Error,
                    "dispatch",
                    "Routing violation: {} from {} reached the unified indication callback",
                    code,
                    address
                );
            }
            DiagnosticEvent::Disconnected { address, handle } => {
                profile_log!(
                    Level::Info,
                    "connection",
                    "{} disconnected (connection {:?})",
                    address,
                    handle
                );
            }
        }
    }
}

fn psm_label(psm: Option<Psm>) -> String {
    psm.map_or_else(|| "-".into(), |p| p.to_string())
}

/*──────────────────────────── in-memory ─────────────────────────────────*/

/// Keeps every reported event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Event counts per kind, for summaries.
    pub fn tally(&self) -> BTreeMap<DiagnosticKind, usize> {
        let mut out = BTreeMap::new();
        for e in self.events.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            *out.entry(e.kind()).or_insert(0) += 1;
        }
        out
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, event: DiagnosticEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/*──────────────────────────── fan-out ───────────────────────────────────*/

/// Forwards each event to every inner sink.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticSink for FanoutSink {
    fn report(&self, event: DiagnosticEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for s in rest {
                s.report(event.clone());
            }
            last.report(event);
        }
    }
}
