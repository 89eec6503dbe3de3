//! Indication router
//! =================
//! Single entry point the L2CAP stack calls for every server-level
//! indication. Classifies the indication, checks the caller's IRQL and
//! either runs connection admission inline or defers it to the work queue.
//
//! Threading
//! ─────────
//!   • `dispatch` may be entered at any IRQL; it never blocks and never
//!     waits for deferred work.
//!   • Admission only ever runs at PASSIVE_LEVEL: inline when the caller
//!     already is there, otherwise on a queue worker.
//!   • Disconnects belong to the per-connection callback
//!     ([`IndicationRouter::connection_indication`]); seeing one here is a
//!     stack-side routing bug.

use std::sync::Arc;

use log::Level;
use shared::{BthAddr, IndicationCode, IndicationParameters};

use crate::{
    connection::{AdmissionDecision, ConnectionAdmission, ConnectionContext, RejectReason},
    device::ServerContext,
    diagnostics::{DiagnosticEvent, DiagnosticSink},
    irql,
    queue::{DeferredDispatch, WorkItem, WorkItemCallback},
};

/*──────────────────────────── public API ────────────────────────────────*/

pub struct IndicationRouter {
    queue:    Arc<dyn DeferredDispatch>,
    sink:     Arc<dyn DiagnosticSink>,
    handler:  Arc<RemoteConnectHandler>,
}

impl IndicationRouter {
    pub fn new(
        admission: Arc<dyn ConnectionAdmission>,
        queue: Arc<dyn DeferredDispatch>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let handler = Arc::new(RemoteConnectHandler { admission, sink: Arc::clone(&sink) });
        Self { queue, sink, handler }
    }

    /// Server indication callback.
    pub fn dispatch(
        &self,
        server: &Arc<ServerContext>,
        code: IndicationCode,
        params: &IndicationParameters,
    ) {
        self.sink.report(DiagnosticEvent::IndicationReceived { code, address: params.bt_address });

        match code {
            IndicationCode::AddReference | IndicationCode::ReleaseReference => {}

            IndicationCode::RemoteConnect => self.remote_connect(server, params),

            IndicationCode::RemoteDisconnect => {
                self.sink.report(DiagnosticEvent::RoutingViolation { code, address: params.bt_address });
                debug_assert!(
                    false,
                    "routing violation: {code} from {} delivered to the server callback",
                    params.bt_address
                );
            }

            IndicationCode::RemoteConfigRequest
            | IndicationCode::RemoteConfigResponse
            | IndicationCode::FreeExtraOptions => {}
        }
    }

    /// Per-connection indication callback, registered for every admitted
    /// channel. Handles disconnects; everything else is ignored.
    pub fn connection_indication(
        &self,
        server: &Arc<ServerContext>,
        code: IndicationCode,
        params: &IndicationParameters,
    ) {
        match code {
            IndicationCode::RemoteDisconnect => {
                let removed = server.connections().remove(params.bt_address);
                self.sink.report(DiagnosticEvent::Disconnected {
                    address: params.bt_address,
                    handle:  removed.map(|c| c.handle),
                });
            }
            _ => {
                profile_log!(
                    Level::Trace,
                    "dispatch",
                    "Connection indication {} from {} ignored",
                    code,
                    params.bt_address
                );
            }
        }
    }

    /*──────────────────────── private helpers ─────────────────────────*/

    fn remote_connect(&self, server: &Arc<ServerContext>, params: &IndicationParameters) {
        profile_log!(
            Level::Info,
            "dispatch",
            "New connection for PSM {} from {} arrived",
            params.psm().map_or_else(|| "-".to_string(), |p| p.to_string()),
            params.bt_address
        );

        if irql::current_priority_is_safe() {
            // Held across admission so teardown waits for it.
            let Some(_claim) = server.device().acquire() else {
                self.sink.report(DiagnosticEvent::AdmissionRejected {
                    address: params.bt_address,
                    psm:     params.psm(),
                    reason:  RejectReason::DeviceRemoved,
                });
                return;
            };
            self.handler.handle(server, params);
            return;
        }

        self.sink.report(DiagnosticEvent::DeferralTaken {
            address: params.bt_address,
            irql:    irql::current_irql(),
        });

        let context = ConnectionContext::capture(server, params);
        let submitted = WorkItem::create(server.device(), context, self.handler.clone())
            .and_then(|item| self.queue.submit(item));

        if let Err(error) = submitted {
            self.sink.report(DiagnosticEvent::SubmissionFailed { address: params.bt_address, error });
        }
    }
}

/*──────────────────────── remote connect handler ────────────────────────*/

/// Shared by the inline path and the deferred work item callback.
struct RemoteConnectHandler {
    admission: Arc<dyn ConnectionAdmission>,
    sink:      Arc<dyn DiagnosticSink>,
}

impl RemoteConnectHandler {
    fn handle(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision {
        let decision = self.admission.evaluate(server, params);
        let address = params.bt_address;
        let psm = params.psm();
        self.sink.report(match decision {
            AdmissionDecision::Accept(handle) => DiagnosticEvent::AdmissionAccepted { address, psm, handle },
            AdmissionDecision::Reject(reason) => DiagnosticEvent::AdmissionRejected { address, psm, reason },
        });
        decision
    }
}

impl WorkItemCallback for RemoteConnectHandler {
    fn run(&self, context: ConnectionContext) {
        let (server, params) = context.into_parts();
        self.handle(&server, &params);
    }

    fn cancelled(&self, context: ConnectionContext) {
        self.sink.report(DiagnosticEvent::DeferredCancelled { address: context.params().bt_address });
    }

    fn failed(&self, address: BthAddr) {
        self.sink.report(DiagnosticEvent::DeferredFailed { address });
    }
}
