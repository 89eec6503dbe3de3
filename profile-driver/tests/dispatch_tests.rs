//! Integration tests for indication dispatch and deferral.
//!
//! These drive the router with the real `SystemWorkQueue` and check that:
//! - connect indications at PASSIVE_LEVEL are admitted inline, once,
//!   with the delivered parameters
//! - connect indications above PASSIVE_LEVEL are admitted once, later,
//!   on a worker at PASSIVE_LEVEL, with an identical snapshot
//! - submission failures drop exactly one indication and report it once
//! - the pass-through codes never reach admission or the queue
//! - a disconnect on the server callback takes the routing-violation path
//! - device teardown cancels deferred work that has not started

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    thread::{self, ThreadId},
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender, unbounded};

use bthps3::{
    connection::{AdmissionDecision, AdmissionPolicy, ConnectionAdmission, L2capAdmission, RejectReason},
    device::{DeviceLifetime, ServerContext},
    diagnostics::{DiagnosticEvent, DiagnosticKind, RecordingSink},
    irql::{self, Irql},
    queue::{ResourceError, SystemWorkQueue},
    router::IndicationRouter,
};
use shared::{BthAddr, ChannelHandle, IndicationCode, IndicationParameters, Psm, constants::SIXAXIS_NAME};

const WAIT: Duration = Duration::from_secs(5);

/*──────────────────────────── test doubles ──────────────────────────────*/

#[derive(Debug, Clone)]
struct Call {
    params:   IndicationParameters,
    irql:     Irql,
    thread:   ThreadId,
    decision: AdmissionDecision,
}

/// Wraps `L2capAdmission` and records every evaluation.
struct RecordingAdmission {
    calls:  Mutex<Vec<Call>>,
    notify: Sender<Call>,
}

impl RecordingAdmission {
    fn new() -> (Arc<Self>, Receiver<Call>) {
        let (notify, rx) = unbounded();
        (Arc::new(Self { calls: Mutex::new(Vec::new()), notify }), rx)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl ConnectionAdmission for RecordingAdmission {
    fn evaluate(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision {
        let decision = L2capAdmission.evaluate(server, params);
        let call = Call {
            params: *params,
            irql: irql::current_irql(),
            thread: thread::current().id(),
            decision,
        };
        self.calls.lock().unwrap().push(call.clone());
        let _ = self.notify.send(call);
        decision
    }
}

/// Blocks evaluations for `blocked` until the gate opens.
struct GatedAdmission {
    blocked: BthAddr,
    entered: Sender<BthAddr>,
    gate:    Receiver<()>,
    seen:    Mutex<Vec<BthAddr>>,
}

impl ConnectionAdmission for GatedAdmission {
    fn evaluate(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision {
        self.seen.lock().unwrap().push(params.bt_address);
        let _ = self.entered.send(params.bt_address);
        if params.bt_address == self.blocked {
            let _ = self.gate.recv_timeout(WAIT);
        }
        L2capAdmission.evaluate(server, params)
    }
}

/// Panics for every connect from `victim`, admits the rest.
struct FaultyAdmission {
    victim: BthAddr,
    done:   Sender<BthAddr>,
}

impl ConnectionAdmission for FaultyAdmission {
    fn evaluate(&self, server: &ServerContext, params: &IndicationParameters) -> AdmissionDecision {
        if params.bt_address == self.victim {
            panic!("admission fault for {}", params.bt_address);
        }
        let decision = L2capAdmission.evaluate(server, params);
        let _ = self.done.send(params.bt_address);
        decision
    }
}

struct Fixture {
    router: IndicationRouter,
    server: Arc<ServerContext>,
    queue:  Arc<SystemWorkQueue>,
    sink:   Arc<RecordingSink>,
}

fn fixture(admission: Arc<dyn ConnectionAdmission>, workers: usize, capacity: usize) -> Fixture {
    let queue = Arc::new(SystemWorkQueue::new(workers, capacity).unwrap());
    let sink = Arc::new(RecordingSink::new());
    let server = ServerContext::new(DeviceLifetime::new("test-device"), AdmissionPolicy::default());
    let router = IndicationRouter::new(admission, queue.clone(), sink.clone());
    Fixture { router, server, queue, sink }
}

fn sixaxis(server: &ServerContext, n: u64) -> BthAddr {
    let addr = BthAddr::new(0x001B_DC00_0000 + n);
    server.register_remote_name(addr, SIXAXIS_NAME);
    addr
}

fn connect(addr: BthAddr, psm: Psm, handle: u64) -> IndicationParameters {
    let mut p = IndicationParameters::connect(addr, psm);
    p.connection_handle = ChannelHandle(handle);
    p
}

/*──────────────────────────── properties ────────────────────────────────*/

#[test]
fn passive_connect_is_evaluated_once_inline() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 1, 8);
    let addr = sixaxis(&f.server, 1);
    let params = connect(addr, Psm::HID_CONTROL, 7);

    f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &params);

    // Already decided when dispatch returned, on this thread.
    let calls = adm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].params, params);
    assert_eq!(calls[0].irql, Irql::Passive);
    assert_eq!(calls[0].thread, thread::current().id());
    assert_eq!(f.sink.count(DiagnosticKind::DeferralTaken), 0);
    assert_eq!(f.queue.pending(), 0);
}

#[test]
fn elevated_connect_is_evaluated_once_on_a_worker() {
    let (adm, rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 2, 8);
    let addr = sixaxis(&f.server, 2);
    let params = connect(addr, Psm::HID_CONTROL, 9);

    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &params);
    }

    let call = rx.recv_timeout(WAIT).expect("deferred admission never ran");
    assert_eq!(call.params, params);
    assert_eq!(call.irql, Irql::Passive);
    assert_ne!(call.thread, thread::current().id());
    assert!(call.decision.is_accept());

    f.queue.shutdown();
    assert_eq!(adm.calls().len(), 1);
    assert_eq!(f.sink.count(DiagnosticKind::DeferralTaken), 1);
    assert_eq!(f.sink.count(DiagnosticKind::AdmissionAccepted), 1);
    assert_eq!(f.server.device().outstanding(), 0);
}

#[test]
fn every_elevated_connect_is_admitted_exactly_once() {
    let (adm, rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 4, 64);
    let addrs: Vec<_> = (10..42).map(|n| sixaxis(&f.server, n)).collect();

    {
        let _dpc = irql::raise(Irql::Device);
        for (i, a) in addrs.iter().enumerate() {
            f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(*a, Psm::HID_CONTROL, i as u64));
        }
    }
    for _ in &addrs {
        rx.recv_timeout(WAIT).expect("missing deferred admission");
    }
    f.queue.shutdown();

    let mut seen: Vec<_> = adm.calls().iter().map(|c| c.params.bt_address).collect();
    seen.sort();
    assert_eq!(seen, addrs);
    assert_eq!(f.server.connections().len(), addrs.len());
    assert_eq!(f.sink.count(DiagnosticKind::SubmissionFailed), 0);
}

#[test]
fn submission_failure_drops_one_and_reports_once() {
    let (adm, _rx) = RecordingAdmission::new();
    // No workers: the first item fills the queue and stays there.
    let f = fixture(adm.clone(), 0, 1);
    let first = connect(sixaxis(&f.server, 3), Psm::HID_CONTROL, 1);
    let second = connect(sixaxis(&f.server, 4), Psm::HID_CONTROL, 2);

    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &first);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &second);
    }

    let failures: Vec<_> = f
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind() == DiagnosticKind::SubmissionFailed)
        .collect();
    assert_eq!(
        failures,
        vec![DiagnosticEvent::SubmissionFailed {
            address: second.bt_address,
            error:   ResourceError::QueueFull { capacity: 1 },
        }]
    );
    assert!(adm.calls().is_empty());
    assert_eq!(f.queue.pending(), 1);
    assert_eq!(f.server.device().outstanding(), 1);

    f.queue.shutdown();
    assert!(adm.calls().is_empty());
    assert_eq!(f.server.device().outstanding(), 0);
}

#[test]
fn pass_through_codes_never_admit_or_enqueue() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 0, 4);
    let params = connect(sixaxis(&f.server, 5), Psm::HID_CONTROL, 1);

    let pass_through = [
        IndicationCode::AddReference,
        IndicationCode::ReleaseReference,
        IndicationCode::RemoteConfigRequest,
        IndicationCode::RemoteConfigResponse,
        IndicationCode::FreeExtraOptions,
    ];
    for level in [Irql::Passive, Irql::Dispatch] {
        let _g = irql::raise(level);
        for code in pass_through {
            f.router.dispatch(&f.server, code, &params);
        }
    }

    assert!(adm.calls().is_empty());
    assert_eq!(f.queue.pending(), 0);
    assert_eq!(f.server.device().outstanding(), 0);
    assert_eq!(f.sink.count(DiagnosticKind::IndicationReceived), 2 * pass_through.len());
    assert_eq!(f.sink.events().len(), 2 * pass_through.len());
}

#[test]
fn disconnect_on_server_callback_is_a_routing_violation() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 0, 4);
    let addr = sixaxis(&f.server, 6);
    let params = IndicationParameters::disconnect(addr, ChannelHandle(3), shared::DisconnectReason::RemoteHost);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        f.router.dispatch(&f.server, IndicationCode::RemoteDisconnect, &params);
    }));

    // Fatal in debug builds, logged and ignored in release.
    assert_eq!(outcome.is_err(), cfg!(debug_assertions));
    assert_eq!(f.sink.count(DiagnosticKind::RoutingViolation), 1);
    assert!(adm.calls().is_empty());
    assert_eq!(f.queue.pending(), 0);
}

/*──────────────────────────── scenarios ─────────────────────────────────*/

#[test]
fn supported_service_at_passive_is_accepted() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 1, 4);
    let params = connect(sixaxis(&f.server, 7), Psm(0x11), 1);

    f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &params);

    let AdmissionDecision::Accept(handle) = adm.calls()[0].decision else {
        panic!("expected Accept, got {:?}", adm.calls()[0].decision);
    };
    assert_eq!(f.server.connections().get(params.bt_address).unwrap().handle, handle);
}

#[test]
fn unsupported_service_at_passive_is_rejected() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 1, 4);
    let params = connect(sixaxis(&f.server, 8), Psm(0x99), 1);

    f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &params);

    assert_eq!(adm.calls()[0].decision, AdmissionDecision::Reject(RejectReason::UnsupportedService));
    assert_eq!(f.sink.count(DiagnosticKind::AdmissionRejected), 1);
    assert!(f.server.connections().is_empty());
}

#[test]
fn supported_service_above_threshold_is_accepted_via_deferral() {
    let (adm, rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 1, 4);
    let params = connect(sixaxis(&f.server, 9), Psm(0x11), 1);

    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &params);
    }

    let call = rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(call.decision, AdmissionDecision::Accept(_)));
    assert_eq!(f.sink.count(DiagnosticKind::DeferralTaken), 1);
}

#[test]
fn teardown_before_execution_releases_without_evaluating() {
    let blocked = BthAddr::new(0xB10C);
    let pending = BthAddr::new(0xFE17);
    let (entered_tx, entered_rx) = unbounded();
    let (gate_tx, gate_rx) = unbounded();
    let adm = Arc::new(GatedAdmission {
        blocked,
        entered: entered_tx,
        gate: gate_rx,
        seen: Mutex::new(Vec::new()),
    });
    let f = fixture(adm.clone(), 1, 4);

    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(blocked, Psm::HID_CONTROL, 1));
    }
    // The only worker is now parked inside admission for `blocked`.
    assert_eq!(entered_rx.recv_timeout(WAIT).unwrap(), blocked);
    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(pending, Psm::HID_CONTROL, 2));
    }
    assert_eq!(f.server.device().outstanding(), 2);

    let device = Arc::clone(f.server.device());
    let teardown = thread::spawn(move || device.teardown(WAIT));
    while !f.server.device().is_running_down() {
        thread::yield_now();
    }
    gate_tx.send(()).unwrap();

    teardown.join().unwrap().expect("teardown did not drain");
    assert_eq!(*adm.seen.lock().unwrap(), vec![blocked]);
    assert_eq!(f.sink.events().iter().filter(|e| matches!(e, DiagnosticEvent::DeferredCancelled { address } if *address == pending)).count(), 1);
    assert_eq!(f.server.device().outstanding(), 0);

    // New work for the removed device is refused up front.
    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(pending, Psm::HID_CONTROL, 3));
    }
    assert!(f.sink.events().contains(&DiagnosticEvent::SubmissionFailed {
        address: pending,
        error:   ResourceError::DeviceRemoved,
    }));
}

#[test]
fn control_then_deferred_interrupt_establishes_connection() {
    let (adm, rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 2, 8);
    let addr = sixaxis(&f.server, 11);

    f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(addr, Psm::HID_CONTROL, 1));
    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(addr, Psm::HID_INTERRUPT, 2));
    }
    rx.recv_timeout(WAIT).unwrap();
    let deferred = rx.recv_timeout(WAIT).unwrap();
    assert!(deferred.decision.is_accept());

    let conn = f.server.connections().get(addr).unwrap();
    assert!(conn.is_established());
    assert_eq!(conn.control, Some(ChannelHandle(1)));
    assert_eq!(conn.interrupt, Some(ChannelHandle(2)));

    let d = IndicationParameters::disconnect(addr, ChannelHandle(2), shared::DisconnectReason::RemoteHost);
    f.router.connection_indication(&f.server, IndicationCode::RemoteDisconnect, &d);
    assert!(f.server.connections().is_empty());
}

#[test]
fn panicking_deferred_admission_is_reported_and_contained() {
    let victim = BthAddr::new(0xBAD);
    let (done_tx, done_rx) = unbounded();
    let f = fixture(Arc::new(FaultyAdmission { victim, done: done_tx }), 1, 4);
    let healthy = sixaxis(&f.server, 12);

    {
        let _dpc = irql::raise(Irql::Dispatch);
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(victim, Psm::HID_CONTROL, 1));
        f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(healthy, Psm::HID_CONTROL, 2));
    }

    // The same worker survives and admits the next item.
    assert_eq!(done_rx.recv_timeout(WAIT).unwrap(), healthy);
    f.queue.shutdown();

    assert_eq!(
        f.sink.events().into_iter().filter(|e| e.kind() == DiagnosticKind::DeferredFailed).collect::<Vec<_>>(),
        vec![DiagnosticEvent::DeferredFailed { address: victim }]
    );
    assert!(f.server.connections().get(victim).is_none());
    assert!(f.server.connections().get(healthy).is_some());
    assert_eq!(f.server.device().outstanding(), 0);
}

#[test]
fn passive_connect_after_teardown_never_reaches_admission() {
    let (adm, _rx) = RecordingAdmission::new();
    let f = fixture(adm.clone(), 1, 4);
    let addr = sixaxis(&f.server, 13);
    f.server.device().teardown(WAIT).unwrap();

    f.router.dispatch(&f.server, IndicationCode::RemoteConnect, &connect(addr, Psm::HID_CONTROL, 1));

    assert!(adm.calls().is_empty());
    assert!(f.server.connections().is_empty());
    assert!(f.sink.events().contains(&DiagnosticEvent::AdmissionRejected {
        address: addr,
        psm:     Some(Psm::HID_CONTROL),
        reason:  RejectReason::DeviceRemoved,
    }));
}
