// src/main.rs

//! Host entry-point: drives the profile engine the way the Bluetooth stack
//! would, from a recorded indication trace.
//!
//! 1. Load configuration & set up structured logging
//! 2. Optionally start the Prometheus exporter
//! 3. Start the system work queue, build the server context and router
//! 4. Replay the indication trace (if one is given)
//! 5. Drain the queue, tear the device down, print a summary
//!
//! Usage: `bthps3-host [config.toml] [trace.jsonl]`

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, Result};
use chrono::Local;
use fern::Dispatch;
use log::Level;
use std::{
    fs::File,
    io::BufReader,
    net::SocketAddr,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

// ───── local imports ────────────────────────────────────────────────────────
use bthps3::{
    config::{self, Config, model::LoggingConfig},
    connection::L2capAdmission,
    device::{DeviceLifetime, ServerContext},
    diagnostics::{DiagnosticSink, FanoutSink, LogSink, RecordingSink},
    macros::line_prefix,
    profile_log,
    queue::SystemWorkQueue,
    replay,
    router::IndicationRouter,
};

const DEVICE_NAME: &str = "BthPS3";

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// Route records to stdout (and the log file when enabled), filtered by the
/// global level and the per-component overrides of `[logging.levels]`.
fn setup_logging(exe_dir: &Path, logging: &LoggingConfig) -> Result<(), fern::InitError> {
    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            // `profile_log!` lines arrive prefixed; other crates' do not.
            if record.target().contains("::") {
                out.finish(format_args!("{} {}", line_prefix(record.level(), record.target()), msg))
            } else {
                out.finish(format_args!("{msg}"))
            }
        })
        .level(logging.level_filter());

    for (component, filter) in logging.component_filters() {
        dispatch = dispatch.level_for(component.to_owned(), filter);
    }
    dispatch = dispatch.chain(std::io::stdout());

    if logging.enable {
        let path = exe_dir.join(logging.file.as_deref().unwrap_or("bthps3.log"));
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Expose counters on `listen` for Prometheus scraping.
fn install_metrics(listen: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("failed to start Prometheus exporter")?;
    profile_log!(Level::Info, "host", "Metrics exported on {}", listen);
    Ok(())
}

/// Server context seeded with the configured remote names.
fn build_server(cfg: &Config) -> Arc<ServerContext> {
    let device = DeviceLifetime::new(DEVICE_NAME);
    let server = ServerContext::new(device, cfg.admission.clone());
    for known in &cfg.devices {
        server.register_remote_name(known.address, known.name.clone());
    }
    server
}

// ───── host logic ───────────────────────────────────────────────────────────

fn run() -> Result<()> {
    // 1 ─ Context
    let exe_dir = exe_dir()?;
    let mut args = std::env::args_os().skip(1);
    let cfg_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| exe_dir.join("bthps3.toml"));
    let trace_path = args.next().map(PathBuf::from);

    let cfg = config::load(&cfg_path)
        .with_context(|| format!("loading configuration from {}", cfg_path.display()))?;

    // 2 ─ Logging & metrics
    setup_logging(&exe_dir, &cfg.logging).context("logging setup failed")?;
    profile_log!(Level::Info, "host", "Host bootstrap initiated");
    if let (true, Some(listen)) = (cfg.metrics.enable, cfg.metrics.listen) {
        install_metrics(listen)?;
    }

    // 3 ─ Engine
    let queue = Arc::new(
        SystemWorkQueue::new(cfg.queue.workers, cfg.queue.capacity)
            .context("failed to start work queue")?,
    );
    let server = build_server(&cfg);
    let recorder = Arc::new(RecordingSink::new());
    let sinks: Vec<Arc<dyn DiagnosticSink>> = vec![Arc::new(LogSink), recorder.clone()];
    let router = IndicationRouter::new(
        Arc::new(L2capAdmission),
        queue.clone(),
        Arc::new(FanoutSink::new(sinks)),
    );

    // 4 ─ Replay
    match &trace_path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening trace {}", path.display()))?;
            let stats = replay::replay(&router, &server, BufReader::new(file))
                .with_context(|| format!("replaying {}", path.display()))?;
            profile_log!(Level::Info, "host", "Delivered per IRQL: {:?}", stats.per_irql);
        }
        None => profile_log!(Level::Warn, "host", "No trace given, nothing to dispatch"),
    }

    // 5 ─ Shutdown: finish queued admissions, then run the device down.
    queue.shutdown();
    if let Err(e) = server.device().teardown(cfg.queue.drain_timeout) {
        profile_log!(Level::Error, "host", "{}", e);
    }

    for conn in server.connections().snapshot() {
        profile_log!(
            Level::Info,
            "host",
            "Connection {} {} {:?} established={}",
            conn.handle,
            conn.address,
            conn.device_type,
            conn.is_established()
        );
    }
    for (kind, n) in recorder.tally() {
        profile_log!(Level::Info, "host", "{:<20} {}", kind.as_str(), n);
    }
    profile_log!(Level::Info, "host", "Host stopped cleanly");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("[{}][ERROR][host] {:#}", Local::now().to_rfc3339(), e);
        process::exit(1);
    }
}
