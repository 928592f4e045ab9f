//! netmond - telemetry daemon for the netmon monitoring platform.
//!
//! Wires the telemetry core: opens the shared store pool, bootstraps the
//! metrics schema, starts the event bus with its logging consumers and runs
//! the ingestion pipeline until a shutdown signal arrives, then drains.
//! Pollers and the HTTP layer attach through `registry::Runtime`.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use netmon_core::bus::{EventBus, EventReceivers, MonitorHealth, PluginFaultKind};
use netmon_core::config::TelemetryConfig;
use netmon_core::pipeline::MetricPipeline;
use netmon_core::registry::Runtime;
use netmon_core::store::{self, PgMetricStore};

/// Telemetry daemon.
#[derive(Parser)]
#[command(name = "netmond", about = "netmon telemetry daemon", version = netmon_core::VERSION)]
struct Args {
    /// PostgreSQL connection string for the metrics store.
    #[arg(
        long,
        default_value = "postgres://localhost:5432/netmon",
        env = "NETMON_DATABASE_URL"
    )]
    database_url: String,

    /// Maximum connections in the shared store pool.
    #[arg(long, default_value = "10", env = "NETMON_POOL_SIZE")]
    pool_size: u32,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("netmond={}", level).parse().unwrap())
        .add_directive(format!("netmon_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!("netmond {} starting", netmon_core::VERSION);

    let cfg = TelemetryConfig::from_env();
    info!(
        batch_size = cfg.pipeline.batch_size,
        flush_interval_ms = cfg.pipeline.flush_interval.as_millis() as u64,
        max_write_failures = cfg.pipeline.max_consecutive_failures,
        "telemetry config loaded"
    );

    let pool = match store::connect(&args.database_url, args.pool_size).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to metrics store");
            process::exit(1);
        }
    };
    if let Err(e) = store::ensure_schema(&pool).await {
        error!(error = %e, "failed to bootstrap metrics schema");
        process::exit(1);
    }
    info!(pool_size = args.pool_size, "metrics store ready");

    let (bus, receivers) = EventBus::new(&cfg.bus);
    let metric_store = Arc::new(PgMetricStore::new(pool.clone()));
    let (pipeline_handle, pipeline) = MetricPipeline::new(metric_store, cfg.pipeline.clone());

    let runtime = Runtime::new(bus, pipeline_handle, pool);

    let cancel = CancellationToken::new();
    spawn_event_loggers(receivers, cancel.clone());
    let pipeline_task = tokio::spawn(pipeline.run(cancel.clone()));

    info!("telemetry pipeline running, waiting for shutdown signal");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    cancel.cancel();
    if let Err(e) = pipeline_task.await {
        error!(error = %e, "pipeline task failed");
    }
    runtime.bus.shutdown();

    let stats = runtime.pipeline.stats();
    info!(
        submitted = stats.submitted,
        flushed_rows = stats.flushed_rows,
        flushes = stats.flushes,
        failed_flushes = stats.failed_flushes,
        dropped = stats.dropped,
        "shutdown complete"
    );
}

/// Spawns one logging consumer per event kind, draining its channel until
/// closure or cancellation. These are the bus's default observers; richer
/// consumers (cache invalidators, notifiers) attach the same way.
fn spawn_event_loggers(receivers: EventReceivers, cancel: CancellationToken) {
    let EventReceivers {
        discovery_request,
        discovery_status,
        device_validated,
        monitor_state,
        plugin_fault,
        cache_invalidate,
    } = receivers;

    spawn_logger(discovery_request, cancel.clone(), |ev| {
        info!(profile_id = %ev.profile_id, "discovery run started");
    });
    spawn_logger(discovery_status, cancel.clone(), |ev| {
        let duration = ev.completed_at.signed_duration_since(ev.started_at);
        info!(
            profile_id = %ev.profile_id,
            outcome = %ev.outcome,
            devices_found = ev.devices_found,
            duration_ms = duration.num_milliseconds(),
            "discovery run completed"
        );
    });
    spawn_logger(device_validated, cancel.clone(), |ev| {
        info!(
            ip = %ev.ip,
            port = ev.port,
            plugin_id = %ev.plugin_id,
            "device validated"
        );
    });
    spawn_logger(monitor_state, cancel.clone(), |ev| match ev.health {
        MonitorHealth::Down => warn!(
            monitor_id = %ev.monitor_id,
            ip = %ev.ip,
            failures = ev.failures,
            "monitor down"
        ),
        MonitorHealth::Recovered => info!(
            monitor_id = %ev.monitor_id,
            ip = %ev.ip,
            "monitor recovered"
        ),
    });
    spawn_logger(plugin_fault, cancel.clone(), |ev| match &ev.kind {
        PluginFaultKind::Timeout { limit } => warn!(
            plugin_id = %ev.plugin_id,
            monitor_id = %ev.monitor_id,
            timeout_ms = limit.as_millis() as u64,
            "plugin execution timed out"
        ),
        PluginFaultKind::Error { message } => warn!(
            plugin_id = %ev.plugin_id,
            monitor_id = %ev.monitor_id,
            error = %message,
            "plugin execution failed"
        ),
    });
    spawn_logger(cache_invalidate, cancel, |ev| {
        info!(entity = %ev.entity, entity_id = %ev.entity_id, "cache invalidated");
    });
}

fn spawn_logger<T, F>(mut rx: mpsc::Receiver<T>, cancel: CancellationToken, log: F)
where
    T: Send + 'static,
    F: Fn(&T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => log(&event),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    });
}
