//! Process entry point: parses CLI flags, builds a `CoreConfig`, and drives
//! the per-sensor pipeline (ingest -> forward/frame-build -> orchestrator ->
//! admin server/persistence) to completion on SIGINT/SIGTERM (§5, §7).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lidar_core::decoder::{NullDecoder, Pandar40PDecoder, PacketDecoder};
use lidar_core::forwarder::ForwardHandle;
use lidar_core::frame_builder::FrameBuilder;
use lidar_core::pipeline::{Persistence, PipelineOrchestrator, Publisher};
use lidar_core::stats::{ForwardStats, FrameBuilderStats, IngestStats};
use lidar_core::{forwarder, frame_builder, ingest};
use lidar_persistence::SqlitePersistence;
use lidar_types::{CoreConfig, Result, RuntimeParams, SensorId, SensorPose};

const INGEST_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "lidar-core-run", about = "LiDAR real-time perception core")]
struct Args {
    /// Sensor identifier tagged onto every frame bundle and persisted row.
    #[arg(long, default_value = "sensor-0")]
    sensor_id: String,

    /// Admin/control HTTP listen address; omit to run with no admin server.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Inbound sensor UDP port.
    #[arg(long, default_value_t = 2369)]
    udp_port: u16,

    /// Inbound sensor UDP bind address.
    #[arg(long, default_value = "0.0.0.0")]
    udp_addr: IpAddr,

    /// SQLite path for persisted tracks/observations; omit to disable.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Requested UDP socket receive buffer size in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    rcvbuf: usize,

    /// Interval between periodic stats log lines, in seconds.
    #[arg(long, default_value_t = 10)]
    log_interval: u64,

    /// Enable best-effort raw packet forwarding to a secondary consumer.
    #[arg(long, default_value_t = false)]
    forward: bool,

    /// Forwarding destination port (with `--forward`).
    #[arg(long, default_value_t = 2369)]
    forward_port: u16,

    /// Forwarding destination address (with `--forward`).
    #[arg(long, default_value = "127.0.0.1")]
    forward_addr: IpAddr,

    /// Skip wire decoding and run on an all-points-dropped decoder; used to
    /// measure ingest overhead in isolation.
    #[arg(long, default_value_t = false)]
    no_parse: bool,

    /// Optional TOML config file overriding runtime tracking/clustering
    /// parameters; CLI flags above always govern ingest/admin/persistence.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_core_config(self) -> CoreConfig {
        CoreConfig {
            sensor_id: SensorId(self.sensor_id),
            udp_addr: self.udp_addr,
            udp_port: self.udp_port,
            rcvbuf_bytes: self.rcvbuf,
            forward: self.forward.then_some(SocketAddr::new(self.forward_addr, self.forward_port)),
            forward_queue_capacity: 1024,
            admin_addr: self.listen.unwrap_or_else(|| "127.0.0.1:8765".parse().unwrap()),
            db_path: self.db,
            log_interval_secs: self.log_interval,
            no_parse: self.no_parse,
            sensor_pose: SensorPose::default(),
            replay_dir: None,
        }
    }
}

fn load_runtime_params(config_path: Option<&PathBuf>) -> Result<RuntimeParams> {
    let Some(path) = config_path else {
        return Ok(RuntimeParams::default());
    };
    let raw = std::fs::read_to_string(path)?;
    let expanded = shellexpand::full(&raw)
        .map_err(|e| lidar_types::Error::ConfigInvalid(format!("expanding {}: {e}", path.display())))?;
    let params: RuntimeParams = toml::from_str(expanded.as_ref())?;
    Ok(params)
}

fn main() {
    let _logger_guard = env_tracing_logger::init();
    let args = Args::parse();

    let runtime_params = match load_runtime_params(args.config.as_ref()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let core_config = args.into_core_config();
    if let Err(e) = core_config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }
    if let Err(e) = runtime_params.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lidar-core-worker")
        .build()
        .expect("building tokio runtime");

    let result = runtime.block_on(run(core_config, runtime_params));

    match result {
        Ok(()) => {
            info!("shut down cleanly");
        }
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run(config: CoreConfig, initial_params: RuntimeParams) -> Result<()> {
    let cancel = CancellationToken::new();
    let sensor_id = config.sensor_id.clone();
    let params = Arc::new(RwLock::new(initial_params));

    let udp_addr = SocketAddr::new(config.udp_addr, config.udp_port);
    let socket = ingest::bind(udp_addr, config.rcvbuf_bytes).await?;
    info!(addr = %udp_addr, "ingest socket bound");

    let ingest_stats = Arc::new(IngestStats::default());
    let forward_stats = Arc::new(ForwardStats::default());
    let frame_builder_stats = Arc::new(FrameBuilderStats::default());

    let forward_handle = if let Some(dest) = config.forward {
        let forward_socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        let (fwd_tx, fwd_rx) = tokio::sync::mpsc::channel(config.forward_queue_capacity);
        let task_stats = forward_stats.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(forwarder::run(forward_socket, dest, fwd_rx, task_stats, task_cancel));
        ForwardHandle::enabled(fwd_tx, forward_stats.clone())
    } else {
        ForwardHandle::disabled(forward_stats.clone())
    };

    let decoder: Box<dyn PacketDecoder> = if config.no_parse {
        Box::new(NullDecoder)
    } else {
        Box::new(Pandar40PDecoder::new())
    };

    let (points_tx, points_rx) = tokio::sync::mpsc::channel(INGEST_CHANNEL_CAPACITY);
    let ingest_cancel = cancel.clone();
    let ingest_stats_task = ingest_stats.clone();
    tokio::spawn(ingest::run(socket, decoder, forward_handle, points_tx, ingest_stats_task, ingest_cancel));

    let (frame_tx, frame_rx) = tokio::sync::watch::channel(None);
    let builder = FrameBuilder::new(sensor_id.clone(), frame_builder_stats.clone());
    let frame_builder_cancel = cancel.clone();
    tokio::spawn(frame_builder::run(builder, points_rx, frame_tx, params.clone(), frame_builder_cancel));

    let persistence: Option<Arc<dyn Persistence>> = match &config.db_path {
        Some(db_path) => {
            let (backend, _join) = SqlitePersistence::open(db_path)?;
            Some(Arc::new(backend))
        }
        None => None,
    };

    let rt_handle = tokio::runtime::Handle::current();
    let (publisher, broadcaster) = lidar_server::sse_publisher(rt_handle);
    let publisher: Arc<dyn Publisher> = publisher;

    let (orchestrator, pipeline_join) = PipelineOrchestrator::spawn(
        sensor_id.clone(),
        config.sensor_pose,
        params.clone(),
        frame_rx,
        persistence,
        Some(publisher),
        cancel.clone(),
    );
    let handle = orchestrator.handle();

    let server_cancel = cancel.clone();
    let server_config = lidar_server::ServerConfig {
        addr: config.admin_addr,
        sensor_id: sensor_id.to_string(),
        db_path: config.db_path.clone(),
        control: None,
    };
    let server_join = tokio::spawn(async move {
        if let Err(e) = lidar_server::serve(server_config, handle, broadcaster, server_cancel).await {
            error!(error = %e, "admin server exited with error");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, cancelling tasks");
    cancel.cancel();

    let deadline = std::time::Duration::from_secs_f64(params.read().pipeline.shutdown_deadline_secs);
    let _ = tokio::time::timeout(deadline, pipeline_join).await;
    let _ = tokio::time::timeout(deadline, server_join).await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
