//! Recording server binary entry point
//!
//! Runs the websocket signaling server (one session per connection, each
//! negotiating a camera and a screen leg) next to the HTTP server that
//! serves the recordings directory.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: signaling on :9001, HTTP on :9000, RTP on UDP 9002-9100
//! cargo run -p castrec-recording-server
//!
//! # Behind NAT, with a custom port range and recordings directory
//! PUBLIC_IP=203.0.113.10 RTC_PORTS_BEGIN=40000 RTC_PORTS_END=40100 \
//!   cargo run -p castrec-recording-server -- --recordings-dir /var/lib/castrec
//!
//! # JSON logs
//! RUST_LOG=castrec_webrtc=debug cargo run -p castrec-recording-server -- --log-json
//! ```

use anyhow::Context;
use castrec_http::HttpServer;
use castrec_webrtc::{
    Capabilities, EngineConfig, MediaEngine, RtcEngineConfig, RtcMediaEngine, SessionRegistry,
    SignalingServerConfig, WebSocketSignalingServer,
};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time allowed for graceful shutdown after Ctrl+C before forcing exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Castrec recording server
///
/// Accepts dual-leg (camera + screen) WebRTC sessions over websocket
/// signaling and records each leg to an rtpdump file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address both servers bind to
    #[arg(long, default_value = "0.0.0.0", env = "BIND_HOST")]
    bind_host: IpAddr,

    /// Websocket signaling port
    #[arg(long, default_value_t = 9001, env = "WEBSOCKETS_PORT")]
    websockets_port: u16,

    /// HTTP port (ping and recording retrieval)
    #[arg(long, default_value_t = 9000, env = "PORT")]
    port: u16,

    /// First UDP port for media transports
    #[arg(long, default_value_t = 9002, env = "RTC_PORTS_BEGIN")]
    rtc_ports_begin: u16,

    /// Last UDP port for media transports
    #[arg(long, default_value_t = 9100, env = "RTC_PORTS_END")]
    rtc_ports_end: u16,

    /// IP announced in ICE candidates
    #[arg(long, default_value = "127.0.0.1", env = "PUBLIC_IP")]
    public_ip: IpAddr,

    /// Directory recordings are written to
    #[arg(long, default_value = "./recordings", env = "RECORDINGS_DIR")]
    recordings_dir: PathBuf,

    /// Delay between stopping recorders and announcing the manifest
    #[arg(long, default_value_t = 1000, env = "SETTLE_DELAY_MS")]
    settle_delay_ms: u64,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, default_value_t = 100, env = "MAX_SESSIONS")]
    max_sessions: usize,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "LOG_JSON")]
    log_json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(1);
        }
        eprintln!("\nCtrl+C received, shutting down...");

        std::thread::spawn(|| {
            std::thread::sleep(SHUTDOWN_GRACE);
            eprintln!("Graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        });
    })
    .context("failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("castrec-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        websockets_port = args.websockets_port,
        http_port = args.port,
        rtc_ports = %format!("{}-{}", args.rtc_ports_begin, args.rtc_ports_end),
        public_ip = %args.public_ip,
        recordings_dir = %args.recordings_dir.display(),
        max_sessions = args.max_sessions,
        "Castrec recording server starting"
    );

    tokio::fs::create_dir_all(&args.recordings_dir)
        .await
        .with_context(|| format!("failed to create {}", args.recordings_dir.display()))?;

    let registry = Arc::new(build_registry(&args)?);

    let signaling = WebSocketSignalingServer::new(signaling_config(&args), registry)
        .context("invalid signaling configuration")?
        .start()
        .await
        .context("failed to start websocket signaling server")?;

    let http = HttpServer::new(
        SocketAddr::new(args.bind_host, args.port).to_string(),
        args.recordings_dir.clone(),
    );
    let (http_shutdown_tx, http_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_task = tokio::spawn(http.serve_with_shutdown(async move {
        let _ = http_shutdown_rx.await;
    }));

    info!("Server running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) && !http_task.is_finished() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("Shutting down, closing live sessions...");
    signaling.shutdown().await;
    let _ = http_shutdown_tx.send(());

    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("HTTP server failed: {}", e);
            return Err(e).context("HTTP server failed");
        }
        Err(e) => return Err(e).context("HTTP server task panicked"),
    }

    info!("Recording server shut down gracefully");
    Ok(())
}

/// Session registry wired to the real media engine
fn build_registry(args: &Args) -> anyhow::Result<SessionRegistry> {
    let engine_config = EngineConfig::default()
        .with_recordings_dir(&args.recordings_dir)
        .with_settle_delay(Duration::from_millis(args.settle_delay_ms));

    let rtc_config = RtcEngineConfig::default()
        .with_port_range(args.rtc_ports_begin, args.rtc_ports_end)
        .with_public_ip(args.public_ip)
        .with_stun_servers(args.stun_servers.clone());
    let media: Arc<dyn MediaEngine> =
        Arc::new(RtcMediaEngine::new(rtc_config).context("invalid media engine configuration")?);

    // the registry owns the session cap
    SessionRegistry::new(
        media,
        Arc::new(Capabilities::recording_default()),
        engine_config,
        args.max_sessions,
    )
    .context("invalid session configuration")
}

fn signaling_config(args: &Args) -> SignalingServerConfig {
    SignalingServerConfig::default()
        .with_bind_addr(SocketAddr::new(args.bind_host, args.websockets_port))
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
