//! signbridge - Main entry point
//!
//! `serve` runs the rendezvous server; `call` runs a headless call client.

mod args;

use args::{Args, Mode};
use clap::Parser;
use log::{error, info, warn};
use signbridge::capture::TestPatternDevice;
use signbridge::config::Config;
use signbridge::peer::RtcPeerConnector;
use signbridge::server::{self, load_class_names, Detector};
use signbridge::session::CallSession;
use signbridge::signaling::{SignalingClient, WebSocketTransport};
use signbridge::view::LogRenderer;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    args.apply_overrides(&mut config);

    // Initialize logging with noise filtering for third-party WebRTC crates
    env_logger::Builder::new()
        .parse_filters(&env::var("SIGNBRIDGE_LOG").unwrap_or_else(|_| config.logging.level.clone()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .filter_module("webrtc_srtp", log::LevelFilter::Error)
        .init();

    info!("signbridge v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from {:?}", args.config),
        Some(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    match args.command {
        Mode::Serve { .. } => run_serve(config).await,
        Mode::Call {
            create,
            ref join,
            detect,
            ..
        } => run_call(config, create, join.clone(), detect).await,
    }
}

async fn run_serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let class_names = match config.server.classes_dir {
        Some(ref dir) => match load_class_names(dir) {
            Ok(names) => {
                info!("Loaded {} classes: {:?}", names.len(), names);
                names
            }
            Err(e) => {
                error!("Error loading classes from {:?}: {}", dir, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    // No classification engine is bundled
    warn!("No classification model configured; detect_sign requests will fail with \"Model not loaded\"");
    let detector = Detector::unloaded(class_names);

    tokio::select! {
        result = server::run_server(&config.server, detector) => result,
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}

async fn run_call(
    config: Config,
    create: bool,
    join: Option<String>,
    detect: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(WebSocketTransport::new(config.signaling.url.clone()));
    let client = SignalingClient::new(transport, config.signaling.retry_policy());

    let session = CallSession::new(
        config.clone(),
        Arc::new(client.clone()),
        Arc::new(TestPatternDevice::new()),
        Arc::new(RtcPeerConnector::new(config.webrtc.clone())),
        Box::new(LogRenderer::new()),
    );
    let handle = session.handle();
    handle.bind(&client);
    let session_task = tokio::spawn(session.run());

    client.connect();
    if !client.wait_connected(Duration::from_secs(30)).await {
        error!("Could not reach signaling server at {}", config.signaling.url);
        let _ = handle.disconnect().await;
        let _ = session_task.await;
        return Err("signaling server unreachable".into());
    }

    if create {
        handle.create_room().await?;
    } else if let Some(room_id) = join {
        handle.join_room(room_id).await?;
    } else {
        info!("Connected; neither --create nor --join given, idling");
    }

    if detect {
        handle.start_detection().await?;
    }

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    if let Err(e) = handle.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    session_task.await?;
    Ok(())
}
