//! neovis daemon - steps a model and streams its telemetry to viewers
//!
//! Each tick advances the built-in demo hierarchy by one step, then services
//! every connected viewer once: accept, read its caret, send a snapshot.
//!
//! Config location:
//! - Linux: ~/.config/neovis/neovisd.json
//! - Windows: %APPDATA%\neovis\neovisd.json
//! - MacOS: ~/Library/Application Support/neovis/neovisd.json
//!
//! Usage: neovisd [--config path] [--port n] [--fps n]

use std::path::PathBuf;
use std::time::Duration;

use neovis::demo::DemoModel;
use neovis::model::EncoderView;
use neovis::session::TelemetryServer;
use tokio::time;
use tracing::{error, info};

mod config;
mod error;
mod paths;

use config::DaemonConfig;
use error::DaemonError;
use paths::AppPaths;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    port: Option<u16>,
    fps: Option<u32>,
}

fn parse_args() -> Result<Args, DaemonError> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = || {
            it.next()
                .ok_or_else(|| DaemonError::Usage(format!("{flag} needs a value")))
        };
        match flag.as_str() {
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--port" => {
                let v = value()?;
                args.port = Some(
                    v.parse()
                        .map_err(|_| DaemonError::Usage(format!("bad port '{v}'")))?,
                );
            }
            "--fps" => {
                let v = value()?;
                args.fps = Some(
                    v.parse()
                        .map_err(|_| DaemonError::Usage(format!("bad fps '{v}'")))?,
                );
            }
            other => return Err(DaemonError::Usage(format!("unknown flag '{other}'"))),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<DaemonConfig, DaemonError> {
    let path = match &args.config {
        Some(p) => p.clone(),
        None => {
            let paths = AppPaths::new()?;
            info!("Config directory: {:?}", paths.config_dir());
            paths.config_file()
        }
    };

    let mut cfg = DaemonConfig::load_or_create(&path)?;
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    if let Some(fps) = args.fps {
        cfg.target_fps = fps;
    }
    Ok(cfg.sanitized())
}

/// Step the model and service viewers until Ctrl-C.
async fn run(cfg: DaemonConfig) -> Result<(), DaemonError> {
    let mut server = TelemetryServer::bind(cfg.server.clone())?;
    let mut model = DemoModel::new(&cfg.model);

    let frame = Duration::from_micros(1_000_000 / cfg.target_fps as u64);
    let mut ticker = time::interval(frame);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    info!(
        "Model: {} pre-encoder(s), {} layer(s), {} FPS",
        cfg.model.num_pre_encoders,
        cfg.model.layers.len(),
        cfg.target_fps
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Ctrl-C: shutting down after {} steps", model.steps());
                return Ok(());
            }
        }

        // Session I/O is synchronous and may wait on a slow peer.
        tokio::task::block_in_place(|| {
            model.step();
            let pre: Vec<&dyn EncoderView> = model.pre_encoders();
            server.update(model.hierarchy(), &pre);
        });

        if cfg.status_every > 0 && model.steps() % cfg.status_every == 0 {
            let sent: u64 = server.sessions().iter().map(|s| s.snapshots_sent()).sum();
            info!(
                "step={} sessions={} snapshots_sent={}",
                model.steps(),
                server.num_sessions(),
                sent
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let cfg = load_config(&args)?;

    if let Err(e) = run(cfg).await {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
