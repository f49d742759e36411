//! Headless telemetry viewer.
//!
//! Connects to a telemetry server, keeps a [`ViewerState`] in sync with the
//! incoming snapshots and answers each one with the current caret. Layer
//! canvases and field images can be dumped as PPM files for inspection.
//!
//! Usage:
//!   neovis-viewer [--config config.txt] [--addr host:port] [--frames n]
//!                 [--select layer px py] [--scroll field delta] [--dump dir]
//!                 [--save-config]

use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use neovis::protocol::Snapshot;
use neovis::render::{ConnectionStatus, RenderConfig, ViewerState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

mod codec;
mod dump;
mod error;
mod settings;

use codec::SnapshotCodec;
use error::ViewerError;
use settings::ConnectionSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    addr: Option<String>,
    frames: Option<u64>,
    select: Option<(usize, f32, f32)>,
    scroll: Vec<(usize, i32)>,
    dump: Option<PathBuf>,
    save_config: bool,
}

fn parse_args() -> Result<Options, ViewerError> {
    let mut opts = Options::default();
    let mut it = std::env::args().skip(1);

    fn num<T: std::str::FromStr>(flag: &str, v: Option<String>) -> Result<T, ViewerError> {
        let v = v.ok_or_else(|| ViewerError::Usage(format!("{flag} needs a value")))?;
        v.parse()
            .map_err(|_| ViewerError::Usage(format!("{flag}: bad value '{v}'")))
    }

    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--config" => opts.config = Some(PathBuf::from(num::<String>(&flag, it.next())?)),
            "--addr" => opts.addr = Some(num(&flag, it.next())?),
            "--frames" => opts.frames = Some(num(&flag, it.next())?),
            "--select" => {
                let layer = num(&flag, it.next())?;
                let px = num(&flag, it.next())?;
                let py = num(&flag, it.next())?;
                opts.select = Some((layer, px, py));
            }
            "--scroll" => {
                let field = num(&flag, it.next())?;
                let delta = num(&flag, it.next())?;
                opts.scroll.push((field, delta));
            }
            "--dump" => opts.dump = Some(PathBuf::from(num::<String>(&flag, it.next())?)),
            "--save-config" => opts.save_config = true,
            other => return Err(ViewerError::Usage(format!("unknown flag '{other}'"))),
        }
    }
    Ok(opts)
}

/// Apply one snapshot: update state, render, optionally dump.
fn on_snapshot(
    state: &mut ViewerState,
    snapshot: Snapshot,
    opts: &Options,
    received: u64,
) -> Result<(), ViewerError> {
    let first = state.snapshot().is_none();
    state.apply_snapshot(snapshot);

    if first {
        if let Some(s) = state.snapshot() {
            for (l, g) in s.grids.iter().enumerate() {
                info!(
                    "{}: {}x{} columns of {}",
                    s.layer_title(l),
                    g.width,
                    g.height,
                    g.column_size
                );
            }
        }
        if let Some((layer, px, py)) = opts.select {
            state.select(layer, px, py);
        }
        for &(field, delta) in &opts.scroll {
            state.scroll_field(field, delta);
        }
    }

    let canvases = state.render();
    debug!(
        "snapshot {}: {} layer(s), caret {:?}",
        received,
        canvases.len(),
        state.caret()
    );

    if let Some(dir) = &opts.dump {
        std::fs::create_dir_all(dir)?;
        for (l, canvas) in canvases.iter().enumerate() {
            dump::write(&dir.join(format!("layer_{l}.ppm")), &dump::canvas_ppm(canvas))?;
        }
        for (j, image) in state.field_images().iter().enumerate() {
            dump::write(&dir.join(format!("field_{j}.ppm")), &dump::field_ppm(image))?;
            debug!("field {} ({})", j, state.field_label(j));
        }
    }
    Ok(())
}

/// One connection: receive, render, reply with the caret, until done or lost.
async fn run_session(
    endpoint: &str,
    state: &mut ViewerState,
    opts: &Options,
    received: &mut u64,
) -> Result<(), ViewerError> {
    state.set_status(ConnectionStatus::Connecting);
    info!("{} {}", state.status().label(), endpoint);

    let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| ViewerError::ConnectTimeout(endpoint.to_string()))??;
    stream.set_nodelay(true)?;
    state.set_status(ConnectionStatus::Connected);
    info!("{}", state.status().label());

    let (mut rd, mut wr) = stream.into_split();
    let mut codec = SnapshotCodec::new();
    let mut inbound = BytesMut::with_capacity(64 * 1024);
    let mut outbound = BytesMut::new();

    loop {
        while let Some(snapshot) = codec.decode(&mut inbound)? {
            on_snapshot(state, snapshot, opts, *received)?;
            *received += 1;

            codec.encode(state.caret(), &mut outbound)?;
            wr.write_all(&outbound).await?;
            outbound.clear();

            if opts.frames.is_some_and(|n| *received >= n) {
                return Ok(());
            }
        }

        if rd.read_buf(&mut inbound).await? == 0 {
            return Err(ViewerError::Closed);
        }
    }
}

async fn run(opts: Options) -> Result<(), ViewerError> {
    let settings_path = opts
        .config
        .clone()
        .unwrap_or_else(ConnectionSettings::default_path);
    let mut settings = ConnectionSettings::load(&settings_path)?;
    if let Some(addr) = &opts.addr {
        if let Some((host, port)) = addr.rsplit_once(':') {
            settings.address = host.to_string();
            settings.port = port
                .parse()
                .map_err(|_| ViewerError::Usage(format!("bad port in '{addr}'")))?;
        } else {
            settings.address = addr.clone();
        }
    }
    if opts.save_config {
        settings.save(&settings_path)?;
        info!("Saved connection settings to {:?}", settings_path);
    }

    let endpoint = settings.endpoint();
    let mut state = ViewerState::new(RenderConfig::default());
    let mut received = 0u64;

    loop {
        match run_session(&endpoint, &mut state, &opts, &mut received).await {
            Ok(()) => return Ok(()),
            Err(e @ (ViewerError::Usage(_) | ViewerError::Settings { .. })) => return Err(e),
            Err(e) => {
                state.set_status(ConnectionStatus::Disconnected);
                warn!("{} ({})", state.status().label(), e);
                time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let opts = parse_args()?;

    tokio::select! {
        res = run(opts) => res?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C: exiting"),
    }
    Ok(())
}
