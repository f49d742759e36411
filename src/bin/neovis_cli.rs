//! CLI client for a telemetry server (`neovisd` or any embedding host).
//!
//! Examples:
//!   neovis-cli snapshot
//!   neovis-cli caret 1 3 2 7
//!   neovis-cli --json caret 0 0 0 5
//!   neovis-cli watch 10
//!   neovis-cli local 0 4 4 1
//!
//! By default it talks to 127.0.0.1:54000; override with `--addr host:port`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

use neovis::demo::{DemoConfig, DemoModel};
use neovis::model::{Int3, LayerStack};
use neovis::protocol::{Caret, ProtocolError, Snapshot};
use neovis::session::build_snapshot;

struct Options {
    addr: String,
    json: bool,
}

fn usage() -> ! {
    eprintln!("neovis-cli (talks to a telemetry server @ 127.0.0.1:54000 by default)");
    eprintln!("Usage: neovis-cli [--addr host:port] [--json] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  snapshot                    Fetch one snapshot with no caret");
    eprintln!("  caret <layer> <x> <y> <z>   Fetch one snapshot for a caret");
    eprintln!("  watch <n>                   Fetch n snapshots, printing winner churn");
    eprintln!("  local <layer> <x> <y> <z>   Build a snapshot from the built-in demo model");
    process::exit(1);
}

fn parse_args() -> (Options, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options {
        addr: format!("127.0.0.1:{}", neovis::session::DEFAULT_PORT),
        json: false,
    };

    loop {
        match args.first().map(String::as_str) {
            Some("--addr") if args.len() >= 2 => {
                opts.addr = args[1].clone();
                args.drain(0..2);
            }
            Some("--json") => {
                opts.json = true;
                args.remove(0);
            }
            _ => break,
        }
    }

    if args.is_empty() {
        usage();
    }
    (opts, args)
}

fn parse_caret(args: &[String]) -> Result<Caret, String> {
    if args.len() < 4 {
        return Err("caret needs <layer> <x> <y> <z>".to_string());
    }
    let layer: u16 = args[0]
        .parse()
        .map_err(|_| format!("layer must be 0-65535, got '{}'", args[0]))?;
    let mut cell = [0i32; 3];
    for (slot, raw) in cell.iter_mut().zip(&args[1..4]) {
        *slot = raw
            .parse()
            .map_err(|_| format!("cell coordinate must be an integer, got '{raw}'"))?;
    }
    Ok(Caret::new(layer, Int3::new(cell[0], cell[1], cell[2])))
}

/// Read exactly one snapshot frame from a blocking stream.
fn read_snapshot(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<Snapshot, String> {
    let mut chunk = [0u8; 4096];
    loop {
        match Snapshot::frame_len(buf) {
            Ok(len) => {
                let snapshot = Snapshot::decode(&buf[..len]).map_err(|e| format!("decode: {e}"))?;
                buf.drain(..len);
                return Ok(snapshot);
            }
            Err(ProtocolError::TruncatedFrame { .. }) => {}
            Err(e) => return Err(format!("decode: {e}")),
        }
        let n = stream.read(&mut chunk).map_err(|e| format!("recv: {e}"))?;
        if n == 0 {
            return Err("server closed the connection".to_string());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn connect(addr: &str) -> Result<TcpStream, String> {
    let stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    stream
        .set_nodelay(true)
        .map_err(|e| format!("set_nodelay: {e}"))?;
    Ok(stream)
}

fn fetch(addr: &str, caret: Caret) -> Result<Snapshot, String> {
    let mut stream = connect(addr)?;
    stream
        .write_all(&caret.encode())
        .map_err(|e| format!("send: {e}"))?;

    // The caret may land a tick late; the second snapshot is guaranteed to
    // reflect it.
    let mut buf = Vec::new();
    let first = read_snapshot(&mut stream, &mut buf)?;
    if caret.is_unset() {
        return Ok(first);
    }
    stream
        .write_all(&caret.encode())
        .map_err(|e| format!("send: {e}"))?;
    read_snapshot(&mut stream, &mut buf)
}

fn watch(addr: &str, count: usize) -> Result<(), String> {
    let mut stream = connect(addr)?;
    let caret = Caret::default();
    let mut buf = Vec::new();
    let mut previous: Option<Snapshot> = None;

    for tick in 0..count {
        stream
            .write_all(&caret.encode())
            .map_err(|e| format!("send: {e}"))?;
        let snapshot = read_snapshot(&mut stream, &mut buf)?;

        let churn: Vec<String> = snapshot
            .grids
            .iter()
            .enumerate()
            .map(|(l, g)| {
                let changed = previous
                    .as_ref()
                    .and_then(|p| p.grids.get(l))
                    .map(|pg| {
                        pg.winners
                            .iter()
                            .zip(&g.winners)
                            .filter(|(a, b)| a != b)
                            .count()
                    })
                    .unwrap_or(0);
                format!("{}={}/{}", snapshot.layer_title(l), changed, g.num_columns())
            })
            .collect();
        println!("tick={tick} {}", churn.join(" "));
        previous = Some(snapshot);
    }
    Ok(())
}

fn print_snapshot(s: &Snapshot) {
    println!(
        "layers={} pre_encoders={} fields={} bytes={}",
        s.num_layers(),
        s.num_encoder_layers,
        s.fields.len(),
        s.encoded_len()
    );
    for (l, g) in s.grids.iter().enumerate() {
        println!(
            "  {:<14} {}x{} cs={:<4} winners[0..4]={:?}",
            s.layer_title(l),
            g.width,
            g.height,
            g.column_size,
            &g.winners[..g.winners.len().min(4)]
        );
    }
    for f in &s.fields {
        let (min, max) = f
            .data
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = if f.data.is_empty() {
            0.0
        } else {
            f.data.iter().map(|&v| v as f64).sum::<f64>() / f.data.len() as f64
        };
        println!(
            "  {:<14} {}x{}x{} min={} max={} mean={:.1}",
            f.name, f.size.x, f.size.y, f.size.z, min, max, mean
        );
    }
}

fn main() {
    let (opts, args) = parse_args();
    let cmd = &args[0];

    let make_error = |msg: &str| -> ! {
        eprintln!("{}", msg);
        process::exit(1);
    };

    let result = match cmd.as_str() {
        "snapshot" => fetch(&opts.addr, Caret::default()),
        "caret" => {
            let caret = parse_caret(&args[1..]).unwrap_or_else(|e| make_error(&e));
            fetch(&opts.addr, caret)
        }
        "local" => {
            let caret = parse_caret(&args[1..]).unwrap_or_else(|e| make_error(&e));
            let model = DemoModel::new(&DemoConfig::default());
            let pre = model.pre_encoders();
            let layers = LayerStack::new(model.hierarchy(), &pre);
            Ok(build_snapshot(&layers, caret))
        }
        "watch" => {
            let count: usize = args
                .get(1)
                .map(|s| s.parse())
                .unwrap_or(Ok(10))
                .unwrap_or_else(|_| make_error("watch count must be a number"));
            if let Err(e) = watch(&opts.addr, count) {
                make_error(&e);
            }
            return;
        }
        _ => usage(),
    };

    match result {
        Ok(snapshot) if opts.json => match serde_json::to_string_pretty(&snapshot) {
            Ok(s) => println!("{s}"),
            Err(e) => make_error(&format!("serialize: {e}")),
        },
        Ok(snapshot) => print_snapshot(&snapshot),
        Err(e) => make_error(&e),
    }
}
