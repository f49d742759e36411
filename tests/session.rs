use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use neovis::demo::{DemoConfig, DemoModel};
use neovis::model::{EncoderView, HierarchyView, Int3};
use neovis::protocol::{Caret, ProtocolError, Snapshot};
use neovis::session::{ServerConfig, TelemetryServer};

fn loopback_server() -> (TelemetryServer, SocketAddr) {
    let server = TelemetryServer::bind(ServerConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..ServerConfig::default()
    })
    .expect("bind loopback");
    let addr = server.local_addr().expect("local addr");
    (server, addr)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

/// Blocking read of exactly one snapshot frame.
fn read_snapshot(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Snapshot {
    let mut chunk = [0u8; 4096];
    loop {
        match Snapshot::frame_len(buf) {
            Ok(len) => {
                let s = Snapshot::decode(&buf[..len]).expect("valid snapshot");
                buf.drain(..len);
                return s;
            }
            Err(ProtocolError::TruncatedFrame { .. }) => {}
            Err(e) => panic!("bad frame: {e}"),
        }
        let n = stream.read(&mut chunk).expect("read snapshot");
        assert!(n > 0, "server closed connection");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn tick(server: &mut TelemetryServer, model: &DemoModel) {
    let pre: Vec<&dyn EncoderView> = model.pre_encoders();
    server.update(model.hierarchy() as &dyn HierarchyView, &pre);
}

/// Update until the server holds `n` sessions, failing after a generous bound.
fn accept_until(server: &mut TelemetryServer, model: &DemoModel, n: usize) {
    for _ in 0..200 {
        if server.num_sessions() >= n {
            return;
        }
        tick(server, model);
        thread::sleep(Duration::from_millis(5));
    }
    panic!("server never reached {n} sessions");
}

#[test]
fn caret_round_trip_over_loopback() {
    let (mut server, addr) = loopback_server();
    let model = DemoModel::new(&DemoConfig::default());
    let mut client = connect(addr);
    let mut buf = Vec::new();

    accept_until(&mut server, &model, 1);
    let first = read_snapshot(&mut client, &mut buf);
    assert_eq!(first.num_layers(), 3);
    assert_eq!(first.num_encoder_layers, 1);
    assert!(first.fields.is_empty());

    // Layer 1 is hierarchy layer 0, reading the single pre-encoder.
    let caret = Caret::new(1, Int3::new(2, 3, 4));
    client.write_all(&caret.encode()).expect("send caret");

    let mut with_fields = None;
    for _ in 0..200 {
        tick(&mut server, &model);
        let s = read_snapshot(&mut client, &mut buf);
        if !s.fields.is_empty() {
            with_fields = Some(s);
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    let s = with_fields.expect("caret reached the server");
    assert_eq!(s.fields.len(), 1);
    assert_eq!(s.fields[0].name, "field 0");
    assert_eq!(s.fields[0].size, Int3::new(5, 5, 16));
    assert_eq!(server.sessions()[0].caret(), caret);
}

#[test]
fn dropped_client_does_not_disturb_the_other() {
    let (mut server, addr) = loopback_server();
    let mut model = DemoModel::new(&DemoConfig::default());

    let leaver = connect(addr);
    accept_until(&mut server, &model, 1);
    let mut stayer = connect(addr);
    let mut buf = Vec::new();
    accept_until(&mut server, &model, 2);
    // Every tick since the stayer was accepted produced one frame for it.
    let _ = read_snapshot(&mut stayer, &mut buf);

    drop(leaver);

    let mut frames = 0;
    for _ in 0..200 {
        model.step();
        tick(&mut server, &model);
        let s = read_snapshot(&mut stayer, &mut buf);
        assert_eq!(s.num_layers(), 3);
        frames += 1;
        if server.num_sessions() == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.num_sessions(), 1);

    // The survivor keeps getting correctly framed snapshots.
    for _ in 0..3 {
        model.step();
        tick(&mut server, &model);
        let s = read_snapshot(&mut stayer, &mut buf);
        let top = model.hierarchy().layer(1);
        assert_eq!(s.grids[2].winners, top.hidden_winners());
        frames += 1;
    }
    assert_eq!(server.sessions()[0].snapshots_sent(), frames + 1);
}

#[test]
fn out_of_bounds_caret_yields_no_fields() {
    let (mut server, addr) = loopback_server();
    let model = DemoModel::new(&DemoConfig::default());
    let mut client = connect(addr);
    let mut buf = Vec::new();

    accept_until(&mut server, &model, 1);
    let _ = read_snapshot(&mut client, &mut buf);

    client
        .write_all(&Caret::new(2, Int3::new(99, 0, 0)).encode())
        .expect("send caret");
    for _ in 0..5 {
        tick(&mut server, &model);
        let s = read_snapshot(&mut client, &mut buf);
        assert!(s.fields.is_empty());
        assert_eq!(s.num_layers(), 3);
    }
}
