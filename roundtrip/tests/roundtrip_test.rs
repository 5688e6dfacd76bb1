/*!
 * Round-trip Tests
 * Server and client over real loopback TCP and real POSIX shared memory
 */

use std::io::{BufRead, BufReader, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use roundtrip::channel::{self, ControlChannel};
use roundtrip::{Config, Driver, Error, SharedBuffer, Token, LISTEN_BACKLOG, SLOT_COUNT};

const BIN: &str = env!("CARGO_BIN_EXE_roundtrip");

fn unique_name(tag: &str) -> String {
    format!("/roundtrip-it-{}-{}", std::process::id(), tag)
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(a) => a,
        other => panic!("unexpected address {}", other),
    }
}

fn local_listener() -> (TcpListener, SocketAddrV4) {
    let listener = channel::listen(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), LISTEN_BACKLOG).unwrap();
    let addr = v4(listener.local_addr().unwrap());
    (listener, addr)
}

fn config(name: &str, addr: SocketAddrV4) -> Config {
    Config {
        shm_name: name.to_string(),
        addr,
        ..Config::default()
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("process did not exit within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Spawn the server binary and block until it is listening.
fn spawn_server(name: &str, port: u16, cycles: Option<u64>) -> Child {
    let mut cmd = Command::new(BIN);
    cmd.arg("server")
        .env("ROUNDTRIP_SHM_NAME", name)
        .env("ROUNDTRIP_PORT", port.to_string())
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(n) = cycles {
        cmd.arg("--cycles").arg(n.to_string());
    }
    let mut child = cmd.spawn().unwrap();

    let stderr = child.stderr.take().unwrap();
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next() {
            Some(Ok(line)) if line.contains("listening") => break,
            Some(Ok(_)) => continue,
            _ => {
                let _ = child.kill();
                panic!("server exited before listening");
            }
        }
    }
    // keep draining so the server never blocks on a full pipe
    thread::spawn(move || lines.for_each(drop));
    child
}

fn free_port() -> u16 {
    let (listener, addr) = local_listener();
    drop(listener);
    addr.port()
}

#[test]
fn test_ten_thousand_cycles_without_integrity_failure() {
    let name = unique_name("10k");
    let buffer = SharedBuffer::create(&name).unwrap();
    let (listener, addr) = local_listener();
    let cycles = 10_000u64;

    let server = thread::spawn(move || {
        let mut driver = Driver::serve(buffer, &listener).unwrap();
        driver.run_cycles(cycles).unwrap();
        (driver.token(), driver.roundtrips())
    });

    let mut client = Driver::client(&config(&name, addr)).unwrap();
    client.run_cycles(cycles).unwrap();

    let (server_token, server_roundtrips) = server.join().unwrap();
    let expected = Token((cycles % 256) as u8);
    assert_eq!(server_token, expected);
    assert_eq!(client.token(), expected);
    assert_eq!(server_roundtrips, cycles);
    assert_eq!(client.roundtrips(), cycles);

    // every slot was rewritten with its own index
    for i in 0..SLOT_COUNT {
        client.buffer().verify_slot(i, i as u8).unwrap();
    }
}

#[test]
fn test_first_token_is_slot_zero_then_one() {
    let name = unique_name("first");
    let mut buffer = SharedBuffer::create(&name).unwrap();
    let (listener, addr) = local_listener();

    let client = thread::spawn(move || {
        let mut driver = Driver::client(&config(&name, addr)).unwrap();
        driver.run_cycles(2).unwrap();
        driver.token()
    });

    let mut ctl = channel::accept(&listener).unwrap();
    buffer.write_slot(0, 0).unwrap();
    ctl.send_token(Token(0)).unwrap();
    assert_eq!(ctl.receive_token().unwrap(), Token(1));

    buffer.write_slot(1, 1).unwrap();
    ctl.send_token(Token(1)).unwrap();
    assert_eq!(ctl.receive_token().unwrap(), Token(2));

    assert_eq!(client.join().unwrap(), Token(2));
}

#[test]
fn test_corrupted_slot_five_fails_client() {
    let name = unique_name("corrupt");
    let mut buffer = SharedBuffer::create(&name).unwrap();
    let (listener, addr) = local_listener();

    let client = thread::spawn(move || {
        let mut driver = Driver::client(&config(&name, addr)).unwrap();
        driver.run_cycles(u64::MAX)
    });

    let mut ctl = channel::accept(&listener).unwrap();
    let mut b = Token::ZERO;
    while b != Token(5) {
        buffer.write_slot(b.slot(), b.fill()).unwrap();
        ctl.send_token(b).unwrap();
        b = ctl.receive_token().unwrap();
    }

    // server's write, then a foreign write before the client reads
    buffer.write_slot(5, 5).unwrap();
    buffer.write_slot(5, 0xAA).unwrap();
    ctl.send_token(Token(5)).unwrap();

    let err = client.join().unwrap().unwrap_err();
    assert!(err.is_integrity());
    match err {
        Error::IntegrityViolation {
            slot,
            offset,
            expected,
            found,
        } => assert_eq!((slot, offset, expected, found), (5, 0, 5, 0xAA)),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_server_reports_dropped_connection() {
    let name = unique_name("drop");
    let buffer = SharedBuffer::create(&name).unwrap();
    let (listener, addr) = local_listener();

    let server = thread::spawn(move || {
        let mut driver = Driver::serve(buffer, &listener).unwrap();
        driver.run_cycles(u64::MAX)
    });

    let mut raw = TcpStream::connect(addr).unwrap();
    let mut ctl = ControlChannel::new(raw.try_clone().unwrap());
    for _ in 0..3 {
        let t = ctl.receive_token().unwrap();
        ctl.send_token(t.next()).unwrap();
    }
    let mut last = [0u8; 1];
    raw.read_exact(&mut last).unwrap();
    assert_eq!(last[0], 3);
    drop(ctl);
    drop(raw);

    let err = server.join().unwrap().unwrap_err();
    assert!(
        matches!(err, Error::ChannelClosed | Error::Receive(_)),
        "unexpected error {:?}",
        err
    );
    assert!(!err.is_integrity());
}

#[test]
fn test_client_without_server_fails_to_connect() {
    let name = unique_name("noserver");
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, free_port());
    let result = Driver::client(&config(&name, addr));
    assert!(matches!(result, Err(Error::Connect { .. })));
}

#[test]
fn test_client_without_shared_memory_fails() {
    let name = unique_name("noshm");
    let (listener, addr) = local_listener();
    let accepted = thread::spawn(move || channel::accept(&listener).map(|_| ()));

    let result = Driver::client(&config(&name, addr));
    assert!(matches!(result, Err(Error::Shm { op: "shm_open", .. })));
    accepted.join().unwrap().unwrap();
}

#[test]
fn test_two_processes_complete_bounded_run() {
    let name = unique_name("procs");
    let port = free_port();
    let mut server = spawn_server(&name, port, Some(10_000));

    let mut client = Command::new(BIN)
        .args(["client", "--cycles", "10000"])
        .env("ROUNDTRIP_SHM_NAME", &name)
        .env("ROUNDTRIP_PORT", port.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let client_status = wait_with_timeout(&mut client, Duration::from_secs(60));
    let server_status = wait_with_timeout(&mut server, Duration::from_secs(60));
    assert!(client_status.success(), "client: {:?}", client_status);
    assert!(server_status.success(), "server: {:?}", server_status);

    // creator unlinked the object on exit
    assert!(SharedBuffer::open(&name).is_err());
}

#[test]
fn test_client_process_exits_on_integrity_violation() {
    let name = unique_name("procs-corrupt");
    let mut buffer = SharedBuffer::create(&name).unwrap();
    let (listener, addr) = local_listener();

    let mut client = Command::new(BIN)
        .arg("client")
        .env("ROUNDTRIP_SHM_NAME", &name)
        .env("ROUNDTRIP_PORT", addr.port().to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut ctl = channel::accept(&listener).unwrap();
    buffer.write_slot(0, 0).unwrap();
    ctl.send_token(Token(0)).unwrap();
    assert_eq!(ctl.receive_token().unwrap(), Token(1));

    buffer.write_slot(1, 0x55).unwrap();
    ctl.send_token(Token(1)).unwrap();

    let status = wait_with_timeout(&mut client, Duration::from_secs(30));
    assert_eq!(status.code(), Some(3));
}

#[test]
fn test_server_process_exits_when_peer_disconnects() {
    let name = unique_name("procs-drop");
    let port = free_port();
    let mut server = spawn_server(&name, port, None);

    let mut raw = TcpStream::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).unwrap();
    let mut first = [0u8; 1];
    raw.read_exact(&mut first).unwrap();
    assert_eq!(first[0], 0);
    drop(raw);

    let status = wait_with_timeout(&mut server, Duration::from_secs(30));
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_usage_errors() {
    for args in [&[][..], &["bogus"][..], &["server", "--cycles"][..], &["client", "--cycles", "x"][..]] {
        let status = Command::new(BIN)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(2), "args {:?}", args);
    }
}
