#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use hopwire::frame::FrameReader;
use hopwire::route::{JsonCodec, Message, MessageCodec};

fn hopwire() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_hopwire"));
    command.arg("--log-level").arg("error");
    command
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/hopwire-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("ephemeral bind should work")
        .local_addr()
        .expect("bound listener has an address")
        .port()
}

fn connect_with_retry(port: u16, timeout: Duration) -> TcpStream {
    let start = Instant::now();
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(err) => {
                assert!(start.elapsed() < timeout, "connect timeout: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn send(stream: &mut impl Write, message: &Message) {
    let mut payload = JsonCodec.encode(message).expect("message should encode");
    payload.push(0);
    stream.write_all(&payload).expect("write should succeed");
}

fn receive<R: std::io::Read>(reader: &mut FrameReader<R>) -> Message {
    let payload = reader.read_frame().expect("frame should arrive");
    JsonCodec.decode(&payload).expect("frame should decode")
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    loop {
        if child.try_wait().expect("child should be waitable").is_some() {
            return child.wait_with_output().expect("output should be collected");
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("hopwire did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn missing_connect_port_is_usage_error() {
    let output = hopwire()
        .arg("-C")
        .arg("localhost")
        .output()
        .expect("hopwire should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing parameters for -C"), "{stderr}");
    assert!(stderr.contains("position 2"), "{stderr}");
}

#[test]
fn missing_fifo_files_is_usage_error() {
    let output = hopwire().arg("-F").output().expect("hopwire should run");
    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing parameters for -F"), "{stderr}");
    assert!(stderr.contains("position 1"), "{stderr}");
}

#[test]
fn no_transport_is_usage_error() {
    let output = hopwire().output().expect("hopwire should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn out_of_range_port_is_usage_error() {
    let output = hopwire()
        .arg("-S")
        .arg("70000")
        .output()
        .expect("hopwire should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn server_identifies_peer_and_prints_local_message() {
    let port = free_port();
    let child = hopwire()
        .arg("--format")
        .arg("json")
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("-S")
        .arg(port.to_string())
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("server should start");

    let mut stream = connect_with_retry(port, Duration::from_secs(5));
    let mut reader = FrameReader::new(stream.try_clone().expect("stream should clone"));

    let query = receive(&mut reader);
    assert_eq!(query.msg_type, "identify");
    assert_eq!(query.route(), Some(""));
    assert!(query.field("suggested_id").is_some());

    send(
        &mut stream,
        &Message::new("identity")
            .with_field("route", "")
            .with_field("id", "77"),
    );
    send(
        &mut stream,
        &Message::new("note")
            .with_field("route", "")
            .with_field("pitch", "60"),
    );

    let output = wait_with_timeout(child, Duration::from_secs(10));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"type\":\"note\""), "{stdout}");
    assert!(stdout.contains("\"pitch\":\"60\""), "{stdout}");
    assert!(!stdout.contains("identity"), "{stdout}");
}

#[test]
fn client_answers_identify_query_with_node_id() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let port = listener.local_addr().expect("listener address").port();

    let child = hopwire()
        .arg("--format")
        .arg("pretty")
        .arg("-C")
        .arg("127.0.0.1")
        .arg(port.to_string())
        .arg("--node-id")
        .arg("9")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("client should start");

    let (mut stream, _) = listener.accept().expect("client should connect");
    let mut reader = FrameReader::new(stream.try_clone().expect("stream should clone"));

    send(
        &mut stream,
        &Message::new("identify")
            .with_field("route", "")
            .with_field("ret_route", "")
            .with_field("suggested_id", "3"),
    );
    let reply = receive(&mut reader);
    assert_eq!(reply.msg_type, "identity");
    assert_eq!(reply.field("id"), Some("9"));
    assert_eq!(reply.route(), Some(""));

    send(&mut stream, &Message::new("hello"));

    let output = wait_with_timeout(child, Duration::from_secs(10));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("type=hello"), "{stdout}");
}

#[test]
fn pipe_route_receives_framed_message() {
    let dir = unique_temp_dir("fifo");
    let inbound = dir.join("to-node");
    let outbound = dir.join("from-node");

    let child = hopwire()
        .arg("--format")
        .arg("json")
        .arg("-F")
        .arg(&inbound)
        .arg(&outbound)
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("pipe node should start");

    // The node creates both FIFOs; wait until the inbound one exists.
    let start = Instant::now();
    while !inbound.exists() {
        assert!(start.elapsed() < Duration::from_secs(5), "fifo not created");
        thread::sleep(Duration::from_millis(25));
    }

    let mut to_node = hopwire::transport::fifo::open_write(&inbound).expect("inbound opens");
    let _from_node = hopwire::transport::fifo::open_read(&outbound).expect("outbound opens");
    send(&mut to_node, &Message::new("over-pipe").with_field("k", "v"));

    let output = wait_with_timeout(child, Duration::from_secs(10));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"type\":\"over-pipe\""), "{stdout}");
    assert!(stdout.contains("\"received_on\":\"A\""), "{stdout}");

    let _ = std::fs::remove_dir_all(&dir);
}
