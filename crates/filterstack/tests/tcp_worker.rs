//! End-to-end exercise of the TCP filter-worker variant against a real
//! local listener, including the bounded retry-then-error path.

use std::io::{BufReader, Read, Write};
use std::net::TcpListener;

use filterstack::codec::{ItemReader, ItemWriter};
use filterstack::worker::{FilterWorker, TcpWorker};

#[test]
fn test_tcp_handshake_and_result_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let mut reader = ItemReader::new(BufReader::new(sock.try_clone().unwrap()));
        assert_eq!(reader.read_item().unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.read_item().unwrap(), Some(b"docker-f".to_vec()));
        assert_eq!(reader.read_array().unwrap(), vec![b"x".to_vec()]);
        assert_eq!(reader.read_item().unwrap(), Some(b"blob".to_vec()));

        let mut writer = ItemWriter::new(sock);
        writer.write_tag("init-success").unwrap();
        writer.write_tag("result").unwrap();
        writer.write_item(Some(b"0.9")).unwrap();
    });

    let mut worker = TcpWorker::connect(
        "127.0.0.1",
        addr.port(),
        "docker-f",
        &["x".to_string()],
        b"blob",
    )
    .unwrap();
    assert_eq!(worker.next_tag().unwrap(), "init-success");
    assert_eq!(worker.next_tag().unwrap(), "result");
    assert_eq!(worker.get_item().unwrap(), Some(b"0.9".to_vec()));
    server.join().unwrap();
}

#[test]
fn test_connect_retries_then_succeeds_once_listener_is_up() {
    // Reserve a port, close the listener, then reopen it on the same port
    // shortly after the worker starts retrying.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(1200));
        let listener = TcpListener::bind(addr).unwrap();
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf);
        let _ = sock.write_all(b"ignored");
    });

    let result = TcpWorker::connect("127.0.0.1", addr.port(), "f", &[], b"");
    assert!(result.is_ok());
    server.join().unwrap();
}

#[test]
fn test_connect_fails_after_exhausting_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TcpWorker::connect("127.0.0.1", addr.port(), "f", &[], b"");
    assert!(result.is_err());
}
