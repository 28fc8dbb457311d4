use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hkv_client::{ClientConfig, KVClient};
use hkv_common::clock::SystemClock;
use hkv_engine::Store;
use hkv_server::connection;
use hkv_server::dispatch::Dispatcher;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// Spins up a real listener backed by a fresh, unsaved store on a background
/// OS thread running its own tokio runtime, and returns its address.
fn spawn_server() -> String {
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        let rt = Runtime::new().expect("tokio runtime");
        rt.block_on(async move {
            let store = Arc::new(Store::new(Arc::new(SystemClock), None));
            let dispatcher = Arc::new(Dispatcher::new(store, Arc::new(SystemClock)));
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            addr_tx.send(listener.local_addr().unwrap().to_string()).unwrap();

            loop {
                let (stream, peer_addr) = listener.accept().await.expect("accept");
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let _ = connection::handle_connection(stream, dispatcher, peer_addr).await;
                });
            }
        });
    });

    addr_rx.recv().expect("server address")
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 4,
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
        connect_timeout: Some(Duration::from_secs(2)),
    };
    KVClient::with_config(config).expect("client")
}

#[test]
fn set_get_del_roundtrip() {
    let client = client_with_addr(spawn_server());
    client.set("greeting", "hello").expect("set");
    assert_eq!(client.get("greeting").unwrap(), Some("hello".to_string()));
    assert_eq!(client.del(&["greeting"]).unwrap(), 1);
    assert_eq!(client.get("greeting").unwrap(), None);
}

#[test]
fn expire_then_get_returns_nil_after_ttl() {
    let client = client_with_addr(spawn_server());
    client.set("k", "v").expect("set");
    assert!(client.expire("k", Duration::from_secs(1)).unwrap());
    thread::sleep(Duration::from_millis(1100));
    assert_eq!(client.get("k").unwrap(), None);
}

#[test]
fn keys_matches_glob_pattern() {
    let client = client_with_addr(spawn_server());
    client.set("user:1", "a").unwrap();
    client.set("user:2", "b").unwrap();
    client.set("order:1", "c").unwrap();
    let mut matched = client.keys("user:*").unwrap();
    matched.sort();
    assert_eq!(matched, vec!["user:1".to_string(), "user:2".to_string()]);
}

#[test]
fn list_push_range_set_get() {
    let client = client_with_addr(spawn_server());
    assert_eq!(client.lpush("mylist", &["1", "2", "3"]).unwrap(), 3);
    assert_eq!(client.rpush("mylist", &["4", "5"]).unwrap(), 5);
    let all = client.lrange("mylist", 0, -1).unwrap();
    assert_eq!(
        all,
        vec!["3", "2", "1", "4", "5"].into_iter().map(String::from).collect::<Vec<_>>()
    );
    client.lset("mylist", 0, "zero").unwrap();
    assert_eq!(client.lget("mylist", 0).unwrap(), "zero");
}

#[test]
fn hash_set_and_get() {
    let client = client_with_addr(spawn_server());
    assert_eq!(client.hset("profile", "name", "ada").unwrap(), 1);
    assert_eq!(client.hset("profile", "name", "grace").unwrap(), 0);
    assert_eq!(client.hget("profile", "name").unwrap(), Some("grace".to_string()));
    assert_eq!(client.hget("profile", "missing").unwrap(), None);
}

#[test]
fn valid_pipelined_command_survives_a_later_malformed_frame() {
    let addr = spawn_server();
    let mut stream = TcpStream::connect(&addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // A complete, valid SET immediately followed by a byte stream with a
    // bad first byte, in one write — the same scenario as a pipelined
    // send where the second command never forms a valid frame.
    let request = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n#garbage\r\n";
    stream.write_all(request).unwrap();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+OK\r\n");

    let client = client_with_addr(addr);
    assert_eq!(client.get("k").unwrap(), Some("v".to_string()));
}

#[test]
fn persist_clears_ttl() {
    let client = client_with_addr(spawn_server());
    client.set("k", "v").unwrap();
    assert!(client.expire("k", Duration::from_secs(10)).unwrap());
    assert!(client.persist("k").unwrap());
    assert!(!client.persist("k").unwrap());
}
