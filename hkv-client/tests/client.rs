use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use hkv_client::{ClientConfig, KVClient};

fn spawn_server(expected_commands: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(b"+");
    let _ = stream.write_all(msg.as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(b"$");
    let _ = stream.write_all(data.len().to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_nil_bulk(stream: &mut TcpStream) {
    let _ = stream.write_all(b"$-1\r\n");
    let _ = stream.flush();
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(b":");
    let _ = stream.write_all(value.to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    };
    KVClient::with_config(config).expect("client")
}

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            write_simple(stream, "OK");
        } else {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"key");
            write_bulk(stream, b"value");
        }
    });

    let client = client_with_addr(addr);
    client.set("key", "value").expect("set");
    let value = client.get("key").expect("get");
    assert_eq!(value, Some("value".to_string()));
}

#[test]
fn client_get_missing_key_is_none() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"GET");
        write_nil_bulk(stream);
    });

    let client = client_with_addr(addr);
    assert_eq!(client.get("missing").expect("get"), None);
}

#[test]
fn client_expire_and_persist() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"EXPIRE");
            assert_eq!(args[1], b"key");
            write_integer(stream, 1);
        } else {
            assert_eq!(args[0], b"PERSIST");
            assert_eq!(args[1], b"key");
            write_integer(stream, 1);
        }
    });

    let client = client_with_addr(addr);
    assert!(client.expire("key", Duration::from_secs(5)).expect("expire"));
    assert!(client.persist("key").expect("persist"));
}

#[test]
fn client_del_counts_removed() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"DEL");
        assert_eq!(args[1], b"a");
        assert_eq!(args[2], b"b");
        write_integer(stream, 1);
    });

    let client = client_with_addr(addr);
    let removed = client.del(&["a", "b"]).expect("del");
    assert_eq!(removed, 1);
}

#[test]
fn client_lpush_and_lrange() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"LPUSH");
            write_integer(stream, 2);
        } else {
            assert_eq!(args[0], b"LRANGE");
            let _ = stream.write_all(b"*2\r\n");
            write_bulk(stream, b"b");
            write_bulk(stream, b"a");
        }
    });

    let client = client_with_addr(addr);
    let len = client.lpush("list", &["a", "b"]).expect("lpush");
    assert_eq!(len, 2);
    let items = client.lrange("list", 0, -1).expect("lrange");
    assert_eq!(items, vec!["b".to_string(), "a".to_string()]);
}

#[test]
fn client_hset_and_hget() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"HSET");
            write_integer(stream, 1);
        } else {
            assert_eq!(args[0], b"HGET");
            write_bulk(stream, b"v1");
        }
    });

    let client = client_with_addr(addr);
    let added = client.hset("hash", "f1", "v1").expect("hset");
    assert_eq!(added, 1);
    let value = client.hget("hash", "f1").expect("hget");
    assert_eq!(value, Some("v1".to_string()));
}
