//! A tiny scripted memcached-binary-protocol server used only by this
//! crate's own tests, in place of a real `memcached` binary. Parses and
//! replies to requests directly off the wire, independent of the `wire`
//! module this crate tests against, so a bug in one side can't mask a bug
//! in the other.
#![cfg(test)]

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use smol::net::{TcpListener, TcpStream};
use std::collections::HashMap;
use std::io::Write as _;
use std::net::SocketAddr;

/// Install a `tracing` subscriber controlled by `RUST_LOG`, once per test
/// binary, so a failing test's connect/terminal-failure/quiet-fence traces
/// are visible with `-- --nocapture`.
pub(crate) fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
}

pub(crate) struct RawRequest {
    pub opcode: u8,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Bind an ephemeral loopback listener and report its address.
pub(crate) async fn bind() -> (SocketAddr, TcpListener) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, listener)
}

/// Read one request off `stream`, or `None` on a clean EOF.
pub(crate) async fn read_request(stream: &mut TcpStream) -> Option<RawRequest> {
    let mut header = [0u8; 24];
    if stream.read_exact(&mut header).await.is_err() {
        return None;
    }
    let mut cur = &header[..];
    let _magic = cur.read_u8().unwrap();
    let opcode = cur.read_u8().unwrap();
    let key_len = cur.read_u16::<BigEndian>().unwrap();
    let extras_len = cur.read_u8().unwrap();
    let _data_type = cur.read_u8().unwrap();
    let _reserved = cur.read_u16::<BigEndian>().unwrap();
    let body_len = cur.read_u32::<BigEndian>().unwrap();
    let opaque = cur.read_u32::<BigEndian>().unwrap();
    let cas = cur.read_u64::<BigEndian>().unwrap();

    let mut body = vec![0u8; body_len as usize];
    stream.read_exact(&mut body).await.unwrap();
    let extras = body[..extras_len as usize].to_vec();
    let key = body[extras_len as usize..extras_len as usize + key_len as usize].to_vec();
    let value = body[extras_len as usize + key_len as usize..].to_vec();

    Some(RawRequest {
        opcode,
        opaque,
        cas,
        extras,
        key,
        value,
    })
}

/// Write a response with response magic `0x81`.
pub(crate) async fn write_response(
    stream: &mut TcpStream,
    opcode: u8,
    status: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) {
    let mut buf = Vec::with_capacity(24 + extras.len() + key.len() + value.len());
    buf.write_u8(0x81).unwrap();
    buf.write_u8(opcode).unwrap();
    buf.write_u16::<BigEndian>(key.len() as u16).unwrap();
    buf.write_u8(extras.len() as u8).unwrap();
    buf.write_u8(0).unwrap();
    buf.write_u16::<BigEndian>(status).unwrap();
    buf.write_u32::<BigEndian>((extras.len() + key.len() + value.len()) as u32)
        .unwrap();
    buf.write_u32::<BigEndian>(opaque).unwrap();
    buf.write_u64::<BigEndian>(cas).unwrap();
    buf.write_all(extras).unwrap();
    buf.write_all(key).unwrap();
    buf.write_all(value).unwrap();
    stream.write_all(&buf).await.unwrap();
    stream.flush().await.unwrap();
}

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_ADD: u8 = 0x02;
const OP_REPLACE: u8 = 0x03;
const OP_DELETE: u8 = 0x04;
const OP_INCREMENT: u8 = 0x05;
const OP_DECREMENT: u8 = 0x06;
const OP_QUIT: u8 = 0x07;
const OP_FLUSH: u8 = 0x08;
const OP_GETQ: u8 = 0x09;
const OP_NOOP: u8 = 0x0a;
const OP_VERSION: u8 = 0x0b;
const OP_GETK: u8 = 0x0c;
const OP_GETKQ: u8 = 0x0d;
const OP_APPEND: u8 = 0x0e;
const OP_PREPEND: u8 = 0x0f;
const OP_STAT: u8 = 0x10;
const OP_SETQ: u8 = 0x11;
const OP_ADDQ: u8 = 0x12;
const OP_REPLACEQ: u8 = 0x13;
const OP_DELETEQ: u8 = 0x14;
const OP_INCREMENTQ: u8 = 0x15;
const OP_DECREMENTQ: u8 = 0x16;
const OP_QUITQ: u8 = 0x17;
const OP_FLUSHQ: u8 = 0x18;
const OP_APPENDQ: u8 = 0x19;
const OP_PREPENDQ: u8 = 0x1a;

const STATUS_OK: u16 = 0x00;
const STATUS_KEY_NOT_FOUND: u16 = 0x01;
const STATUS_KEY_EXISTS: u16 = 0x02;
const STATUS_NOT_STORED: u16 = 0x05;

#[derive(Clone)]
struct Item {
    flags: u32,
    value: Vec<u8>,
    cas: u64,
}

/// A minimal single-threaded in-memory memcached: enough opcode coverage
/// to exercise every return shape and the quiet-fence rules this crate
/// implements. Runs until the client disconnects.
pub(crate) async fn run_fake_server(mut stream: TcpStream) {
    let mut store: HashMap<Vec<u8>, Item> = HashMap::new();
    let mut next_cas: u64 = 1;

    while let Some(req) = read_request(&mut stream).await {
        match req.opcode {
            OP_GET | OP_GETQ | OP_GETK | OP_GETKQ => {
                let keyed = matches!(req.opcode, OP_GETK | OP_GETKQ);
                let quiet = matches!(req.opcode, OP_GETQ | OP_GETKQ);
                match store.get(&req.key) {
                    Some(item) => {
                        let mut extras = Vec::new();
                        extras.write_u32::<BigEndian>(item.flags).unwrap();
                        let key = if keyed { req.key.clone() } else { Vec::new() };
                        write_response(
                            &mut stream,
                            req.opcode,
                            STATUS_OK,
                            req.opaque,
                            item.cas,
                            &extras,
                            &key,
                            &item.value,
                        )
                        .await;
                    }
                    None if quiet => {
                        // quiet miss: no response at all
                    }
                    None => {
                        write_response(
                            &mut stream,
                            req.opcode,
                            STATUS_KEY_NOT_FOUND,
                            req.opaque,
                            0,
                            &[],
                            &[],
                            b"Not found",
                        )
                        .await;
                    }
                }
            }
            OP_SET | OP_SETQ | OP_ADD | OP_ADDQ | OP_REPLACE | OP_REPLACEQ => {
                let quiet = matches!(req.opcode, OP_SETQ | OP_ADDQ | OP_REPLACEQ);
                let mut extras = &req.extras[..];
                let flags = extras.read_u32::<BigEndian>().unwrap();
                let _expiration = extras.read_u32::<BigEndian>().unwrap();

                let exists = store.contains_key(&req.key);
                let is_add = matches!(req.opcode, OP_ADD | OP_ADDQ);
                let is_replace = matches!(req.opcode, OP_REPLACE | OP_REPLACEQ);

                if is_add && exists {
                    write_response(&mut stream, req.opcode, STATUS_KEY_EXISTS, req.opaque, 0, &[], &[], b"Data exists").await;
                    continue;
                }
                if is_replace && !exists {
                    write_response(&mut stream, req.opcode, STATUS_NOT_STORED, req.opaque, 0, &[], &[], b"Not stored").await;
                    continue;
                }
                if req.cas != 0 {
                    match store.get(&req.key) {
                        Some(item) if item.cas != req.cas => {
                            write_response(&mut stream, req.opcode, STATUS_KEY_EXISTS, req.opaque, 0, &[], &[], b"Data exists").await;
                            continue;
                        }
                        None => {
                            write_response(&mut stream, req.opcode, STATUS_KEY_NOT_FOUND, req.opaque, 0, &[], &[], b"Not found").await;
                            continue;
                        }
                        _ => {}
                    }
                }

                let cas = next_cas;
                next_cas += 1;
                store.insert(req.key, Item { flags, value: req.value, cas });
                if !quiet {
                    write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, cas, &[], &[], &[]).await;
                }
            }
            OP_DELETE | OP_DELETEQ => {
                let quiet = req.opcode == OP_DELETEQ;
                match store.get(&req.key) {
                    Some(item) if req.cas != 0 && item.cas != req.cas => {
                        write_response(&mut stream, req.opcode, STATUS_KEY_EXISTS, req.opaque, 0, &[], &[], b"Data exists").await;
                    }
                    Some(_) => {
                        store.remove(&req.key);
                        if !quiet {
                            write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], &[]).await;
                        }
                    }
                    None => {
                        write_response(&mut stream, req.opcode, STATUS_KEY_NOT_FOUND, req.opaque, 0, &[], &[], b"Not found").await;
                    }
                }
            }
            OP_INCREMENT | OP_INCREMENTQ | OP_DECREMENT | OP_DECREMENTQ => {
                let quiet = matches!(req.opcode, OP_INCREMENTQ | OP_DECREMENTQ);
                let is_incr = matches!(req.opcode, OP_INCREMENT | OP_INCREMENTQ);
                let mut extras = &req.extras[..];
                let delta = extras.read_u64::<BigEndian>().unwrap();
                let initial = extras.read_u64::<BigEndian>().unwrap();
                let expiration = extras.read_u32::<BigEndian>().unwrap();

                let result = match store.get(&req.key) {
                    Some(item) => {
                        let current = std::str::from_utf8(&item.value)
                            .ok()
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(0);
                        if is_incr {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        }
                    }
                    None if expiration == 0xFFFF_FFFF => {
                        write_response(&mut stream, req.opcode, STATUS_KEY_NOT_FOUND, req.opaque, 0, &[], &[], b"Not found").await;
                        continue;
                    }
                    None => initial,
                };
                let cas = next_cas;
                next_cas += 1;
                store.insert(
                    req.key,
                    Item {
                        flags: 0,
                        value: result.to_string().into_bytes(),
                        cas,
                    },
                );
                if !quiet {
                    let mut value = Vec::new();
                    value.write_u64::<BigEndian>(result).unwrap();
                    write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, cas, &[], &[], &value).await;
                }
            }
            OP_APPEND | OP_APPENDQ | OP_PREPEND | OP_PREPENDQ => {
                let quiet = matches!(req.opcode, OP_APPENDQ | OP_PREPENDQ);
                let is_append = matches!(req.opcode, OP_APPEND | OP_APPENDQ);
                match store.get_mut(&req.key) {
                    Some(item) => {
                        if is_append {
                            item.value.extend_from_slice(&req.value);
                        } else {
                            let mut merged = req.value.clone();
                            merged.extend_from_slice(&item.value);
                            item.value = merged;
                        }
                        item.cas = next_cas;
                        next_cas += 1;
                        let cas = item.cas;
                        if !quiet {
                            write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, cas, &[], &[], &[]).await;
                        }
                    }
                    None => {
                        write_response(&mut stream, req.opcode, STATUS_NOT_STORED, req.opaque, 0, &[], &[], b"Not stored").await;
                    }
                }
            }
            OP_FLUSH | OP_FLUSHQ => {
                store.clear();
                if req.opcode == OP_FLUSH {
                    write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], &[]).await;
                }
            }
            OP_NOOP => {
                write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], &[]).await;
            }
            OP_VERSION => {
                write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], b"1.6.0-fake").await;
            }
            OP_STAT => {
                let entries: &[(&str, &str)] = if req.key.is_empty() {
                    &[("pid", "1"), ("total_items", "3")]
                } else {
                    &[("items:1:number", "3")]
                };
                for (k, v) in entries {
                    write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], k.as_bytes(), v.as_bytes()).await;
                }
                write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], &[]).await;
            }
            OP_QUIT | OP_QUITQ => {
                if req.opcode == OP_QUIT {
                    write_response(&mut stream, req.opcode, STATUS_OK, req.opaque, 0, &[], &[], &[]).await;
                }
                return;
            }
            other => panic!("fake server got unsupported opcode {:#x}", other),
        }
    }
}

/// Spawn [`run_fake_server`] on an ephemeral port and return its address.
/// Serves exactly one connection, then the listener is dropped. Enough
/// for tests that open a single [`crate::Connection`].
pub(crate) fn spawn_fake_server() -> SocketAddr {
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        smol::block_on(async move {
            let (addr, listener) = bind().await;
            addr_tx.send(addr).unwrap();
            if let Ok((stream, _)) = listener.accept().await {
                run_fake_server(stream).await;
            }
        });
    });
    addr_rx.recv().unwrap()
}

/// Like [`spawn_fake_server`], but keeps accepting new connections (each
/// with its own independent in-memory store) for the lifetime of the test
/// process, needed to exercise [`crate::Pool`]'s reconnect-on-terminal-
/// failure path, which opens a fresh TCP connection to the same address.
pub(crate) fn spawn_persistent_fake_server() -> SocketAddr {
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        smol::block_on(async move {
            let (addr, listener) = bind().await;
            addr_tx.send(addr).unwrap();
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        smol::spawn(run_fake_server(stream)).detach();
                    }
                    Err(_) => return,
                }
            }
        });
    });
    addr_rx.recv().unwrap()
}
