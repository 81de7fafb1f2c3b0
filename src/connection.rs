//! The connection state machine: owns the socket, the opaque allocator,
//! the in-flight map, the write queue, the quiet buffer, and the
//! terminal-error slot. One reader task and one writer task run for the
//! lifetime of the connection.
use crate::code::{Opcode, Status};
use crate::command::{Command, ReplyKind};
use crate::error::{Error, ProtoError, ProtocolError, Result};
use crate::responder::{self, Reply, StatAccumulator};
use crate::version::Version;
use crate::wire::{self, Header};

use bytes::{Bytes, BytesMut};
use futures_channel::oneshot;
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;
use smol::{Task, Timer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Entry {
    seq: u64,
    quiet: bool,
    opcode: Opcode,
    reply_kind: ReplyKind,
    completion: oneshot::Sender<Result<Reply>>,
    stat_acc: Option<StatAccumulator>,
}

#[derive(Default)]
struct State {
    in_flight: HashMap<u32, Entry>,
    /// `(submission sequence, opaque)` in FIFO submission order. Sequence
    /// numbers, not the wrapping 32-bit opaque, decide fencing order.
    quiet_queue: VecDeque<(u64, u32)>,
    /// Opaques whose command timed out locally but whose responder wasn't
    /// stolen (a late arrival for one of these is a benign no-op rather
    /// than a protocol error, since a command can time out locally just
    /// before the server's answer lands on the wire).
    abandoned: HashSet<u32>,
    any_timeouts: bool,
    terminal: Option<Arc<Error>>,
}

/// A single pipelined connection to a memcached server.
///
/// Cloning is not supported, so wrap in `Arc` (as [`crate::pool::Pool`] does)
/// to share a connection across tasks. All `&self` methods are safe to call
/// concurrently; submission is thread-safe.
pub struct Connection {
    write_tx: smol::channel::Sender<Bytes>,
    state: Arc<Mutex<State>>,
    next_opaque: AtomicU32,
    next_seq: AtomicU64,
    reader_task: Option<Task<()>>,
    writer_task: Option<Task<()>>,
}

impl Connection {
    /// Open a new TCP connection and start its reader/writer tasks.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(%addr, "memcached connection established");
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (write_tx, write_rx) = smol::channel::unbounded::<Bytes>();
        let state = Arc::new(Mutex::new(State::default()));

        let writer_task = smol::spawn(Self::run_writer(stream.clone(), write_rx, state.clone()));
        let reader_task = smol::spawn(Self::run_reader(stream, state.clone()));

        Self {
            write_tx,
            state,
            next_opaque: AtomicU32::new(0),
            next_seq: AtomicU64::new(0),
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }

    async fn run_writer(
        mut stream: TcpStream,
        write_rx: smol::channel::Receiver<Bytes>,
        state: Arc<Mutex<State>>,
    ) {
        while let Ok(bytes) = write_rx.recv().await {
            if let Err(err) = stream.write_all(&bytes).await {
                Self::fail_terminal(&state, Error::Io(err));
                return;
            }
            if let Err(err) = stream.flush().await {
                Self::fail_terminal(&state, Error::Io(err));
                return;
            }
        }
    }

    async fn run_reader(mut stream: TcpStream, state: Arc<Mutex<State>>) {
        loop {
            let mut header_buf = [0u8; Header::SIZE];
            if let Err(err) = stream.read_exact(&mut header_buf).await {
                Self::fail_terminal(&state, Error::Io(err));
                return;
            }
            let header = match Header::parse(&header_buf) {
                Ok(header) => header,
                Err(err) => {
                    Self::fail_terminal(&state, Error::Protocol(err));
                    return;
                }
            };

            let mut raw = BytesMut::with_capacity(header.body_len as usize);
            // SAFETY: the buffer is fully overwritten by `read_exact` below
            // before any of it is read back; this is the same pattern the
            // rest of this crate's wire layer uses to size response bodies.
            unsafe {
                raw.set_len(header.body_len as usize);
            }
            if let Err(err) = stream.read_exact(&mut raw[..]).await {
                Self::fail_terminal(&state, Error::Io(err));
                return;
            }

            if let Err(err) = Self::dispatch(&state, header, raw) {
                Self::fail_terminal(&state, err);
                return;
            }
        }
    }

    /// Handle one fully-read response: fence the quiet buffer if this is a
    /// non-quiet opcode's response, then complete (or accumulate, for
    /// `stat`) the matching in-flight responder.
    fn dispatch(state: &Arc<Mutex<State>>, header: Header, raw: BytesMut) -> Result<()> {
        let opaque = header.opaque;
        let mut guard = state.lock().unwrap();

        let (seq, request_opcode) = match guard.in_flight.get(&opaque) {
            Some(entry) => (entry.seq, entry.opcode),
            None => {
                if guard.abandoned.remove(&opaque) || guard.any_timeouts {
                    tracing::trace!(opaque, "discarding response for abandoned/unknown opaque");
                    return Ok(());
                }
                return Err(Error::Protocol(ProtocolError::UnknownOpaque(opaque)));
            }
        };

        if !request_opcode.is_quiet() {
            Self::drain_quiet_queue_locked(&mut guard, seq);
        }

        let status = header.status()?;
        if status != Status::NoError {
            if let Some(entry) = guard.in_flight.remove(&opaque) {
                if entry.quiet {
                    guard.quiet_queue.retain(|&(_, o)| o != opaque);
                }
                // A `get`/`getk` miss is reported on the wire as
                // `KeyNotFound`, but this client's contract is `Option`, not
                // an exception, for that one status on that one opcode
                // family. Everything else (including a `getq`/`getkq` miss,
                // which never reaches this branch since the server sends no
                // response for those at all) still surfaces as a status
                // error.
                let reply = if status == Status::KeyNotFound && matches!(entry.reply_kind, ReplyKind::Value { .. }) {
                    Ok(Reply::Value(None))
                } else {
                    let detail = if raw.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(&raw).into_owned())
                    };
                    Err(Error::Status(ProtoError::from_status(status, detail)))
                };
                let _ = entry.completion.send(reply);
            }
            return Ok(());
        }

        if matches!(
            guard.in_flight.get(&opaque).map(|e| e.reply_kind),
            Some(ReplyKind::Stat)
        ) {
            let body = wire::split_body(&header, request_opcode, raw)?;
            let entry = guard.in_flight.get_mut(&opaque).expect("checked above");
            let acc = entry.stat_acc.get_or_insert_with(StatAccumulator::default);
            if let Some(map) = acc.push(body) {
                let entry = guard.in_flight.remove(&opaque).expect("checked above");
                let _ = entry.completion.send(Ok(Reply::Stat(map)));
            }
            return Ok(());
        }

        let entry = guard.in_flight.remove(&opaque).expect("looked up above");
        if entry.quiet {
            guard.quiet_queue.retain(|&(_, o)| o != opaque);
        }
        let body = wire::split_body(&header, request_opcode, raw)?;
        let reply = match entry.reply_kind {
            ReplyKind::Unit => Reply::Unit,
            ReplyKind::Version => Reply::Version(Version(header.cas)),
            ReplyKind::Value { keyed } => {
                Reply::Value(Some(responder::parse_value(body, Version(header.cas), keyed)))
            }
            ReplyKind::Counter => Reply::Counter(responder::parse_counter(body, Version(header.cas))?),
            ReplyKind::Text => Reply::Text(responder::parse_text(body)),
            ReplyKind::Stat => unreachable!("handled above"),
        };
        let _ = entry.completion.send(Ok(reply));
        Ok(())
    }

    /// Pop and complete every quiet responder in the buffer submitted
    /// strictly before `fence_seq`, in submission order.
    fn drain_quiet_queue_locked(state: &mut State, fence_seq: u64) {
        while let Some(&(seq, opaque)) = state.quiet_queue.front() {
            if seq >= fence_seq {
                break;
            }
            state.quiet_queue.pop_front();
            if let Some(entry) = state.in_flight.remove(&opaque) {
                let reply = match entry.reply_kind {
                    ReplyKind::Value { .. } => Reply::Value(None),
                    _ => Reply::Unit,
                };
                let _ = entry.completion.send(Ok(reply));
            }
        }
    }

    fn fail_terminal(state: &Arc<Mutex<State>>, err: Error) {
        let mut guard = state.lock().unwrap();
        if guard.terminal.is_some() {
            return;
        }
        let err = Arc::new(err);
        tracing::warn!(error = %err, "memcached connection failed; failing all in-flight requests");
        guard.terminal = Some(err.clone());
        for (_, entry) in guard.in_flight.drain() {
            let _ = entry.completion.send(Err(Error::Terminal(err.clone())));
        }
        guard.quiet_queue.clear();
        guard.abandoned.clear();
    }

    fn mark_closed(state: &Arc<Mutex<State>>) {
        let mut guard = state.lock().unwrap();
        if guard.terminal.is_some() {
            return;
        }
        let err = Arc::new(Error::Closed);
        tracing::debug!("memcached connection closed");
        guard.terminal = Some(err.clone());
        for (_, entry) in guard.in_flight.drain() {
            let _ = entry.completion.send(Err(Error::Terminal(err.clone())));
        }
        guard.quiet_queue.clear();
    }

    /// `true` once this connection's terminal-error slot is set. A
    /// terminally-failed or closed connection accepts no further
    /// submissions.
    pub fn is_terminal(&self) -> bool {
        self.state.lock().unwrap().terminal.is_some()
    }

    /// Submit a command and wait for its reply, honoring the command's own
    /// deadline.
    pub(crate) async fn submit(&self, command: Command) -> Result<Reply> {
        if let Some(err) = self.state.lock().unwrap().terminal.clone() {
            return Err(Error::Terminal(err));
        }

        let opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let quiet = command.is_quiet();
        let reply_kind = command.reply_kind;
        let opcode = command.opcode;
        let timeout = command.timeout;
        let bytes = command.encode(opaque);
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.state.lock().unwrap();
            if let Some(err) = &guard.terminal {
                return Err(Error::Terminal(err.clone()));
            }
            guard.in_flight.insert(
                opaque,
                Entry {
                    seq,
                    quiet,
                    opcode,
                    reply_kind,
                    completion: tx,
                    stat_acc: None,
                },
            );
            if quiet {
                guard.quiet_queue.push_back((seq, opaque));
            }
        }

        if self.write_tx.send(bytes).await.is_err() {
            let terminal = self.state.lock().unwrap().terminal.clone();
            return Err(terminal.map(Error::Terminal).unwrap_or(Error::Closed));
        }

        let reply = futures_lite::future::or(
            async { rx.await.unwrap_or(Err(Error::Closed)) },
            async move {
                Timer::after(timeout).await;
                Err(Error::Timeout(timeout))
            },
        )
        .await;

        if matches!(reply, Err(Error::Timeout(_))) {
            let mut guard = self.state.lock().unwrap();
            guard.any_timeouts = true;
            if guard.in_flight.remove(&opaque).is_some() {
                guard.quiet_queue.retain(|&(_, o)| o != opaque);
                guard.abandoned.insert(opaque);
            }
        }

        reply
    }

    async fn submit_unit(&self, command: Command) -> Result<()> {
        match self.submit(command).await? {
            Reply::Unit => Ok(()),
            other => unreachable!("command produced unexpected reply shape: {:?}", other),
        }
    }

    /// `get`/`getq`/`getk`/`getkq`.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<crate::Value>> {
        match self.submit(Command::get(key)).await? {
            Reply::Value(v) => Ok(v),
            other => unreachable!("get produced unexpected reply shape: {:?}", other),
        }
    }

    /// Silent on miss; only resolves once a later non-quiet command's
    /// response fences this connection.
    pub async fn get_quiet(&self, key: impl Into<Bytes>) -> Result<Option<crate::Value>> {
        match self.submit(Command::get_quiet(key)).await? {
            Reply::Value(v) => Ok(v),
            other => unreachable!("getq produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn getk(&self, key: impl Into<Bytes>) -> Result<Option<crate::Value>> {
        match self.submit(Command::getk(key)).await? {
            Reply::Value(v) => Ok(v),
            other => unreachable!("getk produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn getkq(&self, key: impl Into<Bytes>) -> Result<Option<crate::Value>> {
        match self.submit(Command::getkq(key)).await? {
            Reply::Value(v) => Ok(v),
            other => unreachable!("getkq produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn set(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        flags: u32,
        expiration: u32,
        cas: Version,
    ) -> Result<Version> {
        match self.submit(Command::set(key, value, flags, expiration, cas)).await? {
            Reply::Version(v) => Ok(v),
            other => unreachable!("set produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn set_quiet(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        flags: u32,
        expiration: u32,
        cas: Version,
    ) -> Result<()> {
        self.submit_unit(Command::set_quiet(key, value, flags, expiration, cas)).await
    }

    pub async fn add(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32) -> Result<Version> {
        match self.submit(Command::add(key, value, flags, expiration)).await? {
            Reply::Version(v) => Ok(v),
            other => unreachable!("add produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn add_quiet(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32) -> Result<()> {
        self.submit_unit(Command::add_quiet(key, value, flags, expiration)).await
    }

    pub async fn replace(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        flags: u32,
        expiration: u32,
        cas: Version,
    ) -> Result<Version> {
        match self
            .submit(Command::replace(key, value, flags, expiration, cas))
            .await?
        {
            Reply::Version(v) => Ok(v),
            other => unreachable!("replace produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn replace_quiet(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        flags: u32,
        expiration: u32,
        cas: Version,
    ) -> Result<()> {
        self.submit_unit(Command::replace_quiet(key, value, flags, expiration, cas))
            .await
    }

    pub async fn delete(&self, key: impl Into<Bytes>, cas: Version) -> Result<()> {
        self.submit_unit(Command::delete(key, cas)).await
    }

    pub async fn delete_quiet(&self, key: impl Into<Bytes>, cas: Version) -> Result<()> {
        self.submit_unit(Command::delete_quiet(key, cas)).await
    }

    pub async fn increment(
        &self,
        key: impl Into<Bytes>,
        delta: u64,
        initial: u64,
        expiration: u32,
        cas: Version,
    ) -> Result<crate::Counter> {
        match self
            .submit(Command::increment(key, delta, initial, expiration, cas))
            .await?
        {
            Reply::Counter(c) => Ok(c),
            other => unreachable!("increment produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn increment_quiet(
        &self,
        key: impl Into<Bytes>,
        delta: u64,
        initial: u64,
        expiration: u32,
        cas: Version,
    ) -> Result<()> {
        self.submit_unit(Command::increment_quiet(key, delta, initial, expiration, cas))
            .await
    }

    pub async fn decrement(
        &self,
        key: impl Into<Bytes>,
        delta: u64,
        initial: u64,
        expiration: u32,
        cas: Version,
    ) -> Result<crate::Counter> {
        match self
            .submit(Command::decrement(key, delta, initial, expiration, cas))
            .await?
        {
            Reply::Counter(c) => Ok(c),
            other => unreachable!("decrement produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn decrement_quiet(
        &self,
        key: impl Into<Bytes>,
        delta: u64,
        initial: u64,
        expiration: u32,
        cas: Version,
    ) -> Result<()> {
        self.submit_unit(Command::decrement_quiet(key, delta, initial, expiration, cas))
            .await
    }

    pub async fn append(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Result<Version> {
        match self.submit(Command::append(key, value, cas)).await? {
            Reply::Version(v) => Ok(v),
            other => unreachable!("append produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn append_quiet(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Result<()> {
        self.submit_unit(Command::append_quiet(key, value, cas)).await
    }

    pub async fn prepend(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Result<Version> {
        match self.submit(Command::prepend(key, value, cas)).await? {
            Reply::Version(v) => Ok(v),
            other => unreachable!("prepend produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn prepend_quiet(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Result<()> {
        self.submit_unit(Command::prepend_quiet(key, value, cas)).await
    }

    pub async fn flush(&self, expiration: Option<u32>) -> Result<()> {
        self.submit_unit(Command::flush(expiration)).await
    }

    pub async fn flush_quiet(&self, expiration: Option<u32>) -> Result<()> {
        self.submit_unit(Command::flush_quiet(expiration)).await
    }

    pub async fn noop(&self) -> Result<()> {
        self.submit_unit(Command::noop()).await
    }

    pub async fn version(&self) -> Result<String> {
        match self.submit(Command::version()).await? {
            Reply::Text(s) => Ok(s),
            other => unreachable!("version produced unexpected reply shape: {:?}", other),
        }
    }

    pub async fn stat(&self, kind: Option<impl Into<Bytes>>) -> Result<std::collections::BTreeMap<String, String>> {
        match self.submit(Command::stat(kind)).await? {
            Reply::Stat(m) => Ok(m),
            other => unreachable!("stat produced unexpected reply shape: {:?}", other),
        }
    }

    /// Send `quit`, then mark the connection closed so further submissions
    /// fail with [`Error::Closed`]: `open --close()--> closing --drain-->
    /// terminal`.
    pub async fn close(&self) -> Result<()> {
        let result = self.submit_unit(Command::quit()).await;
        Self::mark_closed(&self.state);
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropping the tasks cancels them, which drops their TcpStream
        // clone and, once the last clone goes, closes the socket.
        self.reader_task.take();
        self.writer_task.take();
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Connection>();
}
