//! Immutable, per-opcode request builders.
use crate::code::Opcode;
use crate::version::Version;
use crate::wire::{Extras, Header};
use bytes::Bytes;
use std::time::Duration;

/// How the connection should interpret the matching response body once it
/// arrives, one shape per opcode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    Unit,
    Version,
    /// `keyed` is set for `getk`/`getkq`, whose response echoes the key.
    Value { keyed: bool },
    Counter,
    Text,
    Stat,
}

/// Default per-command deadline applied by the builders below; override
/// with [`Command::with_timeout`] before submitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully-formed, opaque-less request. [`crate::connection::Connection`]
/// assigns the opaque at submission time and serializes the command onto
/// the wire.
#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) opcode: Opcode,
    pub(crate) extras: Extras,
    pub(crate) key: Bytes,
    pub(crate) value: Bytes,
    pub(crate) cas: u64,
    pub(crate) timeout: Duration,
    pub(crate) reply_kind: ReplyKind,
}

impl Command {
    fn new(opcode: Opcode, extras: Extras, key: Bytes, value: Bytes, cas: u64, reply_kind: ReplyKind) -> Self {
        Self {
            opcode,
            extras,
            key,
            value,
            cas,
            timeout: DEFAULT_TIMEOUT,
            reply_kind,
        }
    }

    /// Override this command's per-command deadline, carried with the
    /// command rather than the connection.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub(crate) fn is_quiet(&self) -> bool {
        self.opcode.is_quiet()
    }

    /// Serialize this command for the given opaque: `magic ‖ opcode ‖
    /// key_len ‖ extras_len ‖ data_type(0) ‖ reserved(0) ‖ body_len ‖ opaque
    /// ‖ cas ‖ extras ‖ key ‖ value`.
    pub(crate) fn encode(&self, opaque: u32) -> Bytes {
        use std::io::Write;

        let header = Header::request(
            self.opcode,
            opaque,
            self.cas,
            self.key.len() as u16,
            self.extras.len() as u8,
            self.value.len() as u32,
        );
        let mut buf = Vec::with_capacity(
            Header::SIZE + self.extras.len() + self.key.len() + self.value.len(),
        );
        header.write_to(&mut buf).expect("write to Vec is infallible");
        self.extras.write_to(&mut buf).expect("write to Vec is infallible");
        buf.write_all(&self.key).expect("write to Vec is infallible");
        buf.write_all(&self.value).expect("write to Vec is infallible");
        Bytes::from(buf)
    }

    pub fn get(key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Get, Extras::None, key.into(), Bytes::new(), 0, ReplyKind::Value { keyed: false })
    }

    pub fn get_quiet(key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::GetQ, Extras::None, key.into(), Bytes::new(), 0, ReplyKind::Value { keyed: false })
    }

    pub fn getk(key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::GetK, Extras::None, key.into(), Bytes::new(), 0, ReplyKind::Value { keyed: true })
    }

    pub fn getkq(key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::GetKQ, Extras::None, key.into(), Bytes::new(), 0, ReplyKind::Value { keyed: true })
    }

    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::Set,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            cas.0,
            ReplyKind::Version,
        )
    }

    pub fn set_quiet(key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::SetQ,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            cas.0,
            ReplyKind::Unit,
        )
    }

    pub fn add(key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32) -> Self {
        Self::new(
            Opcode::Add,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            0,
            ReplyKind::Version,
        )
    }

    pub fn add_quiet(key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32) -> Self {
        Self::new(
            Opcode::AddQ,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            0,
            ReplyKind::Unit,
        )
    }

    pub fn replace(key: impl Into<Bytes>, value: impl Into<Bytes>, flags: u32, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::Replace,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            cas.0,
            ReplyKind::Version,
        )
    }

    pub fn replace_quiet(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        flags: u32,
        expiration: u32,
        cas: Version,
    ) -> Self {
        Self::new(
            Opcode::ReplaceQ,
            Extras::Store { flags, expiration },
            key.into(),
            value.into(),
            cas.0,
            ReplyKind::Unit,
        )
    }

    pub fn delete(key: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::Delete, Extras::None, key.into(), Bytes::new(), cas.0, ReplyKind::Unit)
    }

    pub fn delete_quiet(key: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::DeleteQ, Extras::None, key.into(), Bytes::new(), cas.0, ReplyKind::Unit)
    }

    /// `expiration == 0xFFFF_FFFF` means "fail rather than create" on a
    /// miss.
    pub fn increment(key: impl Into<Bytes>, delta: u64, initial: u64, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::Increment,
            Extras::Counter { delta, initial, expiration },
            key.into(),
            Bytes::new(),
            cas.0,
            ReplyKind::Counter,
        )
    }

    pub fn increment_quiet(key: impl Into<Bytes>, delta: u64, initial: u64, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::IncrementQ,
            Extras::Counter { delta, initial, expiration },
            key.into(),
            Bytes::new(),
            cas.0,
            ReplyKind::Unit,
        )
    }

    pub fn decrement(key: impl Into<Bytes>, delta: u64, initial: u64, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::Decrement,
            Extras::Counter { delta, initial, expiration },
            key.into(),
            Bytes::new(),
            cas.0,
            ReplyKind::Counter,
        )
    }

    pub fn decrement_quiet(key: impl Into<Bytes>, delta: u64, initial: u64, expiration: u32, cas: Version) -> Self {
        Self::new(
            Opcode::DecrementQ,
            Extras::Counter { delta, initial, expiration },
            key.into(),
            Bytes::new(),
            cas.0,
            ReplyKind::Unit,
        )
    }

    pub fn append(key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::Append, Extras::None, key.into(), value.into(), cas.0, ReplyKind::Version)
    }

    pub fn append_quiet(key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::AppendQ, Extras::None, key.into(), value.into(), cas.0, ReplyKind::Unit)
    }

    pub fn prepend(key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::Prepend, Extras::None, key.into(), value.into(), cas.0, ReplyKind::Version)
    }

    pub fn prepend_quiet(key: impl Into<Bytes>, value: impl Into<Bytes>, cas: Version) -> Self {
        Self::new(Opcode::PrependQ, Extras::None, key.into(), value.into(), cas.0, ReplyKind::Unit)
    }

    /// `expiration = None` serializes an empty extras block, meaning "flush
    /// now".
    pub fn flush(expiration: Option<u32>) -> Self {
        let extras = match expiration {
            Some(expiration) => Extras::Flush { expiration },
            None => Extras::None,
        };
        Self::new(Opcode::Flush, extras, Bytes::new(), Bytes::new(), 0, ReplyKind::Unit)
    }

    pub fn flush_quiet(expiration: Option<u32>) -> Self {
        let extras = match expiration {
            Some(expiration) => Extras::Flush { expiration },
            None => Extras::None,
        };
        Self::new(Opcode::FlushQ, extras, Bytes::new(), Bytes::new(), 0, ReplyKind::Unit)
    }

    pub fn noop() -> Self {
        Self::new(Opcode::NoOp, Extras::None, Bytes::new(), Bytes::new(), 0, ReplyKind::Unit)
    }

    pub fn version() -> Self {
        Self::new(Opcode::Version, Extras::None, Bytes::new(), Bytes::new(), 0, ReplyKind::Text)
    }

    pub fn quit() -> Self {
        Self::new(Opcode::Quit, Extras::None, Bytes::new(), Bytes::new(), 0, ReplyKind::Unit)
    }

    pub fn quit_quiet() -> Self {
        Self::new(Opcode::QuitQ, Extras::None, Bytes::new(), Bytes::new(), 0, ReplyKind::Unit)
    }

    /// `key = None` requests the general stats dump; `Some(kind)` selects a
    /// stats sub-report (e.g. `"items"`).
    pub fn stat(key: Option<impl Into<Bytes>>) -> Self {
        let key = key.map(Into::into).unwrap_or_default();
        Self::new(Opcode::Stat, Extras::None, key, Bytes::new(), 0, ReplyKind::Stat)
    }
}
