//! Fluent, configurable per-opcode builders. Each builder wraps a
//! [`Command`] and a borrowed [`Connection`]; chain `.cas()`/`.timeout()`/
//! `.flags()`/`.expires()`/`.initial_value()` as needed, then `.await` the
//! builder directly; it implements [`IntoFuture`].
//!
//! `Connection`'s own inherent methods (`get`, `set`, ...) cover the common
//! case with positional arguments; reach for these builders when a call
//! needs a CAS constraint or a non-default timeout.
use crate::command::Command;
use crate::connection::Connection;
use crate::error::Result;
use crate::responder::Reply;
use crate::version::{Counter, Value, Version};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::Duration;

macro_rules! impl_into_future {
    ($op:ident, $out:ty, $pat:pat => $expr:expr) => {
        impl<'a> IntoFuture for $op<'a> {
            type Output = Result<$out>;
            type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

            fn into_future(self) -> Self::IntoFuture {
                Box::pin(async move {
                    match self.conn.submit(self.command).await? {
                        $pat => $expr,
                        other => unreachable!("unexpected reply shape: {:?}", other),
                    }
                })
            }
        }
    };
}

/// `get`/`getq`/`getk`/`getkq`.
pub struct GetOp<'a> {
    conn: &'a Connection,
    command: Command,
}

impl<'a> GetOp<'a> {
    pub fn new(conn: &'a Connection, key: impl Into<Bytes>) -> Self {
        Self {
            conn,
            command: Command::get(key),
        }
    }

    /// Suppress the response on a miss; it only resolves once a later
    /// non-quiet command's response fences this connection.
    pub fn quiet(mut self, quiet: bool) -> Self {
        let keyed = matches!(self.command.reply_kind, crate::command::ReplyKind::Value { keyed: true });
        self.rebuild(quiet, keyed)
    }

    /// Request the key echoed back in the response (`getk`/`getkq`).
    pub fn keyed(mut self, keyed: bool) -> Self {
        let quiet = self.command.is_quiet();
        self.rebuild(quiet, keyed)
    }

    fn rebuild(mut self, quiet: bool, keyed: bool) -> Self {
        let key = std::mem::replace(&mut self.command.key, Bytes::new());
        let timeout = self.command.timeout;
        self.command = match (quiet, keyed) {
            (true, true) => Command::getkq(key),
            (true, false) => Command::get_quiet(key),
            (false, true) => Command::getk(key),
            (false, false) => Command::get(key),
        }
        .with_timeout(timeout);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command = self.command.with_timeout(timeout);
        self
    }
}

impl_into_future!(GetOp, Option<Value>, Reply::Value(v) => Ok(v));

/// `set`/`setq`.
pub struct SetOp<'a> {
    conn: &'a Connection,
    key: Bytes,
    value: Bytes,
    flags: u32,
    expiration: u32,
    cas: Version,
    quiet: bool,
    timeout: Option<Duration>,
}

impl<'a> SetOp<'a> {
    pub fn new(conn: &'a Connection, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            conn,
            key: key.into(),
            value: value.into(),
            flags: 0,
            expiration: 0,
            cas: Version::NONE,
            quiet: false,
            timeout: None,
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn expires(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn cas(mut self, cas: Version) -> Self {
        self.cas = cas;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_command(self) -> (&'a Connection, Command, bool) {
        let quiet = self.quiet;
        let mut command = if quiet {
            Command::set_quiet(self.key, self.value, self.flags, self.expiration, self.cas)
        } else {
            Command::set(self.key, self.value, self.flags, self.expiration, self.cas)
        };
        if let Some(timeout) = self.timeout {
            command = command.with_timeout(timeout);
        }
        (self.conn, command, quiet)
    }
}

impl<'a> IntoFuture for SetOp<'a> {
    type Output = Result<Version>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        let (conn, command, quiet) = self.into_command();
        Box::pin(async move {
            match conn.submit(command).await? {
                Reply::Version(v) => Ok(v),
                Reply::Unit if quiet => Ok(Version::NONE),
                other => unreachable!("unexpected reply shape: {:?}", other),
            }
        })
    }
}

macro_rules! store_op {
    ($op:ident, $make:ident, $make_quiet:ident) => {
        #[doc = concat!("`", stringify!($make), "`/`", stringify!($make_quiet), "`.")]
        pub struct $op<'a> {
            conn: &'a Connection,
            key: Bytes,
            value: Bytes,
            flags: u32,
            expiration: u32,
            quiet: bool,
            timeout: Option<Duration>,
        }

        impl<'a> $op<'a> {
            pub fn new(conn: &'a Connection, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
                Self {
                    conn,
                    key: key.into(),
                    value: value.into(),
                    flags: 0,
                    expiration: 0,
                    quiet: false,
                    timeout: None,
                }
            }

            pub fn flags(mut self, flags: u32) -> Self {
                self.flags = flags;
                self
            }

            pub fn expires(mut self, expiration: u32) -> Self {
                self.expiration = expiration;
                self
            }

            pub fn quiet(mut self, quiet: bool) -> Self {
                self.quiet = quiet;
                self
            }

            pub fn timeout(mut self, timeout: Duration) -> Self {
                self.timeout = Some(timeout);
                self
            }
        }

        impl<'a> IntoFuture for $op<'a> {
            type Output = Result<Version>;
            type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

            fn into_future(self) -> Self::IntoFuture {
                let quiet = self.quiet;
                let mut command = if quiet {
                    Command::$make_quiet(self.key, self.value, self.flags, self.expiration)
                } else {
                    Command::$make(self.key, self.value, self.flags, self.expiration)
                };
                if let Some(timeout) = self.timeout {
                    command = command.with_timeout(timeout);
                }
                let conn = self.conn;
                Box::pin(async move {
                    match conn.submit(command).await? {
                        Reply::Version(v) => Ok(v),
                        Reply::Unit if quiet => Ok(Version::NONE),
                        other => unreachable!("unexpected reply shape: {:?}", other),
                    }
                })
            }
        }
    };
}

store_op!(AddOp, add, add_quiet);
store_op!(ReplaceOp, replace, replace_quiet);

/// `delete`/`deleteq`.
pub struct DeleteOp<'a> {
    conn: &'a Connection,
    key: Bytes,
    cas: Version,
    quiet: bool,
    timeout: Option<Duration>,
}

impl<'a> DeleteOp<'a> {
    pub fn new(conn: &'a Connection, key: impl Into<Bytes>) -> Self {
        Self {
            conn,
            key: key.into(),
            cas: Version::NONE,
            quiet: false,
            timeout: None,
        }
    }

    pub fn cas(mut self, cas: Version) -> Self {
        self.cas = cas;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'a> IntoFuture for DeleteOp<'a> {
    type Output = Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        let mut command = if self.quiet {
            Command::delete_quiet(self.key, self.cas)
        } else {
            Command::delete(self.key, self.cas)
        };
        if let Some(timeout) = self.timeout {
            command = command.with_timeout(timeout);
        }
        let conn = self.conn;
        Box::pin(async move {
            match conn.submit(command).await? {
                Reply::Unit => Ok(()),
                other => unreachable!("unexpected reply shape: {:?}", other),
            }
        })
    }
}

macro_rules! counter_op {
    ($op:ident, $make:ident, $make_quiet:ident) => {
        #[doc = concat!("`", stringify!($make), "`/`", stringify!($make_quiet), "`.")]
        pub struct $op<'a> {
            conn: &'a Connection,
            key: Bytes,
            delta: u64,
            initial: u64,
            expiration: u32,
            cas: Version,
            quiet: bool,
            timeout: Option<Duration>,
        }

        impl<'a> $op<'a> {
            pub fn new(conn: &'a Connection, key: impl Into<Bytes>, delta: u64) -> Self {
                Self {
                    conn,
                    key: key.into(),
                    delta,
                    initial: 0,
                    expiration: 0,
                    cas: Version::NONE,
                    quiet: false,
                    timeout: None,
                }
            }

            /// Seed value used if the key does not exist yet.
            pub fn initial_value(mut self, initial: u64) -> Self {
                self.initial = initial;
                self
            }

            pub fn expires(mut self, expiration: u32) -> Self {
                self.expiration = expiration;
                self
            }

            pub fn cas(mut self, cas: Version) -> Self {
                self.cas = cas;
                self
            }

            pub fn quiet(mut self, quiet: bool) -> Self {
                self.quiet = quiet;
                self
            }

            pub fn timeout(mut self, timeout: Duration) -> Self {
                self.timeout = Some(timeout);
                self
            }
        }

        impl<'a> IntoFuture for $op<'a> {
            type Output = Result<Counter>;
            type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

            fn into_future(self) -> Self::IntoFuture {
                let quiet = self.quiet;
                let mut command = if quiet {
                    Command::$make_quiet(self.key, self.delta, self.initial, self.expiration, self.cas)
                } else {
                    Command::$make(self.key, self.delta, self.initial, self.expiration, self.cas)
                };
                if let Some(timeout) = self.timeout {
                    command = command.with_timeout(timeout);
                }
                let conn = self.conn;
                Box::pin(async move {
                    match conn.submit(command).await? {
                        Reply::Counter(c) => Ok(c),
                        Reply::Unit if quiet => Ok(Counter { value: 0, cas: Version::NONE }),
                        other => unreachable!("unexpected reply shape: {:?}", other),
                    }
                })
            }
        }
    };
}

counter_op!(IncrementOp, increment, increment_quiet);
counter_op!(DecrementOp, decrement, decrement_quiet);

macro_rules! concat_op {
    ($op:ident, $make:ident, $make_quiet:ident) => {
        #[doc = concat!("`", stringify!($make), "`/`", stringify!($make_quiet), "`.")]
        pub struct $op<'a> {
            conn: &'a Connection,
            key: Bytes,
            value: Bytes,
            cas: Version,
            quiet: bool,
            timeout: Option<Duration>,
        }

        impl<'a> $op<'a> {
            pub fn new(conn: &'a Connection, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
                Self {
                    conn,
                    key: key.into(),
                    value: value.into(),
                    cas: Version::NONE,
                    quiet: false,
                    timeout: None,
                }
            }

            pub fn cas(mut self, cas: Version) -> Self {
                self.cas = cas;
                self
            }

            pub fn quiet(mut self, quiet: bool) -> Self {
                self.quiet = quiet;
                self
            }

            pub fn timeout(mut self, timeout: Duration) -> Self {
                self.timeout = Some(timeout);
                self
            }
        }

        impl<'a> IntoFuture for $op<'a> {
            type Output = Result<Version>;
            type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

            fn into_future(self) -> Self::IntoFuture {
                let quiet = self.quiet;
                let mut command = if quiet {
                    Command::$make_quiet(self.key, self.value, self.cas)
                } else {
                    Command::$make(self.key, self.value, self.cas)
                };
                if let Some(timeout) = self.timeout {
                    command = command.with_timeout(timeout);
                }
                let conn = self.conn;
                Box::pin(async move {
                    match conn.submit(command).await? {
                        Reply::Version(v) => Ok(v),
                        Reply::Unit if quiet => Ok(Version::NONE),
                        other => unreachable!("unexpected reply shape: {:?}", other),
                    }
                })
            }
        }
    };
}

concat_op!(AppendOp, append, append_quiet);
concat_op!(PrependOp, prepend, prepend_quiet);

/// `flush`/`flushq`.
pub struct FlushOp<'a> {
    conn: &'a Connection,
    expiration: Option<u32>,
    quiet: bool,
    timeout: Option<Duration>,
}

impl<'a> FlushOp<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            expiration: None,
            quiet: false,
            timeout: None,
        }
    }

    pub fn expires(mut self, expiration: u32) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'a> IntoFuture for FlushOp<'a> {
    type Output = Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        let mut command = if self.quiet {
            Command::flush_quiet(self.expiration)
        } else {
            Command::flush(self.expiration)
        };
        if let Some(timeout) = self.timeout {
            command = command.with_timeout(timeout);
        }
        let conn = self.conn;
        Box::pin(async move {
            match conn.submit(command).await? {
                Reply::Unit => Ok(()),
                other => unreachable!("unexpected reply shape: {:?}", other),
            }
        })
    }
}

/// `stat`, optionally scoped to a sub-report (e.g. `"items"`).
pub struct StatOp<'a> {
    conn: &'a Connection,
    key: Option<Bytes>,
    timeout: Option<Duration>,
}

impl<'a> StatOp<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            key: None,
            timeout: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<Bytes>) -> Self {
        self.key = Some(kind.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'a> IntoFuture for StatOp<'a> {
    type Output = Result<BTreeMap<String, String>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        let mut command = Command::stat(self.key);
        if let Some(timeout) = self.timeout {
            command = command.with_timeout(timeout);
        }
        let conn = self.conn;
        Box::pin(async move {
            match conn.submit(command).await? {
                Reply::Stat(m) => Ok(m),
                other => unreachable!("unexpected reply shape: {:?}", other),
            }
        })
    }
}
