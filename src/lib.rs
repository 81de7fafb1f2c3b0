//! An asynchronous client for the memcached binary protocol.
//!
//! [`Connection`] owns a single pipelined TCP connection and exposes one
//! async method per opcode. [`ops`] supplies fluent, configurable builders
//! (CAS constraints, per-call timeouts) over the same commands. [`Pool`]
//! routes by key across a fixed number of lazily-opened connections to one
//! address.
//!
//! ```no_run
//! use memcake::{Connection, Version};
//!
//! # async fn run() -> memcake::Result<()> {
//! let conn = Connection::connect("127.0.0.1:11211".parse().unwrap()).await?;
//! conn.set("hello", "world", 0, 0, Version::NONE).await?;
//! let value = conn.get("hello").await?;
//! assert_eq!(value.unwrap().data.as_ref(), b"world");
//! # Ok(())
//! # }
//! ```
mod code;
mod command;
mod connection;
mod error;
mod pool;
mod responder;
#[cfg(test)]
mod test_support;
mod version;
mod wire;

pub mod ops;

pub use code::{Magic, Opcode, Status};
pub use command::{Command, DEFAULT_TIMEOUT};
pub use connection::Connection;
pub use error::{Error, ProtoError, ProtocolError, Result};
pub use pool::Pool;
pub use responder::Reply;
pub use version::{Counter, Value, Version};
