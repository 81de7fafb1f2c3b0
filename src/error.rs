use crate::Status;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of this crate.
///
/// [`Error::Status`] affects a single in-flight command only.
/// [`Error::Io`] and [`Error::Protocol`] are terminal for the connection
/// that produced them, and every other in-flight command on that connection
/// is completed with [`Error::Terminal`], a cheaply cloneable wrapper around
/// the same underlying cause. [`Error::Timeout`] never poisons the
/// connection: the server may still reply, and the reader discards the
/// late arrival. [`Error::Closed`] is returned for submission to a
/// connection whose terminal slot is already set, or after an explicit
/// `close()`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Status(#[from] ProtoError),
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting {0:?} for a response")]
    Timeout(Duration),
    #[error("connection is closed")]
    Closed,
    #[error("connection failed, terminating all in-flight requests: {0}")]
    Terminal(Arc<Error>),
}

impl Error {
    /// Whether this error, if produced on a connection, should be treated
    /// as terminal for that connection (network and protocol errors are
    /// terminal, status and timeout errors are not).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-zero status reported by the server for a single command.
#[derive(Debug, Error)]
pub struct ProtoError {
    status: Status,
    desc: &'static str,
    detail: Option<String>,
}

impl ProtoError {
    pub(crate) fn from_status(status: Status, detail: Option<String>) -> Self {
        Self {
            status,
            desc: status.desc(),
            detail,
        }
    }

    /// The error description text the server sent back, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The status code reported by the server.
    pub fn status(&self) -> Status {
        self.status
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.desc)?;
        match self.detail {
            Some(ref s) => write!(f, " ({})", s),
            None => Ok(()),
        }
    }
}

/// A violation of the wire-protocol invariants this client relies on to
/// keep the in-flight map and quiet buffer coherent. Always terminal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected request magic 0x80/response magic 0x81, got {0:#x}")]
    BadMagic(u8),
    #[error("unrecognized opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("unrecognized status code {0:#x}")]
    UnknownStatus(u16),
    #[error("response opaque {0:#x} does not match any in-flight or abandoned request")]
    UnknownOpaque(u32),
    #[error("total body length {body_len} shorter than extras+key length {header_len}")]
    BodyLengthMismatch { body_len: u32, header_len: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_protocol_errors_are_terminal_others_are_not() {
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom")).is_terminal());
        assert!(Error::Protocol(ProtocolError::BadMagic(0x7f)).is_terminal());
        assert!(!Error::Timeout(Duration::from_secs(1)).is_terminal());
        assert!(!Error::Closed.is_terminal());
        assert!(!Error::Status(ProtoError::from_status(Status::KeyExists, None)).is_terminal());
    }

    #[test]
    fn proto_error_display_includes_server_detail_when_present() {
        let err = ProtoError::from_status(Status::KeyNotFound, Some("gone".into()));
        assert_eq!(err.to_string(), "key not found (gone)");
        let err = ProtoError::from_status(Status::KeyNotFound, None);
        assert_eq!(err.to_string(), "key not found");
    }
}
