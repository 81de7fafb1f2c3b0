use crate::error::ProtoError;
use crate::Result;
use num_derive::FromPrimitive;

/// Memcached binary protocol opcodes this client speaks.
///
/// This is the closed set the client exposes operations for. The real wire
/// format defines many more (touch, GAT, SASL, range ops, TAP, vbucket
/// admin, ...) but nothing here emits or expects them, so they're left out
/// rather than carried as dead surface.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, FromPrimitive)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    NoOp = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    IncrementQ = 0x15,
    DecrementQ = 0x16,
    QuitQ = 0x17,
    FlushQ = 0x18,
    AppendQ = 0x19,
    PrependQ = 0x1a,
}

impl Opcode {
    /// Quiet opcodes suppress their successful response; `getq`/`getkq` are
    /// quiet-on-miss only (a hit still produces a normal reply).
    #[inline]
    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Self::GetQ
                | Self::GetKQ
                | Self::SetQ
                | Self::AddQ
                | Self::ReplaceQ
                | Self::DeleteQ
                | Self::IncrementQ
                | Self::DecrementQ
                | Self::QuitQ
                | Self::FlushQ
                | Self::AppendQ
                | Self::PrependQ
        )
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, FromPrimitive)]
pub enum Magic {
    Request = 0x80,
    Response = 0x81,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, FromPrimitive)]
#[non_exhaustive]
pub enum Status {
    NoError = 0x00,
    KeyNotFound = 0x01,
    KeyExists = 0x02,
    ValueTooLarge = 0x03,
    InvalidArguments = 0x04,
    ItemNotStored = 0x05,
    NonNumericValue = 0x06,
    UnknownCommand = 0x81,
    OutOfMemory = 0x82,
}

impl Status {
    pub fn desc(&self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::KeyNotFound => "key not found",
            Self::KeyExists => "key exists",
            Self::ValueTooLarge => "value too large",
            Self::InvalidArguments => "invalid arguments",
            Self::ItemNotStored => "item not stored",
            Self::NonNumericValue => "incr/decr on non-numeric value",
            Self::UnknownCommand => "unknown command",
            Self::OutOfMemory => "out of memory",
        }
    }

    pub fn ok_or(self, detail: Option<String>) -> Result<()> {
        match self {
            Self::NoError => Ok(()),
            status => Err(ProtoError::from_status(status, detail).into()),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::NoError
    }
}
