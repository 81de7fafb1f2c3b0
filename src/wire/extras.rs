use crate::code::Opcode;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::{self, Write};

/// Opcode-specific fixed-layout extras block.
#[derive(Debug, PartialEq, Clone)]
pub enum Extras {
    /// `get`/`getq`/`getk`/`getkq`/`delete`/`deleteq`/`append`/`prepend`
    /// (and their quiet variants)/`noop`/`version`/`quit`/`quitq`/`stat`
    /// requests, none of which carry extras.
    None,
    /// `set`/`add`/`replace` (and quiet variants).
    Store { flags: u32, expiration: u32 },
    /// `increment`/`decrement` (and quiet variants). `expiration ==
    /// 0xFFFF_FFFF` means "fail rather than create on miss".
    Counter {
        delta: u64,
        initial: u64,
        expiration: u32,
    },
    /// `flush`/`flushq`. An empty extras block on the wire means "flush
    /// now" (`expiration == 0`).
    Flush { expiration: u32 },
    /// A `get`-family response's extras: the stored flags.
    GetReply { flags: u32 },
}

impl Extras {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Store { .. } => 4 + 4,
            Self::Counter { .. } => 8 + 8 + 4,
            Self::Flush { .. } => 4,
            Self::GetReply { .. } => 4,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Self::None => {}
            Self::Store { flags, expiration } => {
                w.write_u32::<BigEndian>(*flags)?;
                w.write_u32::<BigEndian>(*expiration)?;
            }
            Self::Counter {
                delta,
                initial,
                expiration,
            } => {
                w.write_u64::<BigEndian>(*delta)?;
                w.write_u64::<BigEndian>(*initial)?;
                w.write_u32::<BigEndian>(*expiration)?;
            }
            Self::Flush { expiration } => {
                w.write_u32::<BigEndian>(*expiration)?;
            }
            Self::GetReply { flags } => {
                w.write_u32::<BigEndian>(*flags)?;
            }
        }
        Ok(())
    }

    /// Parse a response's extras block, sized by the header's
    /// `extras_len` and keyed by the opcode of the *request* this response
    /// answers (the response header itself only says how many extras bytes
    /// follow, not their shape).
    pub fn parse_reply(opcode: Opcode, mut buf: &[u8]) -> io::Result<Self> {
        if buf.is_empty() {
            return Ok(Self::None);
        }
        Ok(match opcode {
            Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => Self::GetReply {
                flags: buf.read_u32::<BigEndian>()?,
            },
            _ => Self::None,
        })
    }
}

/// Owned key/value payload alongside a parsed [`Extras`] block, split out of
/// a response body once the header's lengths are known.
#[derive(Debug, PartialEq, Clone)]
pub struct Body {
    pub extras: Extras,
    pub key: Bytes,
    pub value: Bytes,
}
