//! [Memcached Binary Protocol](https://github.com/memcached/memcached/wiki/BinaryProtocolRevamped)
//! 24-byte header framing.
use crate::code::{Magic, Opcode};
use crate::error::ProtocolError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{self, Write};

// Byte/     0       |       1       |       2       |       3       |
//    /              |               |               |               |
//   |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//   +---------------+---------------+---------------+---------------+
//  0| Magic         | Opcode        | Key length                    |
//   +---------------+---------------+---------------+---------------+
//  4| Extras length | Data type     | vbucket id / status           |
//   +---------------+---------------+---------------+---------------+
//  8| Total body length                                             |
//   +---------------+---------------+---------------+---------------+
// 12| Opaque                                                        |
//   +---------------+---------------+---------------+---------------+
// 16| CAS                                                           |
//   |                                                               |
//   +---------------+---------------+---------------+---------------+
//   Total 24 bytes
#[derive(Debug, PartialEq, Clone)]
pub struct Header {
    pub magic: Magic,
    pub opcode: Opcode,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// Request: reserved (always 0 here, this client has no vbucket
    /// routing). Response: status code.
    pub vbucket_id_or_status: u16,
    /// `key_len + extras_len + value_len`
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub const SIZE: usize = 24;

    pub fn request(opcode: Opcode, opaque: u32, cas: u64, key_len: u16, extras_len: u8, value_len: u32) -> Self {
        Self {
            magic: Magic::Request,
            opcode,
            key_len,
            extras_len,
            data_type: 0,
            vbucket_id_or_status: 0,
            body_len: extras_len as u32 + key_len as u32 + value_len,
            opaque,
            cas,
        }
    }

    pub fn status(&self) -> Result<crate::code::Status, ProtocolError> {
        crate::code::Status::from_u16(self.vbucket_id_or_status)
            .ok_or(ProtocolError::UnknownStatus(self.vbucket_id_or_status))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.magic as u8)?;
        w.write_u8(self.opcode as u8)?;
        w.write_u16::<BigEndian>(self.key_len)?;
        w.write_u8(self.extras_len)?;
        w.write_u8(self.data_type)?;
        w.write_u16::<BigEndian>(self.vbucket_id_or_status)?;
        w.write_u32::<BigEndian>(self.body_len)?;
        w.write_u32::<BigEndian>(self.opaque)?;
        w.write_u64::<BigEndian>(self.cas)?;
        Ok(())
    }

    /// Parse a 24-byte header buffer. Fails with [`ProtocolError`] rather
    /// than a bare `io::Error` on a bad magic byte or unrecognized opcode,
    /// since both are invariant violations this client treats as terminal
    /// rather than as a permissive fallthrough.
    pub fn parse(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let magic_byte = buf.read_u8().expect("24-byte header buffer");
        let magic = Magic::from_u8(magic_byte).ok_or(ProtocolError::BadMagic(magic_byte))?;
        let opcode_byte = buf.read_u8().expect("24-byte header buffer");
        let opcode =
            Opcode::from_u8(opcode_byte).ok_or(ProtocolError::UnknownOpcode(opcode_byte))?;
        let key_len = buf.read_u16::<BigEndian>().expect("24-byte header buffer");
        let extras_len = buf.read_u8().expect("24-byte header buffer");
        let data_type = buf.read_u8().expect("24-byte header buffer");
        let vbucket_id_or_status = buf.read_u16::<BigEndian>().expect("24-byte header buffer");
        let body_len = buf.read_u32::<BigEndian>().expect("24-byte header buffer");
        let opaque = buf.read_u32::<BigEndian>().expect("24-byte header buffer");
        let cas = buf.read_u64::<BigEndian>().expect("24-byte header buffer");

        let header_len = extras_len as u32 + key_len as u32;
        if body_len < header_len {
            return Err(ProtocolError::BodyLengthMismatch { body_len, header_len });
        }

        Ok(Self {
            magic,
            opcode,
            key_len,
            extras_len,
            data_type,
            vbucket_id_or_status,
            body_len,
            opaque,
            cas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_write_and_parse() {
        let header = Header::request(Opcode::Set, 0x42, 7, 3, 8, 5);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Header::SIZE);
        let parsed = Header::parse(&buf).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; Header::SIZE];
        buf[0] = 0x7f;
        assert!(matches!(
            Header::parse(&buf),
            Err(ProtocolError::BadMagic(0x7f))
        ));
    }

    #[test]
    fn rejects_body_shorter_than_extras_plus_key() {
        let mut header = Header::request(Opcode::Set, 1, 0, 3, 8, 5);
        header.body_len = 2; // shorter than extras_len + key_len = 11
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert!(matches!(
            Header::parse(&buf),
            Err(ProtocolError::BodyLengthMismatch { .. })
        ));
    }
}
