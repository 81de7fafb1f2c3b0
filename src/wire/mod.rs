mod extras;
mod header;

pub use extras::{Body, Extras};
pub use header::Header;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BytesMut;

/// Split a raw response body (`extras ‖ key ‖ value`) into its three parts
/// given the lengths carried in the header, and parse the extras block for
/// the opcode of the request this response answers.
pub fn split_body(
    header: &Header,
    request_opcode: crate::code::Opcode,
    mut raw: BytesMut,
) -> std::io::Result<Body> {
    let extras_buf = raw.split_to(header.extras_len as usize);
    let key = raw.split_to(header.key_len as usize).freeze();
    let value = raw.freeze();
    let extras = Extras::parse_reply(request_opcode, &extras_buf[..])?;
    Ok(Body { extras, key, value })
}

/// Read a big-endian `u64` out of an 8-byte slice (increment/decrement
/// response bodies).
pub fn read_u64_be(mut buf: &[u8]) -> std::io::Result<u64> {
    buf.read_u64::<BigEndian>()
}
