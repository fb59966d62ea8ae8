// Length-delimited packet framing over any byte stream.
//
// Wire format for one packet: a 4-byte big-endian length prefix covering the
// body, then the body itself, which is a 1-byte packet id followed by the
// payload produced by `codec.rs`. Both `write_packet` and `read_packet` deal
// in raw ids and payload bytes; the typed views live in `message.rs`.
//
// `MAX_FRAME_SIZE` (32 MB) protects against unbounded allocation from
// malformed length prefixes. World snapshots sent to joining players are the
// largest expected frames.

use std::io::{self, Read, Write};

/// Maximum allowed frame body size (32 MB), packet id included.
pub const MAX_FRAME_SIZE: u32 = 32 * 1024 * 1024;

/// Write one framed packet: length, id, payload. Flushes the writer.
pub fn write_packet<W: Write>(writer: &mut W, packet_id: u8, payload: &[u8]) -> io::Result<()> {
    let body_len = payload.len() + 1;
    let len = match u32::try_from(body_len) {
        Ok(len) if len <= MAX_FRAME_SIZE => len,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame too large: {body_len} bytes (max {MAX_FRAME_SIZE})"),
            ));
        }
    };
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&[packet_id])?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed packet, returning `(packet_id, payload)`.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame and
/// `InvalidData` for an empty body or a length above `MAX_FRAME_SIZE`.
pub fn read_packet<R: Read>(reader: &mut R) -> io::Result<(u8, Vec<u8>)> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut id = [0u8; 1];
    reader.read_exact(&mut id)?;
    let mut payload = vec![0u8; len as usize - 1];
    reader.read_exact(&mut payload)?;
    Ok((id[0], payload))
}
