// Length-delimited framing over TCP.
//
// Every message in either direction is a 4-byte big-endian length followed by
// that many payload bytes. The payload is whatever `codec.rs` produced; this
// module never looks inside it. A zero-length frame is legal and is how the
// relay acknowledges a report that matched nobody.
//
// Both directions take a caller-supplied size limit. Reports are small
// (`MAX_REPORT_SIZE`); replies use `MAX_REPLY_SIZE`, since a batch grows with
// the number of matched peers.

use std::io::{self, Read, Write};

/// Largest report frame the relay accepts from a client.
pub const MAX_REPORT_SIZE: u32 = 1024;

/// Largest reply frame (16 MB). A batch to a reporter surrounded by thousands
/// of peers still fits; anything beyond is trimmed by the relay before it is
/// framed (see `codec::encode_batch_within`).
pub const MAX_REPLY_SIZE: u32 = 16 * 1024 * 1024;

/// Write one frame no larger than `limit` bytes, and flush. An oversized
/// payload is rejected with `InvalidInput` before anything is written.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8], limit: u32) -> io::Result<()> {
    let len = payload.len();
    if len > limit as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {len} bytes (limit {limit})"),
        ));
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame no larger than `limit` bytes.
///
/// A stream that closes cleanly before or inside a frame yields
/// `UnexpectedEof`; an announced length over `limit` yields `InvalidData`.
pub fn read_frame<R: Read>(reader: &mut R, limit: u32) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (limit {limit})"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_carries_length_prefix() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"card", MAX_REPORT_SIZE).unwrap();
        assert_eq!(buf, [0, 0, 0, 4, b'c', b'a', b'r', b'd']);
    }

    #[test]
    fn empty_frame_is_four_zero_bytes() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"", MAX_REPORT_SIZE).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap().is_empty());
    }

    #[test]
    fn rejects_oversized_write_without_writing() {
        let big = vec![0u8; MAX_REPORT_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &big, MAX_REPORT_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn reply_limit_admits_large_batches() {
        let big = vec![b'x'; 256 * 1024];
        let mut buf = Vec::new();
        write_frame(&mut buf, &big, MAX_REPLY_SIZE).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap().len(), big.len());
    }

    #[test]
    fn read_enforces_caller_limit() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[b'x'; 2048], MAX_REPLY_SIZE).unwrap();

        let mut cursor = Cursor::new(buf.clone());
        let err = read_frame(&mut cursor, MAX_REPORT_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap().len(), 2048);
    }

    #[test]
    fn truncated_payload_is_unexpected_eof() {
        // Announces 10 bytes, delivers 3.
        let mut cursor = Cursor::new(vec![0, 0, 0, 10, 1, 2, 3]);
        let err = read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn consecutive_frames_split_cleanly() {
        let mut buf = Vec::new();
        for payload in [&b"first"[..], b"", b"third"] {
            write_frame(&mut buf, payload, MAX_REPORT_SIZE).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap(), b"");
        assert_eq!(read_frame(&mut cursor, MAX_REPLY_SIZE).unwrap(), b"third");
    }
}
