// Encode/decode for the two message schemas.
//
// One function pair per message kind, returning `ProtocolError` on bad input
// instead of panicking. The relay decodes reports and encodes replies; the
// client does the reverse.
//
// Reply payloads come in three shapes, all produced by `encode_batch`:
// - empty (no peer matched; still sent so the reporter gets an ack),
// - a single `ReplyRecord` object (push to a matched peer),
// - several objects joined with `|` (batch to the reporter).
//
// `decode_batch` reads one JSON value at a time and only then expects a `|`,
// so a `|` inside a message string is never mistaken for a separator.

use serde_json::Deserializer;

use crate::types::{ReplyRecord, Report};

/// Separator between records in a batch reply.
pub const BATCH_DELIMITER: char = '|';

/// A payload that could not be decoded. Recoverable: the caller discards the
/// payload and keeps the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed reply batch at byte {offset}")]
    Batch { offset: usize },
}

pub fn encode_report(report: &Report) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(report)?)
}

pub fn decode_report(payload: &[u8]) -> Result<Report, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

pub fn encode_reply(record: &ReplyRecord) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(record)?)
}

/// Serialize records joined by `|`. An empty slice yields an empty payload.
pub fn encode_batch(records: &[ReplyRecord]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(BATCH_DELIMITER as u8);
        }
        serde_json::to_writer(&mut out, record)?;
    }
    Ok(out)
}

/// Like `encode_batch`, but stops before the payload would exceed `limit`
/// bytes. Returns the payload and how many leading records it holds; records
/// past that point are left out whole, never cut mid-object.
pub fn encode_batch_within(
    records: &[ReplyRecord],
    limit: usize,
) -> Result<(Vec<u8>, usize), ProtocolError> {
    let mut out = Vec::new();
    let mut record_buf = Vec::new();
    for (i, record) in records.iter().enumerate() {
        record_buf.clear();
        serde_json::to_writer(&mut record_buf, record)?;
        let sep = usize::from(i > 0);
        if out.len() + sep + record_buf.len() > limit {
            return Ok((out, i));
        }
        if sep == 1 {
            out.push(BATCH_DELIMITER as u8);
        }
        out.extend_from_slice(&record_buf);
    }
    Ok((out, records.len()))
}

/// Decode any reply payload: empty, a single record, or a `|`-joined batch.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<ReplyRecord>, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    let mut records = Vec::new();
    if text.trim().is_empty() {
        return Ok(records);
    }

    let mut offset = 0;
    loop {
        let mut values = Deserializer::from_str(&text[offset..]).into_iter::<ReplyRecord>();
        match values.next() {
            Some(record) => records.push(record?),
            None => return Err(ProtocolError::Batch { offset }),
        }
        offset += values.byte_offset();

        let rest = text[offset..].trim_start();
        if rest.is_empty() {
            return Ok(records);
        }
        if !rest.starts_with(BATCH_DELIMITER) {
            return Err(ProtocolError::Batch { offset });
        }
        offset = text.len() - rest.len() + BATCH_DELIMITER.len_utf8();
    }
}
