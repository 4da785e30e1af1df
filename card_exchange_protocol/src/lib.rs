// card_exchange_protocol — wire protocol for the Card Exchange proximity relay.
//
// Clients report their location and a short card message; the relay pairs
// clients that are close to each other and sends each side the other's card.
// This crate holds everything both ends need to agree on and nothing else: no
// sockets, no session state.
//
// Module overview:
// - `types.rs`:    `Location`, `Report` (client → relay) and `ReplyRecord`
//                  (relay → client), with serde derives using the wire names.
// - `codec.rs`:    Explicit encode/decode per message kind, `|`-joined batch
//                  replies, and `ProtocolError`.
// - `framing.rs`:  4-byte big-endian length prefix per message over any
//                  `Read`/`Write` stream.
//
// Design decisions:
// - **JSON payloads.** Field-named objects, matching what existing mobile
//   clients already produce.
// - **Explicit framing.** One report per frame, so partial reads and
//   coalesced writes on the TCP stream cannot split or merge reports.
// - **No async runtime.** Plain `std::io` traits, usable from blocking
//   threads on both sides.

pub mod codec;
pub mod framing;
pub mod types;

pub use codec::{
    BATCH_DELIMITER, ProtocolError, decode_batch, decode_report, encode_batch,
    encode_batch_within, encode_reply, encode_report,
};
pub use framing::{MAX_REPLY_SIZE, MAX_REPORT_SIZE, read_frame, write_frame};
pub use types::{Location, ReplyRecord, Report, parse_timestamp};
