// Session table for the relay.
//
// `SessionTable` is the central data structure that `server.rs` drives. It
// owns one `SessionState` per connected client: the write half of the TCP
// stream, a lifetime counter in ticks, and the client's latest `Report`. All
// mutation happens through methods called from the server's single-threaded
// main loop, so there is no internal locking.
//
// Key responsibilities:
// - Admission: `admit` inserts a fresh session with the default lifetime and
//   no report.
// - Inbound queue: reader threads' payloads (and close notifications) are
//   queued with `enqueue_payload`/`enqueue_closed` and only acted on in
//   `tick`, so matching and lifetime changes happen on one timeline. The queue
//   holds at most one payload per session: a newer report replaces one still
//   waiting, since only the latest report is ever matched.
// - Eviction clock: `tick` first ages every session by one, evicting those
//   that reach zero (collect, then remove), then drains the inbound queue.
// - Proximity matching: `match_report` stores the report, keeps the sender
//   alive, pushes a `ReplyRecord` to every nearby peer immediately, and sends
//   the sender one batch of all its matches (possibly empty) at the end.
//
// Writing to client streams: each write is bounded by the connection's write
// timeout (set in `admit`). A failed write evicts that session after the
// current scan; it never aborts the tick. Evicting shuts the socket down in
// both directions, which also ends the session's reader thread. A batch that
// would not fit in one reply frame is cut to the records that do; that is
// never a reason to evict.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use card_exchange_protocol::{
    MAX_REPLY_SIZE, ProtocolError, ReplyRecord, Report, decode_report, encode_batch_within,
    encode_reply, write_frame,
};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::geo::haversine_distance;

/// Relay-assigned connection handle. Never reused within one relay run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session left the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictReason {
    /// Lifetime ran out.
    Expired,
    /// The client closed the connection or a read failed.
    Disconnected,
    /// A write to the client failed or timed out.
    SendFailed,
    /// The relay is shutting down.
    Shutdown,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictReason::Expired => "lifetime expired",
            EvictReason::Disconnected => "disconnected",
            EvictReason::SendFailed => "send failed",
            EvictReason::Shutdown => "relay shutting down",
        };
        f.write_str(s)
    }
}

/// What a reader thread observed on a connection since the last tick.
#[derive(Default)]
struct Inbound {
    /// Latest undecoded payload.
    payload: Option<Vec<u8>>,
    /// The connection closed or a read failed after `payload` arrived.
    closed: bool,
}

struct SessionState {
    /// Remote IP address as sent to peers in `ReplyRecord::client`.
    peer: String,
    writer: BufWriter<TcpStream>,
    lifetime: u32,
    report: Option<Report>,
}

/// All live sessions, keyed by connection handle.
pub struct SessionTable {
    sessions: BTreeMap<SessionId, SessionState>,
    next_session_id: u64,
    default_lifetime: u32,
    proximity_threshold: f64,
    write_timeout: Duration,
    inbound: BTreeMap<SessionId, Inbound>,
}

impl SessionTable {
    pub fn new(default_lifetime: u32, proximity_threshold: f64, write_timeout: Duration) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_session_id: 0,
            default_lifetime,
            proximity_threshold,
            write_timeout,
            inbound: BTreeMap::new(),
        }
    }

    /// Insert a session for a freshly accepted connection. `stream` becomes
    /// the session's write half; the caller keeps a clone for reading.
    pub fn admit(&mut self, stream: TcpStream) -> std::io::Result<SessionId> {
        let peer = stream.peer_addr()?.ip().to_string();
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_nodelay(true)?;

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        info!(session = %id, %peer, "client joined");

        self.sessions.insert(
            id,
            SessionState {
                peer,
                writer: BufWriter::new(stream),
                lifetime: self.default_lifetime,
                report: None,
            },
        );
        Ok(id)
    }

    /// Remove a session and close its connection. Returns false if it was
    /// already gone.
    pub fn evict(&mut self, id: SessionId, reason: EvictReason) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };
        let _ = session.writer.get_ref().shutdown(Shutdown::Both);
        info!(session = %id, peer = %session.peer, %reason, "client removed");
        true
    }

    /// Close every connection. Used on relay shutdown.
    pub fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.evict(id, EvictReason::Shutdown);
        }
        self.inbound.clear();
    }

    /// Queue a payload read from `id` for the next tick, replacing any
    /// payload from `id` still waiting. Ignored once `id` has closed.
    pub fn enqueue_payload(&mut self, id: SessionId, payload: Vec<u8>) {
        let pending = self.inbound.entry(id).or_default();
        if pending.closed {
            return;
        }
        if pending.payload.replace(payload).is_some() {
            debug!(session = %id, "queued report superseded");
        }
    }

    /// Queue a closed/failed read on `id` for the next tick. A payload queued
    /// before it is still processed first.
    pub fn enqueue_closed(&mut self, id: SessionId) {
        self.inbound.entry(id).or_default().closed = true;
    }

    /// Number of sessions with something queued for the next tick.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// One eviction-clock tick: age all sessions, then process everything
    /// the readers delivered since the last tick. Returns the sessions whose
    /// lifetime ran out.
    pub fn tick(&mut self) -> Vec<SessionId> {
        let expired = self.age();

        let inbound = std::mem::take(&mut self.inbound);
        for (id, Inbound { payload, closed }) in inbound {
            if !self.sessions.contains_key(&id) {
                continue;
            }
            if let Some(Err(e)) = payload.map(|payload| self.receive(id, &payload)) {
                warn!(session = %id, error = %e, "discarding malformed report");
            }
            if closed {
                self.evict(id, EvictReason::Disconnected);
            }
        }
        expired
    }

    /// Decrement every lifetime by one and evict the sessions that reach
    /// zero. Returns the evicted ids.
    pub fn age(&mut self) -> Vec<SessionId> {
        for session in self.sessions.values_mut() {
            session.lifetime = session.lifetime.saturating_sub(1);
        }

        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.lifetime == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.evict(*id, EvictReason::Expired);
        }
        expired
    }

    /// Decode a payload from `id` and run the matcher on it. A decode
    /// failure leaves the session untouched. Returns the number of peers
    /// matched.
    pub fn receive(&mut self, id: SessionId, payload: &[u8]) -> Result<usize, ProtocolError> {
        let report = decode_report(payload)?;
        debug!(session = %id, msg = %report.msg, loc = ?report.loc, "report received");
        Ok(self.match_report(id, report))
    }

    /// Store `report` as `id`'s latest and exchange cards with every peer
    /// within the proximity threshold. Returns the number of peers matched.
    pub fn match_report(&mut self, id: SessionId, report: Report) -> usize {
        let default_lifetime = self.default_lifetime;
        let threshold = self.proximity_threshold;

        let Some(sender) = self.sessions.get_mut(&id) else {
            return 0;
        };
        sender.lifetime = default_lifetime;
        sender.report = Some(report.clone());
        let sender_peer = sender.peer.clone();

        let mut batch = Vec::new();
        let mut failed = Vec::new();

        for (&peer_id, peer) in self.sessions.iter_mut() {
            if peer_id == id {
                continue;
            }
            let Some(peer_report) = &peer.report else {
                continue;
            };

            // NaN (from non-finite coordinates) never matches.
            let distance = haversine_distance(&report.loc, &peer_report.loc);
            if distance.partial_cmp(&threshold) != Some(Ordering::Less) {
                continue;
            }
            debug!(session = %id, peer = %peer_id, distance, "match");

            peer.lifetime = default_lifetime;
            batch.push(ReplyRecord {
                client: peer.peer.clone(),
                msg: peer_report.msg.clone(),
                color: peer_report.color.clone(),
                distance,
            });

            let push = ReplyRecord {
                client: sender_peer.clone(),
                msg: report.msg.clone(),
                color: report.color.clone(),
                distance,
            };
            match send_push(&mut peer.writer, &push) {
                Ok(()) => {}
                Err(RelayError::Io(e)) => {
                    warn!(session = %peer_id, error = %e, "push to peer failed");
                    failed.push(peer_id);
                }
                Err(e) => warn!(session = %peer_id, error = %e, "push not sent"),
            }
        }

        if let Some(sender) = self.sessions.get_mut(&id) {
            match send_batch(&mut sender.writer, &batch) {
                Ok(sent) if sent < batch.len() => {
                    warn!(
                        session = %id,
                        matched = batch.len(),
                        sent,
                        "batch reply trimmed to fit one frame"
                    );
                }
                Ok(_) => {}
                Err(RelayError::Io(e)) => {
                    warn!(session = %id, error = %e, "batch reply failed");
                    failed.push(id);
                }
                Err(e) => warn!(session = %id, error = %e, "batch reply not sent"),
            }
        }

        for failed_id in failed {
            self.evict(failed_id, EvictReason::SendFailed);
        }
        batch.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Remaining lifetime of `id`, in ticks.
    pub fn lifetime(&self, id: SessionId) -> Option<u32> {
        self.sessions.get(&id).map(|s| s.lifetime)
    }

    /// Latest report stored for `id`.
    pub fn report(&self, id: SessionId) -> Option<&Report> {
        self.sessions.get(&id).and_then(|s| s.report.as_ref())
    }

    /// Remote IP address of `id`, as peers see it.
    pub fn peer(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id).map(|s| s.peer.as_str())
    }
}

/// Only `RelayError::Io` means the connection is unusable.
fn send_push(writer: &mut BufWriter<TcpStream>, record: &ReplyRecord) -> Result<(), RelayError> {
    write_frame(writer, &encode_reply(record)?, MAX_REPLY_SIZE)?;
    Ok(())
}

/// Send as many leading records as fit in one reply frame. Returns how many
/// were sent.
fn send_batch(
    writer: &mut BufWriter<TcpStream>,
    records: &[ReplyRecord],
) -> Result<usize, RelayError> {
    let (payload, sent) = encode_batch_within(records, MAX_REPLY_SIZE as usize)?;
    write_frame(writer, &payload, MAX_REPLY_SIZE)?;
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::thread;

    use card_exchange_protocol::{Location, decode_batch, encode_report, read_frame};

    use super::*;

    const LIFETIME: u32 = 5;

    fn table() -> SessionTable {
        SessionTable::new(LIFETIME, 500.0, Duration::from_secs(2))
    }

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Admit a new connection and return the client's read side.
    fn join(table: &mut SessionTable) -> (SessionId, BufReader<TcpStream>) {
        let (client, server) = tcp_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let id = table.admit(server).unwrap();
        (id, BufReader::new(client))
    }

    fn recv_records(reader: &mut BufReader<TcpStream>) -> Vec<ReplyRecord> {
        let payload = read_frame(reader, MAX_REPLY_SIZE).unwrap();
        decode_batch(&payload).unwrap()
    }

    /// True if nothing arrives on `reader` within a short window.
    fn is_silent(reader: &mut BufReader<TcpStream>) -> bool {
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let silent = read_frame(reader, MAX_REPLY_SIZE).is_err();
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        silent
    }

    fn report_at(msg: &str, color: &str, lat: f64, lon: f64) -> Report {
        Report::new(msg, color, Location::new(lat, lon))
    }

    #[test]
    fn admit_starts_with_default_lifetime_and_no_report() {
        let mut table = table();
        let (id, _reader) = join(&mut table);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lifetime(id), Some(LIFETIME));
        assert!(table.report(id).is_none());
        assert_eq!(table.peer(id), Some("127.0.0.1"));
    }

    #[test]
    fn session_ids_are_unique() {
        let mut table = table();
        let (a, _ra) = join(&mut table);
        let (b, _rb) = join(&mut table);
        table.evict(a, EvictReason::Disconnected);
        let (c, _rc) = join(&mut table);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn lifetime_drops_by_one_per_tick() {
        let mut table = table();
        let (id, _reader) = join(&mut table);
        for expected in (1..LIFETIME).rev() {
            table.tick();
            assert_eq!(table.lifetime(id), Some(expected));
        }
    }

    #[test]
    fn silent_session_is_evicted_exactly_once() {
        let mut table = table();
        let (id, mut reader) = join(&mut table);

        let mut evictions = 0;
        for _ in 0..LIFETIME + 3 {
            evictions += table.age().iter().filter(|e| **e == id).count();
        }
        assert_eq!(evictions, 1);
        assert!(!table.contains(id));
        assert!(table.is_empty());

        // The server side was shut down: the client sees EOF.
        let err = read_frame(&mut reader, MAX_REPLY_SIZE).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn tick_evicts_silent_session_exactly_once() {
        let mut table = table();
        let (id, mut reader) = join(&mut table);
        let (other, _other_reader) = join(&mut table);

        let mut evicted_on = Vec::new();
        for tick in 1..=LIFETIME + 3 {
            let keepalive = encode_report(&report_at("here", "red", 50.0, 50.0)).unwrap();
            table.enqueue_payload(other, keepalive);
            if tick == LIFETIME {
                // Arrives too late: aging runs first.
                let late = encode_report(&report_at("late", "red", 50.0, 50.0)).unwrap();
                table.enqueue_payload(id, late);
            }
            if table.tick().contains(&id) {
                evicted_on.push(tick);
            }
        }
        assert_eq!(evicted_on, [LIFETIME]);
        assert!(!table.contains(id));
        assert!(table.contains(other));
        assert_eq!(table.len(), 1);

        // No ack for the late report, just EOF.
        let err = read_frame(&mut reader, MAX_REPLY_SIZE).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn lone_report_gets_empty_ack_and_resets_lifetime() {
        let mut table = table();
        let (id, mut reader) = join(&mut table);
        table.age();
        table.age();
        assert_eq!(table.lifetime(id), Some(LIFETIME - 2));

        let matched = table.match_report(id, report_at("alone", "red", 10.0, 10.0));
        assert_eq!(matched, 0);
        assert_eq!(table.lifetime(id), Some(LIFETIME));
        assert_eq!(table.report(id).unwrap().msg, "alone");

        let payload = read_frame(&mut reader, MAX_REPLY_SIZE).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn nearby_sessions_exchange_cards() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("card A", "red", 10.0, 10.0));
        assert!(recv_records(&mut reader_a).is_empty());

        table.age();
        table.age();
        let matched = table.match_report(b, report_at("card B", "blue", 10.0, 10.00005));
        assert_eq!(matched, 1);
        assert_eq!(table.lifetime(a), Some(LIFETIME));
        assert_eq!(table.lifetime(b), Some(LIFETIME));

        // A gets B's card pushed.
        let pushed = recv_records(&mut reader_a);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].msg, "card B");
        assert_eq!(pushed[0].color, "blue");
        assert_eq!(pushed[0].client, "127.0.0.1");

        // B gets A's card in its batch, with the same distance.
        let batch = recv_records(&mut reader_b);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].msg, "card A");
        assert_eq!(batch[0].color, "red");
        assert_eq!(batch[0].distance, pushed[0].distance);
        assert!(batch[0].distance > 0.0 && batch[0].distance < 500.0);
    }

    #[test]
    fn distant_sessions_do_not_match() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("A", "red", 0.0, 0.0));
        let _ack = recv_records(&mut reader_a);
        table.age();

        // ~1.1 km away.
        let matched = table.match_report(b, report_at("B", "blue", 0.01, 0.0));
        assert_eq!(matched, 0);
        assert!(recv_records(&mut reader_b).is_empty());
        assert_eq!(table.lifetime(a), Some(LIFETIME - 1));
        assert!(is_silent(&mut reader_a));
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut table = SessionTable::new(LIFETIME, 0.0, Duration::from_secs(2));
        let (a, mut reader_a) = join(&mut table);
        let (b, _reader_b) = join(&mut table);

        table.match_report(a, report_at("A", "red", 1.0, 1.0));
        let _ack = recv_records(&mut reader_a);
        // Distance 0 is not below a threshold of 0.
        assert_eq!(table.match_report(b, report_at("B", "blue", 1.0, 1.0)), 0);
    }

    #[test]
    fn non_finite_location_never_matches() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("A", "red", 10.0, 10.0));
        let _ack = recv_records(&mut reader_a);
        table.age();

        assert_eq!(table.match_report(b, report_at("B", "blue", f64::NAN, 10.0)), 0);
        assert!(recv_records(&mut reader_b).is_empty());
        assert_eq!(table.lifetime(a), Some(LIFETIME - 1));
        assert!(is_silent(&mut reader_a));
    }

    #[test]
    fn near_antipodal_reports_do_not_match() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("A", "red", -87.843, 0.0));
        let _ack = recv_records(&mut reader_a);

        assert_eq!(table.match_report(b, report_at("B", "blue", 87.843, -180.0)), 0);
        assert!(recv_records(&mut reader_b).is_empty());
        assert!(is_silent(&mut reader_a));
    }

    #[test]
    fn reportless_session_never_matches() {
        let mut table = table();
        let (silent, mut reader_silent) = join(&mut table);
        let (a, mut reader_a) = join(&mut table);

        table.age();
        let matched = table.match_report(a, report_at("A", "red", 5.0, 5.0));
        assert_eq!(matched, 0);
        assert!(recv_records(&mut reader_a).is_empty());

        // The silent session was neither reset nor pushed to.
        assert_eq!(table.lifetime(silent), Some(LIFETIME - 1));
        assert!(is_silent(&mut reader_silent));
    }

    #[test]
    fn sender_batches_all_matches() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);
        let (c, mut reader_c) = join(&mut table);

        table.match_report(a, report_at("A", "red", 20.0, 20.0));
        table.match_report(b, report_at("B", "green", 20.0, 20.0001));
        let _ = recv_records(&mut reader_a); // A's empty ack
        let _ = recv_records(&mut reader_a); // push from B
        let _ = recv_records(&mut reader_b); // B's batch

        let matched = table.match_report(c, report_at("C", "blue", 20.0001, 20.0));
        assert_eq!(matched, 2);

        let batch = recv_records(&mut reader_c);
        let mut msgs: Vec<&str> = batch.iter().map(|r| r.msg.as_str()).collect();
        msgs.sort_unstable();
        assert_eq!(msgs, ["A", "B"]);

        for reader in [&mut reader_a, &mut reader_b] {
            let push = recv_records(reader);
            assert_eq!(push.len(), 1);
            assert_eq!(push[0].msg, "C");
        }
    }

    #[test]
    fn only_latest_report_is_matched() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("old", "red", 30.0, 30.0));
        table.match_report(a, report_at("new", "red", -30.0, -30.0));
        let _ = recv_records(&mut reader_a);
        let _ = recv_records(&mut reader_a);

        assert_eq!(table.match_report(b, report_at("B", "blue", 30.0, 30.0)), 0);
        assert!(recv_records(&mut reader_b).is_empty());
        assert_eq!(table.report(a).unwrap().msg, "new");
    }

    #[test]
    fn malformed_payload_leaves_session_untouched() {
        let mut table = table();
        let (x, mut reader_x) = join(&mut table);

        table.match_report(x, report_at("first", "red", 1.0, 1.0));
        let _ = recv_records(&mut reader_x);
        table.age();

        let err = table.receive(x, b"{ not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
        assert_eq!(table.lifetime(x), Some(LIFETIME - 1));
        assert_eq!(table.report(x).unwrap().msg, "first");
        assert!(is_silent(&mut reader_x));

        // A well-formed report afterwards is processed normally.
        let good = encode_report(&report_at("second", "red", 1.0, 1.0)).unwrap();
        assert_eq!(table.receive(x, &good).unwrap(), 0);
        assert_eq!(table.lifetime(x), Some(LIFETIME));
        assert_eq!(table.report(x).unwrap().msg, "second");
    }

    #[test]
    fn tick_ages_before_processing_queued_reports() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);

        let payload = encode_report(&report_at("queued", "red", 1.0, 1.0)).unwrap();
        table.enqueue_payload(a, payload);
        assert!(table.report(a).is_none());

        table.tick();
        assert_eq!(table.report(a).unwrap().msg, "queued");
        assert_eq!(table.lifetime(a), Some(LIFETIME));
        assert!(recv_records(&mut reader_a).is_empty());
    }

    #[test]
    fn queued_close_evicts_after_earlier_payload() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);

        let payload = encode_report(&report_at("last words", "red", 1.0, 1.0)).unwrap();
        table.enqueue_payload(a, payload);
        table.enqueue_closed(a);
        table.enqueue_payload(a, b"ignored".to_vec());
        assert_eq!(table.pending(), 1);

        table.tick();
        assert!(!table.contains(a));
        // The report before the close was still acknowledged.
        assert!(recv_records(&mut reader_a).is_empty());
    }

    #[test]
    fn queued_payload_for_expired_session_is_dropped() {
        let mut table = SessionTable::new(1, 500.0, Duration::from_secs(2));
        let (a, _reader_a) = join(&mut table);
        let payload = encode_report(&report_at("too late", "red", 1.0, 1.0)).unwrap();
        table.enqueue_payload(a, payload);

        table.tick();
        assert!(!table.contains(a));
        assert!(table.is_empty());
    }

    #[test]
    fn queued_reports_coalesce_to_the_latest() {
        let mut table = table();
        let (a, mut reader_a) = join(&mut table);

        for i in 0..100 {
            let payload = encode_report(&report_at(&format!("report {i}"), "red", 1.0, 1.0));
            table.enqueue_payload(a, payload.unwrap());
        }
        assert_eq!(table.pending(), 1);

        table.tick();
        assert_eq!(table.pending(), 0);
        assert_eq!(table.report(a).unwrap().msg, "report 99");
        // One report processed, one ack.
        assert!(recv_records(&mut reader_a).is_empty());
        assert!(is_silent(&mut reader_a));
    }

    #[test]
    fn failed_push_evicts_peer_not_sender() {
        let mut table = table();
        let (client_a, server_a) = tcp_pair();
        let a_write_half = server_a.try_clone().unwrap();
        let a = table.admit(server_a).unwrap();
        let (b, mut reader_b) = join(&mut table);

        table.match_report(a, report_at("A", "red", 2.0, 2.0));
        let mut reader_a = BufReader::new(client_a);
        let _ = recv_records(&mut reader_a);

        // Writes to A now fail.
        a_write_half.shutdown(Shutdown::Write).unwrap();

        let matched = table.match_report(b, report_at("B", "blue", 2.0, 2.0));
        assert_eq!(matched, 1);
        assert!(!table.contains(a));
        assert!(table.contains(b));

        let batch = recv_records(&mut reader_b);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].msg, "A");
    }

    #[test]
    fn batch_over_64_kib_reaches_the_sender() {
        const PEERS: usize = 70;
        let long_msg = "x".repeat(1000);
        assert!(PEERS * long_msg.len() > 64 * 1024);

        let mut table = table();
        for _ in 0..PEERS {
            let (peer, reader) = join(&mut table);
            // Drain pushes so the peer's socket buffer never fills.
            thread::spawn(move || {
                let _ = std::io::copy(&mut reader.into_inner(), &mut std::io::sink());
            });
            table.match_report(peer, report_at(&long_msg, "red", 40.0, 40.0));
        }

        let (sender, mut reader_sender) = join(&mut table);
        let receiver = thread::spawn(move || recv_records(&mut reader_sender));
        let matched = table.match_report(sender, report_at("S", "blue", 40.0, 40.0));
        assert_eq!(matched, PEERS);
        assert!(table.contains(sender));
        assert_eq!(table.len(), PEERS + 1);

        let batch = receiver.join().unwrap();
        assert_eq!(batch.len(), PEERS);
        assert!(batch.iter().all(|r| r.msg == long_msg));
        table.close_all();
    }

    #[test]
    fn close_all_empties_table() {
        let mut table = table();
        let (_a, _ra) = join(&mut table);
        let (b, _rb) = join(&mut table);
        table.enqueue_closed(b);
        table.close_all();
        assert!(table.is_empty());
        table.tick();
        assert!(table.is_empty());
    }

    #[test]
    fn evict_twice_is_noop() {
        let mut table = table();
        let (a, _ra) = join(&mut table);
        assert!(table.evict(a, EvictReason::Disconnected));
        assert!(!table.evict(a, EvictReason::Disconnected));
    }
}
