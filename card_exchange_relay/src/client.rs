// TCP client for talking to the relay.
//
// Provides a non-blocking interface over a blocking socket:
// - `connect()` opens the TCP connection and spawns a background reader
//   thread.
// - The reader thread calls `read_frame()` in a loop, decodes each reply
//   payload into its `ReplyRecord`s, and pushes the result into an `mpsc`
//   channel. An empty `Vec` is the relay's acknowledgement of a report that
//   matched nobody.
// - The caller holds a `BufWriter<TcpStream>` for sending reports.
// - `poll()` drains the inbox without blocking; `recv_timeout()` waits for
//   the next reply.
//
// Used by the integration tests and handy for ad-hoc tooling; a real mobile
// client speaks the same framing and JSON.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use card_exchange_protocol::{
    MAX_REPLY_SIZE, MAX_REPORT_SIZE, ReplyRecord, Report, decode_batch, encode_report, read_frame,
    write_frame,
};
use tracing::debug;

use crate::error::RelayError;

/// TCP client for relay communication.
pub struct RelayClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<Vec<ReplyRecord>>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to a relay and spawn the reader thread.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr)?;
        let reader_stream = stream.try_clone()?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(BufReader::new(reader_stream), tx);
        });

        Ok(Self {
            writer: BufWriter::new(stream),
            inbox: rx,
            _reader_thread: Some(reader_thread),
        })
    }

    /// Send a report.
    pub fn send_report(&mut self, report: &Report) -> Result<(), RelayError> {
        let payload = encode_report(report)?;
        self.send_raw(&payload)
    }

    /// Send an arbitrary payload in one frame. The relay treats anything that
    /// is not a valid report as a protocol error and ignores it; payloads over
    /// `MAX_REPORT_SIZE` are refused here since the relay would drop the
    /// connection for them.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<(), RelayError> {
        write_frame(&mut self.writer, payload, MAX_REPORT_SIZE)?;
        Ok(())
    }

    /// Drain all queued replies (non-blocking).
    pub fn poll(&self) -> Vec<Vec<ReplyRecord>> {
        let mut replies = Vec::new();
        while let Ok(reply) = self.inbox.try_recv() {
            replies.push(reply);
        }
        replies
    }

    /// Wait up to `timeout` for the next reply. `None` on timeout or once
    /// the relay has closed the connection and the inbox is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<ReplyRecord>> {
        self.inbox.recv_timeout(timeout).ok()
    }

    /// Close the connection.
    pub fn disconnect(self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

/// Reader thread: read framed replies in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<Vec<ReplyRecord>>) {
    loop {
        let payload = match read_frame(&mut reader, MAX_REPLY_SIZE) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "relay connection closed");
                break;
            }
        };
        match decode_batch(&payload) {
            Ok(records) => {
                if tx.send(records).is_err() {
                    break; // Owner dropped the client
                }
            }
            Err(e) => {
                debug!(error = %e, "malformed reply from relay");
                break;
            }
        }
    }
}
