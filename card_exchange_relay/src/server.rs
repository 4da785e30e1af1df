// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Acceptor thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
//   Accept errors are logged and the loop keeps going.
// - **Reader threads** (one per client): call `read_frame()` in a loop and
//   forward each raw payload as `InternalEvent::Payload`. On EOF, an
//   oversized frame, or any read error they send `InternalEvent::Closed` and
//   exit. Decoding happens on the main thread so that a malformed report is
//   handled in the same place as every other session decision.
// - **Main thread**: owns the `SessionTable`. Admits new connections as soon
//   as they arrive; queues payloads and closes (at most one pending payload
//   per session, so the queue never outgrows the table); and on every tick
//   deadline runs `SessionTable::tick` (age + evict, then match queued
//   reports). The
//   channel wait is bounded by the next deadline, so ticks keep a fixed
//   cadence whether or not clients are talking.
//
// The main thread is the only writer to client TCP streams. Reader threads
// only read.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop closes
// every session (which unblocks their readers) and exits.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use card_exchange_protocol::read_frame;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::session::{SessionId, SessionTable};

/// How long the acceptor sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Upper bound on one channel wait, so `stop()` is noticed promptly.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Events sent from acceptor/reader threads to the main thread.
enum InternalEvent {
    NewConnection { stream: TcpStream },
    Payload { session: SessionId, payload: Vec<u8> },
    Closed { session: SessionId },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay stops. With no `stop()` from elsewhere this
    /// runs until the process is terminated.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Bind the listener and start the relay on a background thread. Returns a
/// handle for stopping it and the bound address (useful when port 0 lets the
/// OS pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let bind_addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(bind_addr).map_err(|source| RelayError::Bind {
        addr: bind_addr,
        source,
    })?;
    let addr = listener.local_addr()?;
    // Non-blocking so the acceptor can check keep_running periodically.
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    info!(%addr, "relay listening");
    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let mut table = SessionTable::new(
        config.default_lifetime,
        config.proximity_threshold,
        config.write_timeout,
    );

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    let keep_running_acceptor = keep_running.clone();
    let tx_acceptor = tx.clone();
    thread::spawn(move || {
        accept_loop(listener, tx_acceptor, keep_running_acceptor);
    });

    let mut next_tick = Instant::now() + config.tick_interval;

    while keep_running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= next_tick {
            let pending = table.pending();
            let expired = table.tick();
            debug!(pending, expired = expired.len(), live = table.len(), "tick");
            next_tick += config.tick_interval;
            if next_tick <= now {
                // Fell behind; skip missed ticks rather than bursting.
                next_tick = now + config.tick_interval;
            }
            continue;
        }

        match rx.recv_timeout((next_tick - now).min(SHUTDOWN_POLL)) {
            Ok(event) => handle_event(&mut table, event, &tx, config.max_report_size),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    table.close_all();
    info!("relay stopped");
}

/// Acceptor: hand every new connection to the main thread.
fn accept_loop(listener: TcpListener, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "connection accepted");
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%addr, error = %e, "failed to admit connection");
                    continue;
                }
                if tx.send(InternalEvent::NewConnection { stream }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Dispatch a single event to the session table.
fn handle_event(
    table: &mut SessionTable,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    max_report_size: u32,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            admit_connection(table, stream, tx, max_report_size);
        }
        InternalEvent::Payload { session, payload } => {
            table.enqueue_payload(session, payload);
        }
        InternalEvent::Closed { session } => {
            table.enqueue_closed(session);
        }
    }
}

/// Admit a connection into the table and spawn its reader thread.
fn admit_connection(
    table: &mut SessionTable,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    max_report_size: u32,
) {
    let read_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to admit connection");
            return;
        }
    };
    let session = match table.admit(stream) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "failed to admit connection");
            return;
        }
    };

    let tx_reader = tx.clone();
    thread::spawn(move || {
        reader_loop(BufReader::new(read_stream), session, max_report_size, tx_reader);
    });
}

/// Reader loop for a single client. Runs in its own thread until the
/// connection closes or the main thread goes away.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    session: SessionId,
    max_report_size: u32,
    tx: Sender<InternalEvent>,
) {
    loop {
        match read_frame(&mut reader, max_report_size) {
            Ok(payload) => {
                if tx.send(InternalEvent::Payload { session, payload }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(session = %session, error = %e, "read ended");
                let _ = tx.send(InternalEvent::Closed { session });
                break;
            }
        }
    }
}
