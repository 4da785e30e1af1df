// Optional LAN presence announcer.
//
// Broadcasts the relay's IPv4 address as ASCII text to UDP port 12345 once
// per second so clients on the same subnet can find the server without
// configuration. Entirely independent of session state: it has its own
// thread and its own lifecycle, and a failed send is logged and retried on
// the next interval.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::RelayError;

/// UDP port clients listen on for announcements.
pub const ANNOUNCE_PORT: u16 = 12345;

pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Running announcer. Dropping it without `stop()` leaves the thread running
/// until the process exits.
pub struct Announcer {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Announcer {
    /// Broadcast `server_ip` on the local subnet every `ANNOUNCE_INTERVAL`.
    pub fn start(server_ip: Ipv4Addr) -> Result<Self, RelayError> {
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, ANNOUNCE_PORT));
        Self::start_to(server_ip.to_string().into_bytes(), target, ANNOUNCE_INTERVAL)
    }

    /// Send `payload` to `target` every `interval`.
    pub fn start_to(
        payload: Vec<u8>,
        target: SocketAddr,
        interval: Duration,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let keep_running_clone = keep_running.clone();
        let thread = thread::spawn(move || {
            while keep_running_clone.load(Ordering::SeqCst) {
                if let Err(e) = socket.send_to(&payload, target) {
                    warn!(%target, error = %e, "announce failed");
                }
                thread::sleep(interval);
            }
        });

        info!(%target, "announcing relay address");
        Ok(Self {
            keep_running,
            thread: Some(thread),
        })
    }

    /// Stop broadcasting and wait for the thread to finish.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
