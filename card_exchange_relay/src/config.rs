// Relay configuration.
//
// Built once at startup (from the CLI in `main.rs`, or directly by tests and
// embedders) and handed to `start_relay`. Nothing reads it after the main
// loop has copied out what it needs.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use card_exchange_protocol::MAX_REPORT_SIZE;

/// TCP port clients connect to.
pub const DEFAULT_PORT: u16 = 1234;

/// Ticks a session survives without a report or a match.
pub const DEFAULT_LIFETIME: u32 = 8;

/// Two reports closer than this (meters) are a match.
pub const DEFAULT_PROXIMITY_THRESHOLD: f64 = 500.0;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address to bind. The binary resolves the host's primary IPv4 address;
    /// the default here is loopback so tests and embedders stay local.
    pub bind: IpAddr,
    pub port: u16,
    /// Interval between eviction ticks. Queued reports are matched on the
    /// same tick.
    pub tick_interval: Duration,
    /// Lifetime, in ticks, given to new sessions and restored on activity.
    pub default_lifetime: u32,
    /// Match distance in meters (exclusive).
    pub proximity_threshold: f64,
    /// Upper bound on a single write to a client before it is evicted.
    pub write_timeout: Duration,
    /// Largest report frame accepted from a client, in bytes.
    pub max_report_size: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            default_lifetime: DEFAULT_LIFETIME,
            proximity_threshold: DEFAULT_PROXIMITY_THRESHOLD,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_report_size: MAX_REPORT_SIZE,
        }
    }
}
