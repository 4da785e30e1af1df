// card_exchange_relay — proximity relay server for Card Exchange.
//
// Mobile clients keep a TCP connection open and periodically report where
// they are along with a short "card" (message + color tag). Whenever two
// clients' latest reports are closer than the proximity threshold, the relay
// sends each of them the other's card and keeps both sessions alive. Sessions
// that stay silent and unmatched for `default_lifetime` ticks are closed.
//
// Module overview:
// - `session.rs`:  `SessionTable` — admission, lifetime ticks, eviction, the
//                  inbound report queue, and the proximity matcher. The core
//                  data structure that `server.rs` drives.
// - `server.rs`:   TCP listener, reader threads (one per client), and the
//                  main event loop. Uses `std::net` with a thread-per-reader
//                  architecture and an `mpsc` channel to funnel events into
//                  the single-threaded `SessionTable`.
// - `geo.rs`:      Haversine distance between two `Location`s.
// - `config.rs`:   `RelayConfig` and its defaults.
// - `error.rs`:    `RelayError`.
// - `client.rs`:   Blocking `RelayClient` used by tests and tooling.
// - `announce.rs`: Optional UDP broadcast of the relay's address.
// - `net.rs`:      Primary IPv4 discovery for the default bind address.
// - `logging.rs`:  `tracing-subscriber` setup for the binary.
//
// Dependencies: `card_exchange_protocol` (shared message types, codec, and
// framing).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded via the
// library API (`start_relay`).

pub mod announce;
pub mod client;
pub mod config;
pub mod error;
pub mod geo;
pub mod logging;
pub mod net;
pub mod server;
pub mod session;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{RelayHandle, start_relay};
