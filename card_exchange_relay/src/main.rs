// CLI entry point for the Card Exchange relay.
//
// Starts a standalone relay that mobile clients connect to. Unless `--bind`
// is given, the relay listens on this host's primary IPv4 address. See
// `server.rs` for the networking architecture and `session.rs` for the
// matching rules.
//
// Usage:
//   card-exchange-relay [OPTIONS]
//     --bind <IP>               Address to listen on (default: primary IPv4)
//     --port <PORT>             Listen port (default: 1234)
//     --tick-ms <MS>            Tick interval (default: 1000)
//     --lifetime <TICKS>        Session lifetime in ticks (default: 8)
//     --threshold <METERS>      Match distance (default: 500)
//     --write-timeout-ms <MS>   Per-write timeout (default: 2000)
//     --announce                Broadcast the relay address on UDP 12345

use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, warn};

use card_exchange_relay::announce::Announcer;
use card_exchange_relay::config::{
    DEFAULT_LIFETIME, DEFAULT_PORT, DEFAULT_PROXIMITY_THRESHOLD, RelayConfig,
};
use card_exchange_relay::logging::init_logging;
use card_exchange_relay::net::primary_ipv4;
use card_exchange_relay::start_relay;

#[derive(Debug, Parser)]
#[command(name = "card-exchange-relay", version, about = "Proximity relay for Card Exchange")]
struct Cli {
    /// Address to listen on. Defaults to this host's primary IPv4 address.
    #[arg(long)]
    bind: Option<IpAddr>,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Ticks a session survives without a report or a match.
    #[arg(long, default_value_t = DEFAULT_LIFETIME)]
    lifetime: u32,

    /// Match distance in meters.
    #[arg(long, default_value_t = DEFAULT_PROXIMITY_THRESHOLD)]
    threshold: f64,

    /// Per-write timeout in milliseconds; a slower client is evicted.
    #[arg(long, default_value_t = 2000)]
    write_timeout_ms: u64,

    /// Broadcast the relay's address on the local subnet.
    #[arg(long)]
    announce: bool,
}

impl Cli {
    fn into_config(self, bind: IpAddr) -> RelayConfig {
        RelayConfig {
            bind,
            port: self.port,
            tick_interval: Duration::from_millis(self.tick_ms),
            default_lifetime: self.lifetime,
            proximity_threshold: self.threshold,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            ..RelayConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let bind = match cli.bind {
        Some(ip) => ip,
        None => match primary_ipv4() {
            Ok(ip) => IpAddr::V4(ip),
            Err(e) => {
                error!(error = %e, "no address to bind; pass --bind");
                return ExitCode::FAILURE;
            }
        },
    };
    let announce = cli.announce;
    let config = cli.into_config(bind);

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    let announcer = match (announce, addr.ip()) {
        (false, _) => None,
        (true, IpAddr::V4(ip)) => match Announcer::start(ip) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(error = %e, "announcer disabled");
                None
            }
        },
        (true, IpAddr::V6(_)) => {
            warn!("announcer needs an IPv4 bind address; disabled");
            None
        }
    };

    // Runs until the process is terminated.
    handle.wait();

    if let Some(announcer) = announcer {
        announcer.stop();
    }
    ExitCode::SUCCESS
}
