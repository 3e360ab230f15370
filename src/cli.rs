//! Command line interface for the streamlink demo binary.

use clap::Parser;

/// Command line arguments for the `streamlink` binary.
#[derive(Debug, Parser)]
#[command(name = "streamlink", version, about = "Loopback demo of the streamlink delivery engine")]
pub struct Cli {
    /// Messages to publish to the demo subscription.
    #[arg(short, long, default_value_t = 10)]
    pub messages: u64,
    /// Stop the demo subscription after this many deliveries; 0 is unlimited.
    #[arg(long, default_value_t = 0)]
    pub max: u64,
    /// Request timeout in milliseconds.
    #[arg(short, long, default_value_t = 500)]
    pub timeout_ms: u64,
}
