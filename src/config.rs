// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use clap::Parser;

use crate::monitor::{MalformedPolicy, SignalFilter, DEFAULT_PEER, PROPERTIES_CHANGED};

#[derive(Debug, Parser)]
#[clap(name = "moga-monitor", about = "Log device connection changes reported by BlueZ")]
pub struct Cli {
    /// Well-known bus name of the peer to watch
    #[clap(long, default_value = DEFAULT_PEER)]
    pub peer: String,

    /// Signal to subscribe to while the peer is present
    #[clap(long, default_value = PROPERTIES_CHANGED)]
    pub signal: String,

    /// Timeout for bus method calls, in milliseconds
    #[clap(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Log malformed signals instead of exiting
    #[clap(long)]
    pub tolerate_malformed: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[clap(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn signal_filter(&self) -> SignalFilter {
        SignalFilter::from_sender(self.peer.clone(), self.signal.clone())
    }

    pub fn malformed_policy(&self) -> MalformedPolicy {
        if self.tolerate_malformed {
            MalformedPolicy::Tolerate
        } else {
            MalformedPolicy::Fatal
        }
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
