//! Command-line argument parsing for both binaries.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "dht", about = "Runs a Chord DHT node")]
pub struct DhtArgs {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: String,
}

#[derive(Parser, Debug)]
#[command(name = "client", about = "Interactive shell for the client API gateway")]
pub struct ClientArgs {
    /// `host:port` of a node's API address.
    #[arg(short = 'a', long = "addr")]
    pub addr: String,
}
