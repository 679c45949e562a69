//! Command-line configuration for the mailbox server binary. The teacher
//! crate already depends on `clap` for its client; the server previously
//! had no configuration surface at all (a hardcoded `127.0.0.1:4000` and no
//! persistence), which this fills in.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "wormhole-mailbox", about = "Magic Wormhole rendezvous server")]
pub struct Config {
    /// Address to listen for WebSocket connections on.
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub listen: String,

    /// Path to the SQLite database file backing the rendezvous store.
    #[arg(long, default_value = "wormhole-mailbox.sqlite")]
    pub db_path: PathBuf,

    /// Message-of-the-day shown to clients on connection.
    #[arg(long)]
    pub motd: Option<String>,

    /// Quantize usage-log `started` timestamps to this many seconds.
    /// Implicitly disables per-request logging.
    #[arg(long)]
    pub blur_usage: Option<f64>,
}
