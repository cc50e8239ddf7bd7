//! tak-relay: a broadcast relay for tag-delimited event streams
//!
//! Every client connects over plain TCP. Bytes from each client are framed
//! into messages ending with a terminator (`</event>` by default), and every
//! complete message is sent verbatim to all connected clients, the sender
//! included.
//!
//! Features:
//! - Single-threaded mio event loop
//! - Per-connection failure isolation
//! - Keypress console: `Q` quits, any other key prints the participant count
//! - Configuration via CLI port and optional TOML file

mod config;
mod console;
mod error;
mod runtime;

use config::Config;
use console::Console;
use runtime::{Relay, Shutdown};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        addr = %config.listen_addr(),
        chunk_size = config.chunk_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting tak-relay"
    );

    if let Err(e) = run(&config) {
        error!(error = %e, "Relay failed");
        return Err(e.into());
    }
    Ok(())
}

/// Bind, attach the console and signals, and run the event loop.
fn run(config: &Config) -> error::Result<()> {
    let shutdown = Shutdown::new();
    shutdown.on_signals()?;

    let mut relay = Relay::bind(config, shutdown.clone())?;

    match Console::attach(shutdown)? {
        Some(mut console) => relay.run(&mut console),
        None => relay.run(&mut ()),
    }
}
