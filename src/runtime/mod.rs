//! Single-threaded relay runtime.
//!
//! Readiness-based I/O through mio (epoll on Linux, kqueue on macOS). The
//! pieces, leaves first:
//! - `RecvBuffer`: per-connection receive buffer
//! - `Registry`: participants with mark/sweep closing
//! - `Framer`: terminator-delimited message extraction
//! - `broadcast`: fan-out with per-recipient failure isolation
//! - `Relay`: the event loop tying them together

mod buffer;
mod connection;
mod dispatch;
mod framer;
mod mio;

pub(crate) use buffer::RecvBuffer;
pub(crate) use connection::{Registry, Transport};
pub(crate) use dispatch::broadcast;
pub(crate) use framer::{Framer, DEFAULT_TERMINATOR};
pub(crate) use self::mio::Relay;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "shut down now" flag.
///
/// Set from signal handlers or the operator console, read by the event loop
/// once per iteration.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger on SIGINT and SIGTERM.
    pub fn on_signals(&self) -> io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }
}

/// Control-plane hook run once per loop iteration, after the readiness wait.
pub trait Operator {
    /// `participants` is the number of registered connections.
    fn service(&mut self, participants: usize);
}

/// No operator attached.
impl Operator for () {
    fn service(&mut self, _participants: usize) {}
}
