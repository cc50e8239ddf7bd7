//! Broadcast fan-out.
//!
//! Every completed message is written once to every open participant,
//! including the one that sent it. A recipient whose write fails is marked
//! closed; the rest of the broadcast carries on.

use crate::runtime::{Registry, Transport};
use tracing::{debug, trace};

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Write attempts made.
    pub attempted: usize,
    /// Recipients that took the whole message.
    pub delivered: usize,
    /// Recipients marked closed by this broadcast.
    pub failed: usize,
}

/// Send `message` to every open participant in registry order.
///
/// Exactly one write is attempted per recipient. An error, or a write that
/// takes fewer bytes than the whole message, closes that recipient; partial
/// writes are not resumed.
pub fn broadcast<S: Transport>(message: &[u8], registry: &mut Registry<S>) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    registry.for_each_active(|key, participant| {
        if participant.is_closed() {
            return;
        }

        report.attempted += 1;
        match participant.stream.write(message) {
            Ok(n) if n == message.len() => {
                report.delivered += 1;
            }
            Ok(n) => {
                debug!(conn_id = key, written = n, len = message.len(), "Partial send");
                participant.close();
                report.failed += 1;
            }
            Err(e) => {
                debug!(conn_id = key, error = %e, "Send failed");
                participant.close();
                report.failed += 1;
            }
        }
    });

    trace!(
        len = message.len(),
        attempted = report.attempted,
        delivered = report.delivered,
        failed = report.failed,
        "Broadcast"
    );
    report
}
