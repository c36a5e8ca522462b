//! Ingestion dispatcher: one packet in, one outcome out.
//!
//! The dispatcher is the failure boundary of the pipeline. Every packet
//! runs `Classifying → Normalizing → Committed | Rejected | Failed`,
//! strictly one at a time; handler errors are caught here, logged with
//! the serialized packet for reconstruction, and never propagate — the
//! stream continues with the next event.

use crate::store::Database;
use meshlog_core::{PortKind, RawPacket};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tracing::{debug, error, warn};

use super::handlers::{
    handle_node_info, handle_position, handle_telemetry, handle_text_message, handle_traceroute,
    Disposition,
};

/// Terminal state of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event's records were committed.
    Committed,
    /// A business rule declined persistence.
    Rejected,
    /// The normalizer failed; effects were rolled back.
    Failed,
    /// Routing traffic or an unrecognized kind; logged only.
    Ignored,
}

#[derive(Debug, Default)]
struct DispatchStats {
    received: AtomicUsize,
    committed: AtomicUsize,
    rejected: AtomicUsize,
    failed: AtomicUsize,
    ignored: AtomicUsize,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub received: usize,
    pub committed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub ignored: usize,
}

/// Classifies packets and funnels each through its normalizer.
pub struct Dispatcher {
    db: Database,
    direct_dest_id: i64,
    /// Local node identity captured at session establishment; 0 = unknown.
    local_node: AtomicI64,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher writing to the given database.
    pub fn new(db: Database, direct_dest_id: i64) -> Self {
        Self {
            db,
            direct_dest_id,
            local_node: AtomicI64::new(0),
            stats: DispatchStats::default(),
        }
    }

    /// Record the local node identity announced by the device session.
    /// Messages addressed to this id are discarded, not stored.
    pub fn set_local_node(&self, id: i64) {
        self.local_node.store(id, Ordering::SeqCst);
    }

    /// The local node identity, if a session has announced one.
    pub fn local_node(&self) -> Option<i64> {
        match self.local_node.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Process one packet to completion. Never returns an error: handler
    /// failures are logged and mapped to [`Outcome::Failed`].
    pub async fn dispatch(&self, packet: &RawPacket) -> Outcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let kind = packet.kind();
        let result = match kind {
            PortKind::NodeInfo => handle_node_info(&self.db, packet).await,
            PortKind::Position => handle_position(&self.db, packet, self.direct_dest_id).await,
            PortKind::Telemetry => handle_telemetry(&self.db, packet, self.direct_dest_id).await,
            PortKind::TextMessage => {
                handle_text_message(&self.db, packet, self.local_node()).await
            }
            PortKind::Traceroute => handle_traceroute(&self.db, packet).await,
            PortKind::Routing => {
                debug!("Routing packet from {} ignored", packet.sender());
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                return Outcome::Ignored;
            }
            PortKind::Unknown => {
                warn!(
                    "Unknown portnum {:?} from {}",
                    packet.portnum(),
                    packet.sender()
                );
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                return Outcome::Ignored;
            }
        };

        match result {
            Ok(Disposition::Persisted) => {
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                Outcome::Committed
            }
            Ok(Disposition::Rejected(reason)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("{:?} packet from {} rejected: {}", kind, packet.sender(), reason);
                Outcome::Rejected
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Failed to process {:?} packet from {}: {}",
                    kind,
                    packet.sender(),
                    e
                );
                error!(
                    "Offending packet: {}",
                    serde_json::to_string(packet)
                        .unwrap_or_else(|_| "<unserializable>".to_string())
                );
                Outcome::Failed
            }
        }
    }

    /// Current counter values.
    pub fn stats(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            received: self.stats.received.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            ignored: self.stats.ignored.load(Ordering::Relaxed),
        }
    }
}
