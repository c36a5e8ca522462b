//! The ingestion pipeline.
//!
//! One packet in, one outcome out: the [`Dispatcher`] classifies the
//! packet, hands it to the normalizer for its kind, and isolates any
//! failure so a bad event never halts the stream. Normalizers run their
//! database effects inside a single transaction per event; the
//! [`nodes`] resolver maintains the canonical node registry that every
//! dependent record hangs off.

mod dispatcher;
mod handlers;
mod nodes;

pub use dispatcher::{DispatchSnapshot, Dispatcher, Outcome};
pub use handlers::Disposition;
pub use nodes::{find_by_identity, reconcile, resolve_or_create, NodeFields};
