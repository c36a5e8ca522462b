//! Core types and validation for the meshlog ingestion pipeline.
//!
//! This crate provides:
//! - A serde model of the loosely-typed JSON frames emitted by the mesh
//!   device ([`RawPacket`] and its payload sub-records)
//! - Event-kind classification ([`PortKind`]) ahead of field extraction
//! - Hop/SNR sentinel filtering for traceroute payloads ([`RouteHops`])
//! - Shared error types
//!
//! No I/O happens here; the ingest crate owns sockets and the database.

mod error;
mod packet;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Reserved route entry meaning "no node at this hop" (max u32).
/// Entries equal to this value are dropped before persistence.
pub const ROUTE_NO_NODE: u32 = u32::MAX;

/// Reserved SNR reading meaning "unknown". Entries equal to this value are
/// dropped before persistence.
pub const SNR_UNKNOWN: i32 = -128;

/// Node role recorded when an announcement carries none.
pub const DEFAULT_ROLE: &str = "CLIENT";

pub use error::{Error, Result};
pub use packet::{
    Decoded, DeviceMetrics, EnvironmentMetrics, PortKind, PositionInfo, RawPacket, RouteDiscovery,
    RouteHops, TelemetryInfo, UserInfo,
};
