//! meshlog ingestion pipeline components.
//!
//! This crate provides the daemon that ingests live telemetry from a mesh
//! radio device and persists it into a normalized SQLite store.
//!
//! # Modules
//!
//! - [`source`] - Event source adapters (live TCP device session, JSONL replay)
//! - [`pipeline`] - Dispatcher, per-kind normalizers, node identity resolver
//! - [`store`] - SQLite persistence layer
//! - [`supervisor`] - Connection lifecycle, retry, liveness pulses
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   TcpSource      │  newline-delimited JSON frames from the device
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Dispatcher     │  classify by portnum, isolate per-event failures
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Normalizers    │  validate, resolve node identity, derive records
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Database       │  one transaction per event, cascade from nodes
//! └──────────────────┘
//! ```
//!
//! Events are processed strictly one at a time: the dispatcher runs each
//! packet to completion (commit or rollback) before the next frame is read,
//! which is what makes find-or-create node resolution race-free.

pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod supervisor;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use notify::SystemdNotifier;
pub use pipeline::{DispatchSnapshot, Dispatcher, Outcome};
pub use source::{JsonlSource, SourceEvent, TcpSource};
pub use store::Database;
pub use supervisor::Supervisor;
