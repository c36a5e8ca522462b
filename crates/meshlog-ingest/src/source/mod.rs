//! Event source adapters.
//!
//! Two ways packets enter the pipeline:
//!
//! - [`TcpSource`] - live session with the mesh device: newline-delimited
//!   JSON frames over TCP, starting with a session banner that announces
//!   the local node identity
//! - [`JsonlSource`] - replay of a captured frame stream from a JSONL
//!   file, for backfill and testing
//!
//! Both skip unparseable frames with a log line rather than failing; the
//! dispatcher downstream never sees a frame that didn't decode.

mod jsonl;
mod tcp;

pub use jsonl::{JsonlSource, JsonlStats};
pub use tcp::{SourceEvent, TcpSource};
