//! # Host Bridge Traits
//!
//! Capability traits the offline cache and sync core depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the core and the host platform.
//! Each trait represents a collaborator the core requires but does not own:
//!
//! - [`RemoteClient`](remote::RemoteClient) - Authenticated upsert/delete/fetch against the remote store
//! - [`NetworkMonitor`](network::NetworkMonitor) - Online/offline probe with change notifications
//! - [`Clock`](time::Clock) - Time source for deterministic expiry and backoff
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! Collaborators are injected as `Arc<dyn Trait>` when the core is
//! constructed, so a missing capability is a compile-time or build-time
//! error rather than a runtime probe.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map authentication failures to `BridgeError::Unauthorized` and
//! transport failures to `BridgeError::Network` so the sync engine can tell a
//! systemic outage from a single bad operation.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! core's background tasks.

pub mod error;
pub mod network;
pub mod remote;
pub mod time;

pub use error::BridgeError;

pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use remote::{RemoteClient, WarmCandidate};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
