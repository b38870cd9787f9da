//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms and for
//! hosts that push platform signals into the core.
//!
//! ## Overview
//!
//! - `DesktopNetworkMonitor` - TCP reachability probe with a polling change stream
//! - `ManualNetworkMonitor` - connectivity driven by the host (mobile OS callbacks, tests)
//!
//! The remote store client is always supplied by the host application since
//! its schema and authentication are outside the core.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::DesktopNetworkMonitor;
//! use std::sync::Arc;
//!
//! let monitor = Arc::new(DesktopNetworkMonitor::new().with_probe_addr("api.example.com:443"));
//! ```

mod network;

pub use network::{DesktopNetworkMonitor, ManualNetworkMonitor};
