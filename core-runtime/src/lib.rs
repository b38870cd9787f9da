//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the offline cache and sync
//! crates:
//! - Logging and tracing setup
//! - Configuration builder with capability checks
//! - SQLite connection pool
//! - Event bus
//!
//! Every other core crate depends on this one for its logging conventions,
//! database pool and event types.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
