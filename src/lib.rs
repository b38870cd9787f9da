//! Workspace entry crate.
//!
//! Host applications depend on `recipe-core-workspace` and enable the
//! `desktop-shims` feature to get the offline data service wired with the
//! desktop bridge adapters, without naming each workspace crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
