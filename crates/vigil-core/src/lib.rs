//! # Vigil Core
//!
//! Core traits, types, and errors shared by the Vigil telemetry SDK crates.
//!
//! This crate holds the values that flow between the persistence layer and the
//! rest of the SDK without depending on any filesystem or runtime concerns.
//!
//! ## Key Types
//!
//! - [`ConsentState`]: The user's tracking consent (pending, granted, not granted)
//! - [`ConsentProvider`]: Explicit owner of the current consent, no global state
//! - [`RawBatchEvent`]: An opaque event payload plus its optional metadata
//! - [`UserInfo`] / [`NetworkInfo`]: Mutable context captured in snapshots
//! - [`CrashLog`]: The marker a native crash handler leaves behind
//!
//! ## Key Traits
//!
//! - [`Clock`]: Time abstraction for testability

pub mod consent;
pub mod context;
pub mod crash;
pub mod error;
pub mod event;
pub mod traits;

// Re-export main types
pub use consent::*;
pub use context::*;
pub use crash::*;
pub use error::*;
pub use event::*;
pub use traits::*;
