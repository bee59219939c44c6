//! Consent handling for stored data
//!
//! [`ConsentAwareFileOrchestrator`] routes files by consent and
//! [`DataMigrator`] moves or wipes what was collected when consent changes.

mod gate;
mod migrator;

pub use gate::ConsentAwareFileOrchestrator;
pub use migrator::{DataMigrator, MigrationOperation};
