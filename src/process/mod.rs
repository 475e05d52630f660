//! Process attachment
//!
//! [`ProcessHandle`] owns the OS resource for one target process and reads
//! through it; [`Session`] bundles a source with the configured components
//! that analyse it.

pub mod handle;
pub mod session;

pub use handle::{AccessLevel, ProcessHandle};
pub use session::Session;
