//! Alerted-set storage.

pub mod alerted;

pub use alerted::{AlertedSet, MemoryAlertedSet, SqliteAlertedSet};
