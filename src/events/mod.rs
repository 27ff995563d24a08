pub mod decoder;
pub mod types;

pub use types::{EventKind, LendingEvent, LogEntry, LogOrigin};
