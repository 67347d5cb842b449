//! Event Bus & Timeline (C2): append-only structured activity stream.

mod bus;
mod logger;
mod types;

pub use bus::{EventBus, EventEmitter};
pub use logger::{JsonlLogger, read_timeline, timeline_path};
pub use types::{Event, TimelineEntry};
