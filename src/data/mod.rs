/// Record data layer
///
/// Generic CRUD over the physical tables of custom tables, with history and
/// change events. Events leave through an [`events::EventSink`]; the workflow
/// dispatcher is one consumer, external subscribers are another.

// Change events, event bus and dead-letter hook
pub mod events;

// Validated CRUD over custom tables
pub mod service;

pub use events::{EventBus, EventSink, RecordChangeEvent, RecordOperation};
pub use service::{CustomDataService, ListRequest, PageLimits, RecordWriter, WriteContext};
