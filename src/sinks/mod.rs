//! Built-in [`DeadLetterSink`](crate::DeadLetterSink) and
//! [`AlertSink`](crate::AlertSink) implementations.
//!
//! - [`TracingSink`]: writes records to the log. The builder's default.
//! - [`MemorySink`]: keeps records in memory for inspection (tests,
//!   health endpoints, the CLI).

pub mod logging;
pub mod memory;

pub use logging::TracingSink;
pub use memory::MemorySink;
