//! Public types for the Huginn API.

mod call;
mod endpoint;
mod record;
mod stats;

pub use call::{CallDescriptor, CallOptions};
pub use endpoint::{Endpoint, ServiceEndpoints};
pub use record::{Alert, DeadLetter};
pub use stats::ClientStats;
