//! Task scheduling primitives shared by the kikx runtime.
//!
//! * [`spawn`]: classified task spawning on the current Tokio runtime
//! * [`TaskId`]: opaque correlation token for scheduled work
//! * [`TaskRegistry`]: keyed registry of cancellable units of work

mod class;
mod panic;
mod registry;
mod spawn;
mod token;

pub use class::TaskClass;
pub use panic::join_error_panic_message;
pub use registry::{ScheduledTask, TaskRegistry, TaskRegistryError};
pub use spawn::spawn;
pub use token::TaskId;
pub use tokio_util::sync::CancellationToken;
