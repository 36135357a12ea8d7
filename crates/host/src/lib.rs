//! Host for kikx application contexts.
//!
//! A [`Host`] owns every open [`AppContext`]. Each context bundles an event
//! channel, a process supervisor and an invocation dispatcher wired to the
//! context's capability tree. Clients reach contexts through the
//! newline-delimited JSON protocol served by [`ipc::serve`]:
//!
//! ```text
//! -> {"type":"open","app":"com.kikx.neko"}
//! <- {"type":"opened","context":"4f1c..."}
//! -> {"type":"call","id":1,"path":"tasks.run_task","config":{"args":["sleep 5"],"timeout":1}}
//! <- {"type":"error","id":1,"error":{"kind":"timeout","message":"invocation timed out after 1s"}}
//! ```
//!
//! Channel events share the stream as `{"event":...,"payload":...}` objects.

mod context;
mod error;
mod host;
pub mod ipc;
mod settings;
pub mod wire;

pub use context::AppContext;
pub use error::HostError;
pub use host::Host;
pub use settings::HostSettings;
