//! Event Source Adapters
//!
//! Implementations of `EventSourcePort`:
//! - `RemoteEventSource`: hosted REST snapshots and realtime websocket subscriptions
//! - `InMemoryEventSource`: in-process tables with filtered fan-out

mod memory;
pub mod realtime;
mod remote;

pub use memory::InMemoryEventSource;
pub use realtime::{CodecError, RealtimeFrame};
pub use remote::{RemoteConfig, RemoteEventSource};
