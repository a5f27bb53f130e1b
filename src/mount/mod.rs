//! Mounts and their sources
//!
//! # Architecture
//!
//! ```text
//!                        Arc<MountRegistry>
//!                   ┌─────────────────────────┐
//!                   │ mounts: HashMap<name,   │
//!                   │   Mountpoint {          │
//!                   │     sources: queue,     │
//!                   │     fanout,             │
//!                   │     now_playing,        │
//!                   │   }                     │
//!                   │ >                       │
//!                   └───────────┬─────────────┘
//!                               │
//!       ┌───────────────────────┼───────────────────────┐
//!       │                       │                       │
//!       ▼                       ▼                       ▼
//!   [Source, prio 10]     [Source, prio 0]         [Listener]
//!   write() ─► fanout     write() ─► discard      ring.read()
//! ```
//!
//! Only the top of each mount's queue writes into the fan-out. When it
//! leaves, the mount worker points the next source at the fan-out; listeners
//! keep reading from the same ring buffers throughout.

pub mod config;
pub mod error;
pub mod mountpoint;
pub mod queue;
pub mod registry;
pub mod source;

pub use config::RegistryConfig;
pub use error::MountError;
pub use mountpoint::{ListenerFeed, ListenerGuard, MountPhase, MountStatus, Mountpoint, StreamProperties};
pub use queue::{Named, SourceQueue};
pub use registry::MountRegistry;
pub use source::{Source, SourceId};
