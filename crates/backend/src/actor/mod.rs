//! Actor-based coordination of access to the resource
//!
//! Callers never touch the resource directly. They send [`message::Operation`]s
//! through a [`CoordinatorHandle`] and await the result slot carried by each
//! one. A single [`Coordinator`] task decides when each operation may run.
//!
//! # Architecture
//!
//! - [`WorkQueue`]: the inbound channel plus a spill-over buffer, so the
//!   coordinator can jump ahead to a unit of work's next message without
//!   reordering anything it skips
//! - [`ReaderPool`]: bounded parallel reads with a completion barrier
//! - [`Coordinator`]: the loop that enforces the access modes
//!
//! # Access Modes
//!
//! ```text
//! Read         parallel with other reads
//! Write        exclusive: waits for in-flight reads, runs alone
//! Unit of work reads parallel, writes exclusive, no interleaving with other
//!              units or standalone writes; ends by commit, cancel or undo
//! ```

mod coordinator;
pub mod handle;
pub mod message;
mod pool;
mod queue;


pub use coordinator::{Coordinator, CoordinatorSettings};
pub use handle::{CoordinatorHandle, SendError, WorkUnit};
pub use pool::{ReadHandle, ReaderPool};
pub use queue::WorkQueue;
