//! CPU/GPU synchronization: asynchronous queries and fences.
//!
//! Both kinds of object are kept in arenas owned by the context. Pending
//! ones sit on an intrusive active list that the end-of-frame sweep walks,
//! so polling cost is proportional to the work still in flight rather than
//! to the number of objects ever created.

mod fence;
mod query;

pub use fence::{FenceCallback, FenceKey, FenceRegistry, FenceSignal, GpuFence};
pub use query::{AsyncQuery, QueryKey, QueryRegistry, QueryState, QueryTarget};
