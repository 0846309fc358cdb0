//! The coordination façade and the application context that wires the bus,
//! router, learning core, background cycles and store together.

pub mod context;
pub mod coordinator;
pub mod pump;

pub use context::{AppContext, ContextParts};
pub use coordinator::{Coordinator, CoordinatorStatus, PendingTask, TaskResult, COORDINATOR_ID};
pub use pump::EventPump;
