pub mod actor;
pub mod diagnostics;
pub mod resource;

pub use actor::{
  Coordinator, CoordinatorHandle, CoordinatorSettings, SendError, WorkUnit,
  message::{Operation, QueryResult, UnitId, UnitScope},
};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog, MemoryLog, TracingLog};
pub use gatehouse_core::{Config, config};
pub use resource::{FnResource, Resource, ResourceError, RetryPolicy, RetryingResource};
