pub mod engine;
pub mod environment;
pub mod extract;
pub mod progress;
pub mod summary;
pub mod title;
pub mod types;

pub use engine::{Dispatch, DispatchPlan, RunSecrets, WorkflowEngine};
pub use types::{WorkflowRequest, WorkflowRunState, WorkflowStage};
