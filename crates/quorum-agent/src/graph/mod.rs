pub mod binding;
pub mod executor;
pub mod run;
pub mod step;
pub mod validate;

pub use binding::InputBinding;
pub use executor::WorkflowExecutor;
pub use run::{RunStatus, StepFailure, StepRecord, StepState, WorkflowRun};
pub use step::{StepKind, StepSpec, WorkflowDefinition};
pub use validate::WorkflowGraph;
