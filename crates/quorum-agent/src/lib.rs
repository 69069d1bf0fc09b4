pub mod budget;
pub mod consensus;
pub mod continuation;
pub mod graph;
pub mod interceptor;
pub mod registry;
pub mod run_context;
pub mod run_log;
pub mod tokens;

pub use budget::{BudgetTracker, Reservation};
pub use consensus::{
    AggregationStrategy, Candidate, ConsensusInput, ConsensusResult, ConsensusStrategy,
    LexicalSimilarity, VotingStrategy,
};
pub use continuation::{Continuation, ContinuationOptions, ContinuationState, TurnOutcome};
pub use graph::{
    RunStatus, StepKind, StepSpec, StepState, WorkflowDefinition, WorkflowExecutor, WorkflowGraph,
    WorkflowRun,
};
pub use interceptor::{Interceptor, InterceptorContext, InterceptorPipeline};
pub use registry::{AgentProfile, AgentRegistry};
pub use run_context::RunContext;
pub use run_log::RunLogger;
