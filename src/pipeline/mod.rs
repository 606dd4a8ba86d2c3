pub mod combiner;
pub mod critic;
pub mod executor;
pub mod generator;
pub mod reporter;
pub mod state;
pub mod workflow;

pub use executor::{PytestRunner, TestRunner};
pub use state::{ExecutionReport, Stage, WorkflowState};
pub use workflow::{ProgressSink, Workflow, WorkflowOutcome};
