pub mod engine;
pub mod interpreter;
pub mod rate_gate;
pub mod retry;
pub mod templates;

pub use engine::{ExecutionReport, WorkflowEngine};
pub use interpreter::{Disposition, DriveOutcome, GraphInterpreter, RunState};
pub use rate_gate::RateGate;
pub use retry::RetryPolicy;
