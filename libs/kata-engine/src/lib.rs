pub mod evaluator;
pub mod executor;
pub mod guard;
pub mod harness;
pub mod runner;


pub use evaluator::{summarize, HarnessReport, ResultParser};
pub use executor::ExecutionCoordinator;
pub use guard::{Rejection, StaticGuard};
pub use harness::{HarnessError, HarnessProgram, TestHarnessGenerator};
pub use runner::{ProcessRunner, ProgramRunner};
