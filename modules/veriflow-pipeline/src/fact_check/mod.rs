pub mod orchestrator;
pub mod statement;

pub use orchestrator::{FactCheckOrchestrator, FactCheckOutcome, FactCheckRun};
pub use statement::{extract_statement, StatementSource};
