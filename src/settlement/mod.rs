// Settlement pipeline: orchestration, scheduling and the storage seams
pub mod breaker;
pub mod orchestrator;
pub mod scheduler;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use breaker::{BreakerState, CircuitBreaker, FailureOutcome};
pub use orchestrator::{CycleReport, OrchestratorConfig, SettlementOrchestrator};
pub use scheduler::{SchedulerConfig, SchedulerState, SchedulerStatus, SettlementScheduler, SharedStatus};
