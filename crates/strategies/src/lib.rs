mod profit_calculator;
mod risk_governor;
mod intent_registry;
mod settlement;
mod execution_coordinator;

pub use profit_calculator::*;
pub use risk_governor::*;
pub use intent_registry::*;
pub use settlement::*;
pub use execution_coordinator::{ExecutionCoordinator, ExecutionStats, PipelineStage};
