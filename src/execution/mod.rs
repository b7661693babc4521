// Reconciliation and execution: from target weights to the minimum set of
// market orders, and from orders to terminal fills.

pub mod executor;
pub mod reconciler;

pub use executor::{ExecutionOutcome, ExecutionReport, Executor, ExecutorConfig};
pub use reconciler::{build_plan, ReconcilerConfig};
