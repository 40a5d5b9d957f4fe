//! specprobe-runner: concurrent, retrying execution of contract probes

pub mod engine;
pub mod planner;
pub mod retry;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use engine::{EngineError, ProbeEngine};
pub use planner::RequestPlanner;
pub use retry::RetryPolicy;
pub use scheduler::Batch;
pub use transport::{ReqwestTransport, Transport};
