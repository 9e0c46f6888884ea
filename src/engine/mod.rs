//! Core engine: universe filtering, volume and order-flow analysis, and the
//! cycle that ties them to scoring.

pub mod cycle;
pub mod history;
pub mod imbalance;
pub mod order_flow;
pub mod scanner;
pub mod scheduler;

pub use cycle::{ResultBoard, ScanCycle};
pub use scheduler::Scheduler;
