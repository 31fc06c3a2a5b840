pub mod governor;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod task;
pub mod types;
