//! Execution Module
//!
//! Where map work actually runs.
//!
//! ## Execution Contexts
//! 1. **Partition workers**: every partition is bound to exactly one worker task. Operations
//!    for a partition are queued on that worker and run one after another, which is what keeps
//!    record store mutation single-threaded per partition.
//! 2. **Bounded executors**: named pools such as `query` that cap how many blocking scan or
//!    accumulation tasks run at the same time.
//!
//! ## Submodules
//! - **`service`**: the `ExecutionService` owning workers and named pools.
//! - **`types`**: operation and completion handle types shared by callers.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
