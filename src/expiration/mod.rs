//! Expiration Module
//!
//! Background eviction of TTL / max-idle expired records.
//!
//! ## Lifecycle
//! - The sweep runs every `map.expiry.task.period.seconds` over all partition containers.
//! - It is paused while the cluster is not operational (`Passive`, `InTransition`) and resumes
//!   when it is again.
//! - After shutdown no new sweep starts; one already running finishes.
//!
//! Records are also expired lazily: reading an expired record evicts it.

pub mod manager;
pub mod task;

#[cfg(test)]
mod tests;
