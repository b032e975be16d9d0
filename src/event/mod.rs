//! Map Event Module
//!
//! Entry and partition-lost events, and the listeners that receive them.
//!
//! ## Core Concepts
//! - **Registrations**: per map, either local (this member only) or cluster-wide, and either an
//!   entry listener or a partition-lost listener.
//! - **Capability mask**: the hooks a listener implements are compiled into a bit mask wrapped
//!   around the caller's filter, so uninteresting events are dropped before deserialization.
//! - **Dispatch**: one background task delivers events in publication order.

pub mod filter;
pub mod listener;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
