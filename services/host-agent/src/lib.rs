//! On-host agent for the ferrum fleet platform.
//!
//! Walks a bare machine through registration, installation and bootstrap
//! against the fleet controller, then keeps reconciling until the controller
//! asks for a reset.

pub mod client;
pub mod conditions;
pub mod config;
pub mod driver;
pub mod identity;
pub mod strategy;

#[cfg(test)]
pub mod testing;
