pub mod common;
pub mod compliance;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod inventory;
pub mod log;
pub mod migration;
pub mod placement;
pub mod placement_algorithms;
pub mod power;
pub mod priority;
pub mod scheduler;
