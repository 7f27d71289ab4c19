#![doc = include_str!("../readme.md")]

pub use colored;

pub mod core;
pub mod extensions;
pub mod simulation;
