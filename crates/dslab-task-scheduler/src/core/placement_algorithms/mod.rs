//! Implementations of task placement algorithms.

pub mod first_fit;
pub mod headroom_first;
