//! Core pipeline abstractions: identifiers, parameters, the task trait and
//! chain resolution.

pub mod chain;
pub mod params;
pub mod task;
pub mod types;
