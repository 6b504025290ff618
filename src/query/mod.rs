//! Translation of list requests into owner-scoped relational queries.

pub mod composer;
pub mod input;

pub use composer::{compose, ResourceQuery, SqlValue};
pub use input::{ListInput, ManagedFilter, OrderKey};
