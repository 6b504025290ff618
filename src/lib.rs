#![allow(dead_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod lock;
pub mod netprep;
pub mod output;
pub mod provider;
pub mod query;
pub mod quota;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod task;
pub mod timer;
