pub mod backend;
pub mod export;
pub mod migration;
pub mod models;
pub mod schema;
pub mod sqlite;
