//! Database models, schema and shared queries

pub mod curriculum;
pub mod init;
pub mod models;
pub mod seed;

pub use init::*;
pub use models::*;
