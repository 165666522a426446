//! # kmt common library
//!
//! Shared code for the Krav Maga progress tracker:
//! - Error type
//! - Configuration resolution (CLI / env / TOML / defaults)
//! - Database initialization, schema and row models
//! - Mastery levels and progress percentages
//! - Demo curriculum seed

pub mod config;
pub mod db;
pub mod error;
pub mod mastery;

pub use error::{Error, Result};
pub use mastery::{Mastery, ProgressSummary};
