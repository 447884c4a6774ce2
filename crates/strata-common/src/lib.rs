//! StrataDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all StrataDB
//! components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ArenaConfig, EngineConfig, IndexConfig};
pub use error::{Result, StrataError};
pub use types::{ColumnAttr, ColumnType, DataType};
