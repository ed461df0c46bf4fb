//! Depot Common
//!
//! Shared utilities for the certificate depot crates.
//!
//! This crate provides:
//! - Component-based structured logging with a store identifier as context
//! - Logging configuration backed by `env_logger`
//! - Level-checked logging macros

pub mod logging;
pub mod macros;

#[doc(hidden)]
pub use log;

pub use logging::{Component, ComponentKey, LogLevel, Logger, LoggingConfig};
