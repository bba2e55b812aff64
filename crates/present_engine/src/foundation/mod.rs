//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types consumed by the scene records
//! - Logging setup

pub mod logging;
pub mod math;
