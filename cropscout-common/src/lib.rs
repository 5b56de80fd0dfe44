//! # CropScout Common Library
//!
//! Shared code for CropScout services including:
//! - Event types (ScoutEvent enum) and the EventBus
//! - Common error types
//! - Configuration file loading and data directory resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, ReadyTrigger, ScoutEvent};
