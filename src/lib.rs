#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod code;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod hook;
pub mod memory;
pub mod menu;
pub mod patch;
pub mod scan;
pub mod talk;
pub mod text;

pub use config::EngineConfig;
pub use engine::{Engine, HostBindings};
pub use error::{Error, Result};
