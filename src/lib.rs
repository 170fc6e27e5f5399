#![forbid(unsafe_code)]

pub mod auth;
mod builtins;
pub mod config;
pub mod context;
pub mod daemon;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod logging;
mod paths;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod storage;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most embedders touch.
pub use crate::config::Config;
pub use crate::context::{Context, PortAllocator};
pub use crate::engine::{Engine, EngineFactory};
pub use crate::registry::{Category, Registry};
pub use crate::storage::Storage;
