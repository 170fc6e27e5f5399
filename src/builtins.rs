//! Statically linked component types.
//!
//! Everything else arrives through the plugins directory; these are the
//! types the node cannot come up without.

use serde_json::Value;

use crate::context::Context;
use crate::logging::{self, LogSinkTag};
use crate::registry::Registry;
use crate::services::{LoggingService, Service, ServiceTag};
use crate::storage::{MemoryStorage, Storage, StorageTag};

pub(crate) fn register(registry: &mut Registry) -> crate::Result<()> {
    registry.register::<StorageTag>(
        "memory",
        Box::new(
            |_context: &Context, _name: &str, _args: &Value| -> crate::Result<Box<dyn Storage>> {
                Ok(Box::new(MemoryStorage::new()))
            },
        ),
    )?;

    registry.register::<LogSinkTag>("core", Box::new(logging::tracing_sink_factory))?;

    registry.register::<ServiceTag>(
        "logging",
        Box::new(
            |context: &Context, name: &str, _args: &Value| -> crate::Result<Box<dyn Service>> {
                Ok(Box::new(LoggingService::new(name, context.logger().clone())))
            },
        ),
    )?;

    Ok(())
}
