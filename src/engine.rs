//! Engine and isolate seams.
//!
//! An engine is the running instance of one app: it owns the app's slave
//! pool, queueing and backpressure. Those internals live behind the traits
//! here; the catalog only starts, stops and introspects engines.

use std::path::Path;

use serde_json::{json, Value};
use thiserror::Error;

use crate::context::Context;
use crate::registry::Category;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error("unable to start the engine: {0}")]
    Startup(String),

    #[error("unable to stop the engine: {0}")]
    Shutdown(String),
}

/// A running app instance, exclusively owned by the catalog's engine map.
pub trait Engine: Send {
    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    fn info(&self) -> Value;
}

/// Builds engines over `(context, name, manifest)`.
pub trait EngineFactory: Send {
    fn create(
        &self,
        context: &Context,
        name: &str,
        manifest: &Value,
    ) -> crate::Result<Box<dyn Engine>>;
}

/// Worker process isolation backends (process, cgroup, ...). Plugins
/// register concrete types; the node core only routes through the trait.
pub trait Isolate: Send + Sync {
    fn spawn(
        &self,
        executable: &Path,
        args: &[String],
        environment: &[(String, String)],
    ) -> Result<Box<dyn WorkerHandle>, EngineError>;
}

pub trait WorkerHandle: Send {
    fn terminate(&mut self);
}

/// Registry tag for isolation backends.
pub struct IsolateTag;

impl Category for IsolateTag {
    type Instance = dyn Isolate;
    const NAME: &'static str = "isolate";
}

/// Minimal in-tree engine: tracks lifecycle state and echoes its manifest.
/// Real engines layer slave pools on top of this surface.
pub struct BasicEngine {
    name: String,
    manifest: Value,
    running: bool,
}

impl BasicEngine {
    pub fn new(name: &str, manifest: &Value) -> Self {
        Self {
            name: name.to_string(),
            manifest: manifest.clone(),
            running: false,
        }
    }
}

impl Engine for BasicEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        tracing::info!(app = %self.name, "starting the app");
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        tracing::info!(app = %self.name, "stopping the app");
        self.running = false;
        Ok(())
    }

    fn info(&self) -> Value {
        json!({
            "state": if self.running { "running" } else { "stopped" },
            "manifest": self.manifest,
        })
    }
}

pub struct BasicEngineFactory;

impl EngineFactory for BasicEngineFactory {
    fn create(
        &self,
        _context: &Context,
        name: &str,
        manifest: &Value,
    ) -> crate::Result<Box<dyn Engine>> {
        Ok(Box::new(BasicEngine::new(name, manifest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_engine_reports_its_state() {
        let mut engine = BasicEngine::new("echo", &json!({"slave": "py"}));
        assert_eq!(engine.info()["state"], "stopped");

        engine.start().unwrap();
        assert_eq!(engine.info()["state"], "running");
        assert_eq!(engine.info()["manifest"]["slave"], "py");

        engine.stop().unwrap();
        assert_eq!(engine.info()["state"], "stopped");
    }
}
