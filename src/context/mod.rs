//! Process-wide context: the root object owning shared resources.

mod ports;

pub use ports::PortAllocator;

use std::fs;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::logging::{LogSink, NullSink};
use crate::registry::{Category, Registry};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResourceError {
    #[error("no free ports left in range [{lo}, {hi}]")]
    OutOfPorts { lo: u16, hi: u16 },

    #[error("unable to bind '{endpoint}': {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("unable to prepare runtime directory {dir}: {source}")]
    Runtime {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// Owns the runtime directory and binds framed endpoints under it.
pub struct IoDriver {
    runtime: PathBuf,
}

impl IoDriver {
    pub fn new(runtime: &Path) -> Result<Self, ResourceError> {
        fs::create_dir_all(runtime).map_err(|source| ResourceError::Runtime {
            dir: runtime.to_path_buf(),
            source,
        })?;
        Ok(Self {
            runtime: runtime.to_path_buf(),
        })
    }

    pub fn endpoint(&self, name: &str) -> PathBuf {
        crate::paths::control_socket(&self.runtime, name)
    }

    /// Bind a listening socket, replacing any stale one left behind.
    pub fn bind(&self, name: &str) -> Result<UnixListener, ResourceError> {
        let path = self.endpoint(name);
        let _ = fs::remove_file(&path);
        UnixListener::bind(&path).map_err(|source| ResourceError::Bind {
            endpoint: path.display().to_string(),
            source,
        })
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime
    }
}

/// One per process. Shared by reference from every component, never copied.
pub struct Context {
    // Field order is tear-down order: the logger goes first because it was
    // built last, through the registry; the I/O driver goes last.
    logger: Arc<dyn LogSink>,
    registry: Registry,
    ports: PortAllocator,
    io: IoDriver,
    pub config: Config,
}

impl Context {
    /// Build a context and instantiate the logger named in the configuration
    /// through the registry.
    pub fn new(config: Config, logger_name: &str) -> crate::Result<Self> {
        let mut context = Self::bootstrap(config)?;

        let component = context.config.loggers.get(logger_name).cloned().ok_or_else(|| {
            crate::error::ConfigError::Invalid(format!(
                "logger instance '{logger_name}' is not configured"
            ))
        })?;
        let sink =
            context
                .registry
                .get::<crate::logging::LogSinkTag>(&context, &component.kind, logger_name, &component.args)?;
        context.logger = Arc::from(sink);
        Ok(context)
    }

    /// Build a context around a pre-built logger. Used by tests and embedders
    /// that manage their own sink.
    pub fn with_logger(config: Config, logger: Arc<dyn LogSink>) -> crate::Result<Self> {
        let mut context = Self::bootstrap(config)?;
        context.logger = logger;
        Ok(context)
    }

    // Construction order is fixed: I/O driver, port allocator, registry.
    // The registry must exist before anything is requested through it,
    // including the logger.
    fn bootstrap(config: Config) -> crate::Result<Self> {
        let io = IoDriver::new(&config.paths.runtime)?;
        let ports = PortAllocator::new(config.network.ports);

        let mut registry = Registry::new();
        crate::builtins::register(&mut registry)?;
        tracing::debug!(
            components = registry.len(),
            plugins = %config.paths.plugins.display(),
            "component registry frozen"
        );

        Ok(Self {
            logger: Arc::new(NullSink),
            registry,
            ports,
            io,
            config,
        })
    }

    pub fn io(&self) -> &IoDriver {
        &self.io
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn logger(&self) -> &Arc<dyn LogSink> {
        &self.logger
    }

    /// Instantiate a component of category `C` by registered type name.
    pub fn get<C: Category>(
        &self,
        type_name: &str,
        name: &str,
        args: &Value,
    ) -> crate::Result<Box<C::Instance>> {
        self.registry.get::<C>(self, type_name, name, args)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(mut config: Config) -> Self {
        config.paths.runtime = std::env::temp_dir();
        Self::with_logger(config, Arc::new(NullSink)).expect("test context")
    }
}
