use thiserror::Error;

use crate::auth::AuthError;
use crate::context::ResourceError;
use crate::engine::EngineError;
use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Control-plane request and catalog invariant violations.
///
/// The messages are part of the control wire format: the control server
/// serializes them verbatim into `{"error": ...}` replies.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("json root must be an object")]
    RootNotObject,

    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error("unsupported action")]
    UnsupportedAction,

    #[error("no apps have been specified")]
    NoApps,

    #[error("app manifest is expected")]
    ManifestExpected,

    #[error("the specified app is already active")]
    AlreadyActive,

    #[error("the specified app is not active")]
    NotActive,

    #[error("{0}")]
    Invalid(String),
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-subsystem errors; each subsystem keeps its
/// own canonical enum.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}
