//! Default filesystem locations and endpoint path resolution.

use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_PLUGINS_DIR: &str = "/usr/lib/stokehold";
pub(crate) const DEFAULT_RUNTIME_DIR: &str = "/var/run/stokehold";
pub(crate) const DEFAULT_SPOOL_DIR: &str = "/var/spool/stokehold";

/// Resolve a configured control endpoint to a socket path.
///
/// Absolute endpoints are used as-is; relative ones live under the runtime
/// directory.
pub(crate) fn control_socket(runtime: &Path, endpoint: &str) -> PathBuf {
    let candidate = Path::new(endpoint);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        runtime.join(endpoint)
    }
}
