//! Driver configuration.
//!
//! Options can be built directly, deserialized from JSON, or derived from a
//! loosely typed environment map with [`DriverOptions::from_env`].
//!
//! # Format
//!
//! ```json
//! {
//!   "ignoreAppleDouble": true,
//!   "disableFileCache": false,
//!   "readOnly": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Environment key enabling [`DriverOptions::ignore_apple_double`].
pub const ENV_IGNORE_APPLE_DOUBLE: &str = "ignoreAppleDouble";
/// Environment key enabling [`DriverOptions::disable_file_cache`].
pub const ENV_DISABLE_FILE_CACHE: &str = "disableFileCache";
/// Environment key enabling [`DriverOptions::read_only`].
pub const ENV_READ_ONLY: &str = "readOnly";

/// Behavior switches for a [`CachingDriver`](crate::CachingDriver).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverOptions {
    /// Treat OS metadata sidecar files (`._*`, `.DS_Store`, ...) as absent
    /// without asking the backend.
    pub ignore_apple_double: bool,
    /// Read content straight from the backend instead of through the local
    /// content cache.
    pub disable_file_cache: bool,
    /// Reject every mutating operation with
    /// [`Error::ReadOnly`](crate::Error::ReadOnly).
    pub read_only: bool,
}

impl DriverOptions {
    /// Build options from an environment map.
    ///
    /// A switch is enabled when its key is present and its value is either
    /// `null` or `true`. Any other value, or a missing key, leaves it off.
    pub fn from_env(env: &HashMap<String, Value>) -> Self {
        Self {
            ignore_apple_double: is_enabled(env, ENV_IGNORE_APPLE_DOUBLE),
            disable_file_cache: is_enabled(env, ENV_DISABLE_FILE_CACHE),
            read_only: is_enabled(env, ENV_READ_ONLY),
        }
    }
}

fn is_enabled(env: &HashMap<String, Value>, key: &str) -> bool {
    matches!(env.get(key), Some(Value::Null | Value::Bool(true)))
}
