//! Keep-alive directive forwarded to `/api/generate`

use serde::{Deserialize, Serialize};

/// How long the server should keep a model resident after a request.
///
/// Forwarded verbatim as the `keep_alive` field of the generate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeepAlive {
    /// Integer seconds (`0` unloads immediately, negative keeps forever)
    Seconds(i64),
    /// Server-parsed duration string (e.g., "5m", "1h")
    Duration(String),
}

impl KeepAlive {
    /// Whether this directive asks the server to unload right after the request.
    ///
    /// Placement attribution after a successful run will usually find nothing resident.
    pub fn unloads_immediately(&self) -> bool {
        match self {
            KeepAlive::Seconds(s) => *s == 0,
            KeepAlive::Duration(d) => matches!(d.trim(), "0" | "0s" | "0m"),
        }
    }
}
