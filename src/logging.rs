//! Tracing subscriber setup for the binaries.

use crate::error::{AppResult, DaqError};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(level: &str) -> String {
    format!("scope_daq={level}")
}

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one JSON
/// object per line.
pub fn init(level: &str, json: bool) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .map_err(|e| DaqError::Configuration(format!("Invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| DaqError::Configuration(format!("Logging already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_targets_this_crate() {
        assert_eq!(default_directive("debug"), "scope_daq=debug");
        assert!(EnvFilter::try_new(default_directive("warn")).is_ok());
    }
}
