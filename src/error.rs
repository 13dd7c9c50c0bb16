//! Error types for visitguard.
//!
//! Hot-path operations never fail: they return outcome values. Errors here
//! cover startup (configuration, ban list, country mask) and shutdown
//! persistence, and propagate to the composition root for logging.

use crate::config::ConfigError;
use thiserror::Error;

// ============================================================================
// Persistence Errors
// ============================================================================

/// Errors reading or writing the persisted permanent-ban list.
#[derive(Debug, Error)]
pub enum BanListError {
    #[error("ban list I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ban list is truncated: {len} bytes is not a whole number of 4-byte records")]
    Truncated { len: usize },
}

// ============================================================================
// Country Mask Errors
// ============================================================================

/// Errors loading the country mask range file.
#[derive(Debug, Error)]
pub enum CountryMaskError {
    #[error("country mask I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("country mask line {line}: invalid IPv4 range '{content}'")]
    Parse { line: usize, content: String },
}

// ============================================================================
// Startup Errors
// ============================================================================

/// Errors that abort `GuardRuntime::start`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load permanent ban list: {0}")]
    BanList(#[from] BanListError),

    #[error("failed to load country mask: {0}")]
    CountryMask(#[from] CountryMaskError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_message_names_length() {
        let err = BanListError::Truncated { len: 7 };
        assert!(err.to_string().contains("7 bytes"));
    }

    #[test]
    fn country_mask_parse_message_names_line() {
        let err = CountryMaskError::Parse {
            line: 3,
            content: "1.2.3/8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "country mask line 3: invalid IPv4 range '1.2.3/8'"
        );
    }

    #[test]
    fn startup_error_wraps_ban_list() {
        let err: StartupError = BanListError::Truncated { len: 5 }.into();
        assert!(matches!(err, StartupError::BanList(_)));
        assert!(err.to_string().starts_with("failed to load permanent ban list"));
    }
}
