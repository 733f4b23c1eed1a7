//! WS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WsError>;

/// Top-level error type for wattshare.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("[WS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WS-2001] unknown user {user_id}")]
    UserNotFound { user_id: i64 },

    #[error("[WS-2002] unknown interval {interval_id}")]
    IntervalNotFound { interval_id: i64 },

    #[error("[WS-2101] session store unavailable during {context}: {details}")]
    StoreUnavailable {
        context: &'static str,
        details: String,
    },

    #[error("[WS-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[WS-2103] time-series store failure in {context}: {details}")]
    SeriesStore {
        context: &'static str,
        details: String,
    },

    #[error("[WS-2201] invariant violation: {details}")]
    InvariantViolation { details: String },

    #[error("[WS-2301] malformed sample row at line {line}: {details}")]
    MalformedSample { line: u64, details: String },

    #[error("[WS-2401] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WS-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[WS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WS-1001",
            Self::MissingConfig { .. } => "WS-1002",
            Self::ConfigParse { .. } => "WS-1003",
            Self::UserNotFound { .. } => "WS-2001",
            Self::IntervalNotFound { .. } => "WS-2002",
            Self::StoreUnavailable { .. } => "WS-2101",
            Self::Sql { .. } => "WS-2102",
            Self::SeriesStore { .. } => "WS-2103",
            Self::InvariantViolation { .. } => "WS-2201",
            Self::MalformedSample { .. } => "WS-2301",
            Self::Serialization { .. } => "WS-2401",
            Self::Io { .. } => "WS-3002",
            Self::ChannelClosed { .. } => "WS-3003",
            Self::Runtime { .. } => "WS-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::Sql { .. }
                | Self::SeriesStore { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Re-tag a SQLite failure raised inside a session mutation.
    ///
    /// Mutations are all-or-nothing, so any failure there means the change
    /// was not applied and the caller may retry explicitly.
    #[must_use]
    pub fn store_unavailable(context: &'static str, err: &rusqlite::Error) -> Self {
        Self::StoreUnavailable {
            context,
            details: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for WsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for WsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
