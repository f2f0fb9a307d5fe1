//! Error types for Slipway
//!
//! One `thiserror` enum for the whole library; the binary converts to
//! `anyhow` at the rim.

use thiserror::Error;

/// Result type alias for Slipway operations
pub type SlipwayResult<T> = Result<T, SlipwayError>;

/// Main error type for Slipway operations
#[derive(Error, Debug)]
pub enum SlipwayError {
    /// A setting was requested that has neither an override nor a default
    #[error("undefined setting '{name}'")]
    UndefinedKey { name: String },

    /// Template defaults reference each other in a cycle
    #[error("setting '{name}' is defined in terms of itself")]
    CyclicDefinition { name: String },

    /// Another deploy holds the lock; `held_for` is seconds, when known
    #[error("deployment lock is held{} - another deploy may be in flight (re-run with --force to take over)", format_lock_age(.held_for))]
    LockHeld { held_for: Option<i64> },

    /// A remote or local command failed; carries the command and its output
    #[error("command failed: {command}\n{detail}")]
    Transport { command: String, detail: String },

    /// An operation needed release history and none exists
    #[error("no releases found on the remote host")]
    NoReleasesFound,

    /// The deploy log is missing or has no entries
    #[error("deploy log is empty")]
    EmptyLog,

    /// Operator declined a confirmation prompt
    #[error("aborted by operator")]
    Aborted,

    /// Documented stub - the operation has no implementation yet
    #[error("'{what}' is not implemented yet")]
    NotImplemented { what: String },

    /// Interrupt received; the run unwound through cleanup
    #[error("interrupted")]
    Interrupted,

    /// A deploy log line did not have the expected four fields
    #[error("malformed deploy log line: {line:?}")]
    LogFormat { line: String },

    /// Configuration file could not be read or parsed
    #[error("config file {path}: {message}")]
    ConfigFile { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_lock_age(held_for: &Option<i64>) -> String {
    match held_for {
        Some(secs) if *secs >= 3600 => format!(" (for {}h {}m)", secs / 3600, (secs % 3600) / 60),
        Some(secs) if *secs >= 60 => format!(" (for {}m {}s)", secs / 60, secs % 60),
        Some(secs) => format!(" (for {}s)", secs),
        None => String::new(),
    }
}
