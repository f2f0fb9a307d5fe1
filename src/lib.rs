//! Slipway - zero-downtime release tool
//!
//! Slipway uploads a source tree to a remote host as a numbered release
//! directory, conditionally installs dependencies and migrates the
//! database, atomically switches the live symlink, and prunes old
//! releases - guarded by a deployment lock so two operators can never
//! corrupt each other's deploy.

pub mod config;
pub mod error;
pub mod exec;
pub mod hostfs;
pub mod release;
pub mod scm;
pub mod transfer;
pub mod ui;

// Re-exports for convenience
pub use config::{ProjectFile, Role, Settings};
pub use error::{SlipwayError, SlipwayResult};
pub use exec::{CancelFlag, LocalRunner, Runner, ShellCommand, SshRunner};
pub use hostfs::{HostFs, SshFs};
pub use release::{CleanupReport, DeployLog, Orchestrator, PushOptions, PushReport};
pub use scm::{GitScm, Scm};
pub use transfer::{RsyncUploader, Uploader};
