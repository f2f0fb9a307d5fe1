//! Change detection for quick-and-dirty deploys
//!
//! Decides whether dependency installation and database migration can
//! be skipped by comparing the new release against the previous one.
//! The migration check counts migration files; a rename or edit that
//! keeps the count is missed. That is a documented limitation of the
//! heuristic, kept as-is rather than silently strengthened.

use crate::error::SlipwayResult;
use crate::hostfs::HostFs;

/// Glob (relative to a release directory) that counts migration files
pub const MIGRATION_GLOB: &str = "*/migrations/*.py";

/// What a deploy must run for the new release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub install: bool,
    pub migrate: bool,
}

impl Decision {
    pub const EVERYTHING: Decision = Decision {
        install: true,
        migrate: true,
    };
}

/// Decide install/migrate for `new_path` against `previous_path`.
///
/// Thorough mode and first-ever deploys always do everything. In
/// quick-and-dirty mode, install is needed iff the manifest changed
/// byte-for-byte; migrate is needed if install is (new dependencies may
/// carry new migrations) or the migration-file count changed.
pub fn decide(
    host: &dyn HostFs,
    manifest: &str,
    new_path: &str,
    previous_path: Option<&str>,
    qad: bool,
) -> SlipwayResult<Decision> {
    let Some(previous) = previous_path else {
        return Ok(Decision::EVERYTHING);
    };
    if !qad {
        return Ok(Decision::EVERYTHING);
    }

    let install = !host.files_identical(
        &format!("{new_path}/{manifest}"),
        &format!("{previous}/{manifest}"),
    )?;
    let migrate = install
        || host.count_glob(new_path, MIGRATION_GLOB)?
            != host.count_glob(previous, MIGRATION_GLOB)?;

    Ok(Decision { install, migrate })
}
