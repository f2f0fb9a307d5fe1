//! Deployment lock
//!
//! The lock is a symlink (`deployment.lock`) pointing at the release
//! directory being prepared. Creating it is the acquisition; promoting
//! the release renames the very same symlink over the live pointer, so
//! the unlock and the switch are one atomic operation and there is no
//! window in which the live pointer names a half-uploaded release.

use crate::error::{SlipwayError, SlipwayResult};
use crate::hostfs::HostFs;
use crate::release::repository::LIVE_NAME;

/// Name of the lock symlink
pub const LOCK_NAME: &str = "deployment.lock";

/// Acquire the deployment lock for `candidate`.
///
/// An existing lock fails with `LockHeld` carrying its age when the
/// remote clock can be read; that decision belongs to the operator, so
/// there is no retry here. `force` removes any existing lock first.
pub fn acquire<'a>(
    host: &'a dyn HostFs,
    project_path: &str,
    candidate: &str,
    force: bool,
) -> SlipwayResult<LockGuard<'a>> {
    let lock_path = format!("{project_path}/{LOCK_NAME}");
    let live_path = format!("{project_path}/{LIVE_NAME}");

    if force {
        host.remove(&lock_path)?;
    }
    if host.make_link(candidate, &lock_path)? {
        return Ok(LockGuard {
            host,
            lock_path,
            live_path,
            candidate: candidate.to_string(),
            armed: true,
        });
    }

    // A probe failure must not mask the held lock; report an unknown age.
    let held_for = match (host.mtime(&lock_path), host.now()) {
        (Ok(since), Ok(now)) => Some((now - since).max(0)),
        _ => None,
    };
    Err(SlipwayError::LockHeld { held_for })
}

/// Scoped lock: commit promotes, abort unlinks, and dropping without
/// either releases the lock on the way out of any failure path.
pub struct LockGuard<'a> {
    host: &'a dyn HostFs,
    lock_path: String,
    live_path: String,
    candidate: String,
    armed: bool,
}

impl LockGuard<'_> {
    /// Release directory this lock protects
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// Atomically rename the lock over the live pointer: the candidate
    /// becomes live and the lock ceases to exist in one rename.
    pub fn commit(mut self) -> SlipwayResult<()> {
        self.host.rename(&self.lock_path, &self.live_path)?;
        self.armed = false;
        Ok(())
    }

    /// Remove the lock without promoting; the previous release stays live.
    pub fn abort(mut self) -> SlipwayResult<()> {
        self.armed = false;
        self.host.remove(&self.lock_path)
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_path", &self.lock_path)
            .field("live_path", &self.live_path)
            .field("candidate", &self.candidate)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.host.remove(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostfs::MemHost;

    fn host() -> MemHost {
        let host = MemHost::new();
        host.add_dir("/app");
        host
    }

    #[test]
    fn acquire_creates_the_lock_symlink() {
        let host = host();
        let guard = acquire(&host, "/app", "src.00002", false).unwrap();
        assert_eq!(host.link("/app/deployment.lock").unwrap(), "src.00002");
        assert_eq!(guard.candidate(), "src.00002");
    }

    #[test]
    fn second_acquire_fails_with_lock_held() {
        let host = host();
        host.set_clock(1000);
        let _guard = acquire(&host, "/app", "src.00002", false).unwrap();
        host.set_clock(1075);
        match acquire(&host, "/app", "src.00003", false) {
            Err(SlipwayError::LockHeld { held_for }) => assert_eq!(held_for, Some(75)),
            other => panic!("expected LockHeld, got {other:?}"),
        };
    }

    #[test]
    fn force_takes_over_an_existing_lock() {
        let host = host();
        let stale = acquire(&host, "/app", "src.00002", false).unwrap();
        std::mem::forget(stale); // simulate a killed deploy leaving the lock behind
        let guard = acquire(&host, "/app", "src.00003", true).unwrap();
        assert_eq!(host.link("/app/deployment.lock").unwrap(), "src.00003");
        drop(guard);
    }

    #[test]
    fn commit_promotes_and_dissolves_the_lock() {
        let host = host();
        let guard = acquire(&host, "/app", "src.00002", false).unwrap();
        guard.commit().unwrap();
        assert_eq!(host.link("/app/src").unwrap(), "src.00002");
        assert!(host.link("/app/deployment.lock").is_none());
        // Lock is free again
        assert!(acquire(&host, "/app", "src.00003", false).is_ok());
    }

    #[test]
    fn abort_releases_without_promoting() {
        let host = host();
        host.make_link("src.00001", "/app/src").unwrap();
        let guard = acquire(&host, "/app", "src.00002", false).unwrap();
        guard.abort().unwrap();
        assert_eq!(host.link("/app/src").unwrap(), "src.00001");
        assert!(host.link("/app/deployment.lock").is_none());
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let host = host();
        {
            let _guard = acquire(&host, "/app", "src.00002", false).unwrap();
        }
        assert!(host.link("/app/deployment.lock").is_none());
        assert!(acquire(&host, "/app", "src.00003", false).is_ok());
    }

    #[test]
    fn error_unwind_releases_the_lock() {
        let host = host();
        fn deploy_step_that_fails(host: &MemHost) -> SlipwayResult<()> {
            let _guard = acquire(host, "/app", "src.00002", false)?;
            Err(SlipwayError::Transport {
                command: "pip install".to_string(),
                detail: "boom".to_string(),
            })
        }
        assert!(deploy_step_that_fails(&host).is_err());
        assert!(host.link("/app/deployment.lock").is_none());
    }
}
