//! Release directory bookkeeping
//!
//! Releases are numbered directories (`src.00042`) under the project
//! path; the live pointer is the `src` symlink next to them. Ordering
//! is purely numeric so clock skew between operator and host can never
//! reorder history.

use crate::error::{SlipwayError, SlipwayResult};
use crate::hostfs::HostFs;

/// Release directory name prefix
pub const RELEASE_PREFIX: &str = "src.";

/// Name of the live-pointer symlink
pub const LIVE_NAME: &str = "src";

const SEQUENCE_WIDTH: usize = 5;

/// One numbered release directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub sequence: u32,
    pub name: String,
}

/// Parse `src.00042` into 42; anything else is not a release
pub fn parse_sequence(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(RELEASE_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Format a sequence number as a release directory name
pub fn release_name(sequence: u32) -> String {
    format!("{}{:0width$}", RELEASE_PREFIX, sequence, width = SEQUENCE_WIDTH)
}

/// Enumerates releases on the host
pub struct ReleaseRepository<'a> {
    host: &'a dyn HostFs,
    project_path: String,
}

impl<'a> ReleaseRepository<'a> {
    pub fn new(host: &'a dyn HostFs, project_path: impl Into<String>) -> Self {
        Self {
            host,
            project_path: project_path.into(),
        }
    }

    pub fn path_of(&self, name: &str) -> String {
        format!("{}/{}", self.project_path, name)
    }

    /// All releases, ascending by sequence number
    pub fn list(&self) -> SlipwayResult<Vec<Release>> {
        let mut releases: Vec<Release> = self
            .host
            .list_dir(&self.project_path)?
            .into_iter()
            .filter_map(|name| {
                parse_sequence(&name).map(|sequence| Release { sequence, name })
            })
            .collect();
        releases.sort_by_key(|r| r.sequence);
        Ok(releases)
    }

    /// The n-th most recent release name (1 = newest)
    pub fn latest(&self, n: usize) -> SlipwayResult<String> {
        let releases = self.list()?;
        if n == 0 || releases.len() < n {
            return Err(SlipwayError::NoReleasesFound);
        }
        Ok(releases[releases.len() - n].name.clone())
    }

    /// Next free sequence number: max + 1, starting at 1
    pub fn next_sequence(&self) -> SlipwayResult<u32> {
        let releases = self.list()?;
        Ok(releases.last().map(|r| r.sequence).unwrap_or(0) + 1)
    }

    /// Name of the release the live pointer aims at, if any
    pub fn current(&self) -> SlipwayResult<Option<String>> {
        let live = format!("{}/{}", self.project_path, LIVE_NAME);
        Ok(self.host.read_link(&live)?.map(|target| {
            // Tolerate absolute targets written by hand
            target.rsplit('/').next().unwrap_or(&target).to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostfs::MemHost;

    fn host_with(names: &[&str]) -> MemHost {
        let host = MemHost::new();
        host.add_dir("/app");
        for name in names {
            host.add_dir(&format!("/app/{name}"));
        }
        host
    }

    #[test]
    fn parse_sequence_accepts_padded_numbers() {
        assert_eq!(parse_sequence("src.00042"), Some(42));
        assert_eq!(parse_sequence("src.00001"), Some(1));
    }

    #[test]
    fn parse_sequence_rejects_non_releases() {
        assert_eq!(parse_sequence("src"), None);
        assert_eq!(parse_sequence("src."), None);
        assert_eq!(parse_sequence("src.abc"), None);
        assert_eq!(parse_sequence("deploy.log"), None);
    }

    #[test]
    fn release_name_zero_pads() {
        assert_eq!(release_name(7), "src.00007");
        assert_eq!(release_name(12345), "src.12345");
    }

    #[test]
    fn next_sequence_on_empty_host_is_one() {
        let host = host_with(&[]);
        let repo = ReleaseRepository::new(&host, "/app");
        assert_eq!(repo.next_sequence().unwrap(), 1);
    }

    #[test]
    fn next_sequence_skips_gaps() {
        let host = host_with(&["src.00001", "src.00003"]);
        let repo = ReleaseRepository::new(&host, "/app");
        assert_eq!(repo.next_sequence().unwrap(), 4);
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let host = host_with(&["src.00010", "src.00002"]);
        let repo = ReleaseRepository::new(&host, "/app");
        let releases = repo.list().unwrap();
        assert_eq!(releases[0].name, "src.00002");
        assert_eq!(releases[1].name, "src.00010");
        assert_eq!(repo.latest(1).unwrap(), "src.00010");
        assert_eq!(repo.latest(2).unwrap(), "src.00002");
    }

    #[test]
    fn latest_beyond_history_is_no_releases() {
        let host = host_with(&["src.00001"]);
        let repo = ReleaseRepository::new(&host, "/app");
        assert!(matches!(
            repo.latest(2),
            Err(SlipwayError::NoReleasesFound)
        ));
    }

    #[test]
    fn non_release_entries_are_ignored() {
        let host = host_with(&["src.00001", "backups"]);
        host.add_file("/app/deploy.log", "");
        let repo = ReleaseRepository::new(&host, "/app");
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn current_follows_the_live_pointer() {
        let host = host_with(&["src.00002"]);
        host.make_link("src.00002", "/app/src").unwrap();
        let repo = ReleaseRepository::new(&host, "/app");
        assert_eq!(repo.current().unwrap(), Some("src.00002".to_string()));
    }

    #[test]
    fn current_without_live_pointer_is_none() {
        let host = host_with(&["src.00002"]);
        let repo = ReleaseRepository::new(&host, "/app");
        assert_eq!(repo.current().unwrap(), None);
    }

    #[test]
    fn missing_project_path_is_a_transport_error() {
        let host = MemHost::new();
        let repo = ReleaseRepository::new(&host, "/nowhere");
        assert!(matches!(repo.list(), Err(SlipwayError::Transport { .. })));
    }
}
