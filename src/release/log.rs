//! Append-only deploy log
//!
//! One tab-separated line per successful deploy:
//! `date <TAB> operator <TAB> release_dir <TAB> revision`.
//! The last entry defines what is currently deployed for the
//! fast-forward check; history is never rewritten.

use crate::error::{SlipwayError, SlipwayResult};
use crate::hostfs::HostFs;

/// Name of the log file under the project path
pub const LOG_NAME: &str = "deploy.log";

/// One recorded deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: String,
    pub operator: String,
    pub release_dir: String,
    pub revision: String,
}

impl Entry {
    /// Serialize as one log line. Tabs inside fields would corrupt the
    /// format, so they are flattened to spaces.
    pub fn to_line(&self) -> String {
        let clean = |s: &str| s.replace(['\t', '\n'], " ");
        format!(
            "{}\t{}\t{}\t{}",
            clean(&self.timestamp),
            clean(&self.operator),
            clean(&self.release_dir),
            clean(&self.revision)
        )
    }

    pub fn parse(line: &str) -> SlipwayResult<Entry> {
        let mut fields = line.split('\t');
        let entry = Entry {
            timestamp: fields.next().unwrap_or("").to_string(),
            operator: fields
                .next()
                .ok_or_else(|| SlipwayError::LogFormat { line: line.into() })?
                .to_string(),
            release_dir: fields
                .next()
                .ok_or_else(|| SlipwayError::LogFormat { line: line.into() })?
                .to_string(),
            revision: fields
                .next()
                .ok_or_else(|| SlipwayError::LogFormat { line: line.into() })?
                .to_string(),
        };
        Ok(entry)
    }
}

/// The remote deploy log
pub struct DeployLog<'a> {
    host: &'a dyn HostFs,
    path: String,
}

impl<'a> DeployLog<'a> {
    pub fn new(host: &'a dyn HostFs, project_path: &str) -> Self {
        Self {
            host,
            path: format!("{project_path}/{LOG_NAME}"),
        }
    }

    /// Append one entry; the write has hit the file when this returns.
    pub fn append(&self, entry: &Entry) -> SlipwayResult<()> {
        self.host.append_line(&self.path, &entry.to_line())
    }

    /// The most recent entry
    pub fn last(&self) -> SlipwayResult<Entry> {
        let lines = self.host.tail(&self.path, 1)?;
        match lines.last() {
            Some(line) => Entry::parse(line),
            None => Err(SlipwayError::EmptyLog),
        }
    }

    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> SlipwayResult<Vec<Entry>> {
        self.host
            .tail(&self.path, n)?
            .iter()
            .map(|line| Entry::parse(line))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostfs::MemHost;

    fn entry(release: &str, revision: &str) -> Entry {
        Entry {
            timestamp: "2026-08-07 12:00:00".to_string(),
            operator: "mctest".to_string(),
            release_dir: release.to_string(),
            revision: revision.to_string(),
        }
    }

    #[test]
    fn entry_round_trips_through_a_line() {
        let original = entry("src.00042", "deadbeef");
        let parsed = Entry::parse(&original.to_line()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn tabs_in_fields_are_flattened() {
        let mut e = entry("src.00042", "deadbeef");
        e.operator = "evil\toperator".to_string();
        let parsed = Entry::parse(&e.to_line()).unwrap();
        assert_eq!(parsed.operator, "evil operator");
        assert_eq!(parsed.revision, "deadbeef");
    }

    #[test]
    fn parse_rejects_short_lines() {
        assert!(matches!(
            Entry::parse("only\ttwo"),
            Err(SlipwayError::LogFormat { .. })
        ));
    }

    #[test]
    fn last_of_missing_log_is_empty_log() {
        let host = MemHost::new();
        let log = DeployLog::new(&host, "/app");
        assert!(matches!(log.last(), Err(SlipwayError::EmptyLog)));
    }

    #[test]
    fn last_returns_newest_entry() {
        let host = MemHost::new();
        let log = DeployLog::new(&host, "/app");
        log.append(&entry("src.00001", "aaa")).unwrap();
        log.append(&entry("src.00002", "bbb")).unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.release_dir, "src.00002");
        assert_eq!(last.revision, "bbb");
    }

    #[test]
    fn recent_keeps_append_order() {
        let host = MemHost::new();
        let log = DeployLog::new(&host, "/app");
        for (dir, rev) in [("src.00001", "a"), ("src.00002", "b"), ("src.00003", "c")] {
            log.append(&entry(dir, rev)).unwrap();
        }
        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].release_dir, "src.00002");
        assert_eq!(recent[1].release_dir, "src.00003");
    }
}
