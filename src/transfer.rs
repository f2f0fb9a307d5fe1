//! Directory sync collaborator
//!
//! Uploads a staged tree into a release directory with rsync,
//! hard-linking unchanged files against every existing release so an
//! unchanged file costs no additional storage.

use std::path::Path;

use crate::error::SlipwayResult;
use crate::exec::{Runner, ShellCommand};

/// Upload seam
pub trait Uploader {
    /// Sync `local_dir` to `remote_dir` on the target host, hard-linking
    /// unchanged files against `link_dests` and skipping `excludes`.
    fn upload(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        link_dests: &[String],
        excludes: &[String],
    ) -> SlipwayResult<()>;
}

/// rsync-backed uploader
pub struct RsyncUploader<'a> {
    destination: String,
    runner: &'a dyn Runner,
}

impl<'a> RsyncUploader<'a> {
    pub fn new(destination: impl Into<String>, runner: &'a dyn Runner) -> Self {
        Self {
            destination: destination.into(),
            runner,
        }
    }
}

impl Uploader for RsyncUploader<'_> {
    fn upload(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        link_dests: &[String],
        excludes: &[String],
    ) -> SlipwayResult<()> {
        // -a: archive mode; --delete keeps the candidate an exact copy
        // of the staged tree. Trailing slash = copy contents.
        let mut cmd = ShellCommand::new("rsync").arg("-a").arg("--delete");
        for dest in link_dests {
            cmd = cmd.arg(format!("--link-dest={dest}"));
        }
        for pattern in excludes {
            cmd = cmd.arg(format!("--exclude={pattern}"));
        }
        cmd = cmd
            .arg(format!("{}/", local_dir.display()))
            .arg(format!("{}:{}", self.destination, remote_dir));
        self.runner.run(&cmd)?;
        Ok(())
    }
}

/// Test double: materializes the staged tree into a `MemHost` and
/// records what it was asked to do.
#[cfg(test)]
pub struct RecordingUploader {
    pub host: crate::hostfs::MemHost,
    pub calls: std::sync::Mutex<Vec<(String, usize)>>,
}

#[cfg(test)]
impl RecordingUploader {
    pub fn new(host: crate::hostfs::MemHost) -> Self {
        Self {
            host,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn copy_tree(&self, local: &Path, base: &Path, remote_dir: &str) -> SlipwayResult<()> {
        for entry in std::fs::read_dir(local)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.copy_tree(&path, base, remote_dir)?;
            } else {
                let rel = path.strip_prefix(base).expect("staged file outside staging dir");
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                self.host.add_file(
                    &format!("{remote_dir}/{}", rel.display().to_string().replace('\\', "/")),
                    &content,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl Uploader for RecordingUploader {
    fn upload(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        link_dests: &[String],
        _excludes: &[String],
    ) -> SlipwayResult<()> {
        self.host.add_dir(remote_dir);
        self.copy_tree(local_dir, local_dir, remote_dir)?;
        self.calls
            .lock()
            .unwrap()
            .push((remote_dir.to_string(), link_dests.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedRunner;

    #[test]
    fn rsync_arguments_in_order() {
        let runner = ScriptedRunner::ok();
        let uploader = RsyncUploader::new("web1", &runner);
        let staging = tempfile::tempdir().unwrap();
        uploader
            .upload(
                staging.path(),
                "/var/www/app.com/src.00042",
                &["/var/www/app.com/src.00041".to_string()],
                &[".env".to_string()],
            )
            .unwrap();

        let call = &runner.calls()[0];
        assert!(call.starts_with("rsync -a --delete"));
        assert!(call.contains("--link-dest=/var/www/app.com/src.00041"));
        assert!(call.contains("--exclude=.env"));
        assert!(call.ends_with("web1:/var/www/app.com/src.00042"));
    }

    #[test]
    fn rsync_source_has_trailing_slash() {
        let runner = ScriptedRunner::ok();
        let uploader = RsyncUploader::new("web1", &runner);
        let staging = tempfile::tempdir().unwrap();
        uploader
            .upload(staging.path(), "/var/www/app.com/src.00001", &[], &[])
            .unwrap();
        let call = &runner.calls()[0];
        assert!(call.contains(&format!("{}/", staging.path().display())));
    }
}
