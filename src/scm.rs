//! Source control collaborator
//!
//! Local git operations behind a seam: resolving refs, exporting a tree
//! for upload, and the fast-forward ancestry check.

use std::path::Path;

use crate::error::SlipwayResult;
use crate::exec::{Runner, ShellCommand};

/// Source control operations the release workflows consume
pub trait Scm {
    /// Resolve a ref name to a full revision id
    fn rev_parse(&self, name: &str) -> SlipwayResult<String>;

    /// Name of the currently checked-out branch
    fn current_branch(&self) -> SlipwayResult<String>;

    /// Update all remote-tracking refs
    fn fetch_all(&self) -> SlipwayResult<()>;

    /// Export the tree at `revision` into `dest`
    fn archive_into(&self, revision: &str, dest: &Path) -> SlipwayResult<()>;

    /// Whether `old` is an ancestor of `new` (fast-forward relationship)
    fn is_ancestor(&self, old: &str, new: &str) -> SlipwayResult<bool>;
}

/// `Scm` over the local git binary
pub struct GitScm<'a> {
    runner: &'a dyn Runner,
}

impl<'a> GitScm<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }
}

impl Scm for GitScm<'_> {
    fn rev_parse(&self, name: &str) -> SlipwayResult<String> {
        let out = self
            .runner
            .run(&ShellCommand::new("git").arg("rev-parse").arg(name))?;
        Ok(out.line())
    }

    fn current_branch(&self) -> SlipwayResult<String> {
        let out = self.runner.run(
            &ShellCommand::new("git")
                .arg("rev-parse")
                .arg("--abbrev-ref")
                .arg("HEAD"),
        )?;
        Ok(out.line())
    }

    fn fetch_all(&self) -> SlipwayResult<()> {
        self.runner
            .run(&ShellCommand::new("git").arg("fetch").arg("--all"))?;
        Ok(())
    }

    fn archive_into(&self, revision: &str, dest: &Path) -> SlipwayResult<()> {
        // Archive to a temp tarball, then unpack into the staging
        // directory. Two plain commands instead of a shell pipe.
        let tarball = tempfile::Builder::new()
            .prefix("slipway-archive")
            .suffix(".tar")
            .tempfile()?;
        let tar_path = tarball.path().to_string_lossy().into_owned();
        self.runner.run(
            &ShellCommand::new("git")
                .arg("archive")
                .arg("--format=tar")
                .arg("-o")
                .arg(&tar_path)
                .arg(revision),
        )?;
        self.runner.run(
            &ShellCommand::new("tar")
                .arg("-xf")
                .arg(&tar_path)
                .arg("-C")
                .arg(dest.to_string_lossy().into_owned()),
        )?;
        Ok(())
    }

    fn is_ancestor(&self, old: &str, new: &str) -> SlipwayResult<bool> {
        let out = self.runner.probe(
            &ShellCommand::new("git")
                .arg("merge-base")
                .arg("--is-ancestor")
                .arg(old)
                .arg(new),
        )?;
        Ok(out.success())
    }
}

/// Scripted source control for tests: a fixed tree, a fixed revision,
/// and a configurable ancestry answer.
#[cfg(test)]
pub struct FakeScm {
    pub revision: String,
    pub ancestor: bool,
    pub tree: Vec<(String, String)>,
}

#[cfg(test)]
impl FakeScm {
    pub fn new(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            ancestor: true,
            tree: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.tree.push((path.to_string(), content.to_string()));
        self
    }
}

#[cfg(test)]
impl Scm for FakeScm {
    fn rev_parse(&self, _name: &str) -> SlipwayResult<String> {
        Ok(self.revision.clone())
    }

    fn current_branch(&self) -> SlipwayResult<String> {
        Ok("main".to_string())
    }

    fn fetch_all(&self) -> SlipwayResult<()> {
        Ok(())
    }

    fn archive_into(&self, _revision: &str, dest: &Path) -> SlipwayResult<()> {
        for (path, content) in &self.tree {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(())
    }

    fn is_ancestor(&self, _old: &str, _new: &str) -> SlipwayResult<bool> {
        Ok(self.ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedRunner;

    #[test]
    fn rev_parse_builds_expected_command() {
        let runner = ScriptedRunner::ok();
        let scm = GitScm::new(&runner);
        scm.rev_parse("origin/live").unwrap();
        assert_eq!(runner.calls(), vec!["git rev-parse origin/live"]);
    }

    #[test]
    fn is_ancestor_uses_merge_base_probe() {
        let runner = ScriptedRunner::ok();
        let scm = GitScm::new(&runner);
        assert!(scm.is_ancestor("abc", "def").unwrap());
        assert_eq!(runner.calls(), vec!["git merge-base --is-ancestor abc def"]);
    }

    #[test]
    fn fake_scm_materializes_tree() {
        let scm = FakeScm::new("deadbeef")
            .with_file("requirements.txt", "flask==2.0\n")
            .with_file("shop/migrations/0001_initial.py", "");
        let dir = tempfile::tempdir().unwrap();
        scm.archive_into("deadbeef", dir.path()).unwrap();
        assert!(dir.path().join("requirements.txt").exists());
        assert!(dir.path().join("shop/migrations/0001_initial.py").exists());
    }
}
