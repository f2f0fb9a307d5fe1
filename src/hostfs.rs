//! Remote filesystem port
//!
//! The narrow set of host primitives the release machinery needs. Each
//! `SshFs` method maps to exactly one remote command; `MemHost` is the
//! in-memory double used by tests.

use crate::error::{SlipwayError, SlipwayResult};
use crate::exec::{shell_quote, Runner, ShellCommand};

/// Host filesystem operations, one remote command each
pub trait HostFs {
    /// Names of the entries directly under `dir`
    fn list_dir(&self, dir: &str) -> SlipwayResult<Vec<String>>;

    /// Target of a symlink, `None` when the link does not exist
    fn read_link(&self, path: &str) -> SlipwayResult<Option<String>>;

    /// Create a symlink; `false` when something already sits at `link`
    fn make_link(&self, target: &str, link: &str) -> SlipwayResult<bool>;

    /// Atomic rename, replacing the destination (`mv -T`)
    fn rename(&self, from: &str, to: &str) -> SlipwayResult<()>;

    /// Remove a file or symlink
    fn remove(&self, path: &str) -> SlipwayResult<()>;

    /// Remove a directory tree
    fn remove_dir(&self, path: &str) -> SlipwayResult<()>;

    fn exists(&self, path: &str) -> SlipwayResult<bool>;

    /// Modification time of the entry itself (symlinks not followed)
    fn mtime(&self, path: &str) -> SlipwayResult<i64>;

    /// Current unix time on the host
    fn now(&self) -> SlipwayResult<i64>;

    /// Host wall-clock timestamp in UTC, for the deploy log
    fn timestamp(&self) -> SlipwayResult<String>;

    /// Append one line to a file; the write is flushed when the command
    /// returns
    fn append_line(&self, file: &str, line: &str) -> SlipwayResult<()>;

    /// Last `n` lines of a file; empty when the file does not exist
    fn tail(&self, file: &str, n: usize) -> SlipwayResult<Vec<String>>;

    /// Byte-for-byte comparison; a missing side counts as different
    fn files_identical(&self, a: &str, b: &str) -> SlipwayResult<bool>;

    /// Number of files matching `pattern` relative to `dir`
    fn count_glob(&self, dir: &str, pattern: &str) -> SlipwayResult<usize>;

    /// Hard-link copy of a single file (`cp -l`)
    fn link_copy(&self, from: &str, to: &str) -> SlipwayResult<()>;

    fn chmod(&self, mode: &str, path: &str) -> SlipwayResult<()>;
}

/// `HostFs` over an ssh runner
pub struct SshFs<'a> {
    runner: &'a dyn Runner,
}

impl<'a> SshFs<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }
}

impl HostFs for SshFs<'_> {
    fn list_dir(&self, dir: &str) -> SlipwayResult<Vec<String>> {
        let out = self.runner.run(&ShellCommand::new("ls").arg("-1").arg(dir))?;
        Ok(out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn read_link(&self, path: &str) -> SlipwayResult<Option<String>> {
        let out = self.runner.probe(&ShellCommand::new("readlink").arg(path))?;
        if out.success() {
            Ok(Some(out.line()))
        } else {
            Ok(None)
        }
    }

    fn make_link(&self, target: &str, link: &str) -> SlipwayResult<bool> {
        let out = self
            .runner
            .probe(&ShellCommand::new("ln").arg("-s").arg(target).arg(link))?;
        Ok(out.success())
    }

    fn rename(&self, from: &str, to: &str) -> SlipwayResult<()> {
        self.runner
            .run(&ShellCommand::new("mv").arg("-T").arg(from).arg(to))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> SlipwayResult<()> {
        self.runner.run(&ShellCommand::new("rm").arg("-f").arg(path))?;
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> SlipwayResult<()> {
        self.runner
            .run(&ShellCommand::new("rm").arg("-rf").arg(path))?;
        Ok(())
    }

    fn exists(&self, path: &str) -> SlipwayResult<bool> {
        let out = self.runner.probe(&ShellCommand::new("test").arg("-e").arg(path))?;
        Ok(out.success())
    }

    fn mtime(&self, path: &str) -> SlipwayResult<i64> {
        let out = self
            .runner
            .run(&ShellCommand::new("stat").arg("-c").arg("%Y").arg(path))?;
        out.line().parse().map_err(|_| SlipwayError::Transport {
            command: format!("stat -c %Y {path}"),
            detail: format!("unexpected stat output: {:?}", out.line()),
        })
    }

    fn now(&self) -> SlipwayResult<i64> {
        let out = self.runner.run(&ShellCommand::new("date").arg("+%s"))?;
        out.line().parse().map_err(|_| SlipwayError::Transport {
            command: "date +%s".to_string(),
            detail: format!("unexpected date output: {:?}", out.line()),
        })
    }

    fn timestamp(&self) -> SlipwayResult<String> {
        let out = self
            .runner
            .run(&ShellCommand::new("date").arg("-u").arg("+%Y-%m-%d %H:%M:%S"))?;
        Ok(out.line())
    }

    fn append_line(&self, file: &str, line: &str) -> SlipwayResult<()> {
        // Redirection needs a shell; line and file are quoted into the
        // sh -c payload, which itself travels as a single argument.
        let script = format!(
            "printf '%s\\n' {} >> {}",
            shell_quote(line),
            shell_quote(file)
        );
        self.runner
            .run(&ShellCommand::new("sh").arg("-c").arg(script))?;
        Ok(())
    }

    fn tail(&self, file: &str, n: usize) -> SlipwayResult<Vec<String>> {
        let out = self
            .runner
            .probe(&ShellCommand::new("tail").arg("-n").arg(n.to_string()).arg(file))?;
        if !out.success() {
            return Ok(Vec::new());
        }
        Ok(out
            .stdout
            .lines()
            .map(|l| l.to_string())
            .filter(|l| !l.trim().is_empty())
            .collect())
    }

    fn files_identical(&self, a: &str, b: &str) -> SlipwayResult<bool> {
        let out = self
            .runner
            .probe(&ShellCommand::new("cmp").arg("-s").arg(a).arg(b))?;
        Ok(out.success())
    }

    fn count_glob(&self, dir: &str, pattern: &str) -> SlipwayResult<usize> {
        // The glob must expand on the host, so this one goes through a
        // shell; `dir` is quoted, the pattern is a fixed literal.
        let script = format!(
            "ls {}/{} 2>/dev/null | wc -l",
            shell_quote(dir),
            pattern
        );
        let out = self
            .runner
            .run(&ShellCommand::new("sh").arg("-c").arg(script))?;
        out.line().parse().map_err(|_| SlipwayError::Transport {
            command: format!("count {pattern} under {dir}"),
            detail: format!("unexpected wc output: {:?}", out.line()),
        })
    }

    fn link_copy(&self, from: &str, to: &str) -> SlipwayResult<()> {
        self.runner
            .run(&ShellCommand::new("cp").arg("-l").arg(from).arg(to))?;
        Ok(())
    }

    fn chmod(&self, mode: &str, path: &str) -> SlipwayResult<()> {
        self.runner
            .run(&ShellCommand::new("chmod").arg(mode).arg(path))?;
        Ok(())
    }
}

/// In-memory host for tests
///
/// Uses `Arc<Mutex<..>>` internally so it can be cloned into recording
/// doubles and still observed afterwards.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemHost {
    state: std::sync::Arc<std::sync::Mutex<MemState>>,
}

#[cfg(test)]
#[derive(Default)]
struct MemState {
    dirs: std::collections::BTreeSet<String>,
    files: std::collections::BTreeMap<String, String>,
    links: std::collections::BTreeMap<String, String>,
    mtimes: std::collections::BTreeMap<String, i64>,
    clock: i64,
}

#[cfg(test)]
impl MemHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn add_file(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn set_clock(&self, at: i64) {
        self.state.lock().unwrap().clock = at;
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn link(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().links.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    pub fn dirs(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.iter().cloned().collect()
    }

    fn entry_exists(state: &MemState, path: &str) -> bool {
        state.dirs.contains(path)
            || state.files.contains_key(path)
            || state.links.contains_key(path)
    }
}

/// Match one path segment against a `*`-wildcard pattern segment
#[cfg(test)]
fn segment_matches(pattern: &str, segment: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == segment;
    }
    let mut rest = segment;
    if !rest.starts_with(parts[0]) {
        return false;
    }
    rest = &rest[parts[0].len()..];
    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
fn glob_matches(pattern: &str, relative: &str) -> bool {
    let pat: Vec<&str> = pattern.split('/').collect();
    let segs: Vec<&str> = relative.split('/').collect();
    pat.len() == segs.len()
        && pat
            .iter()
            .zip(segs.iter())
            .all(|(p, s)| segment_matches(p, s))
}

#[cfg(test)]
impl HostFs for MemHost {
    fn list_dir(&self, dir: &str) -> SlipwayResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.dirs.contains(dir) {
            return Err(SlipwayError::Transport {
                command: format!("ls -1 {dir}"),
                detail: "No such file or directory".to_string(),
            });
        }
        let prefix = format!("{dir}/");
        let mut names = std::collections::BTreeSet::new();
        for key in state
            .dirs
            .iter()
            .chain(state.files.keys())
            .chain(state.links.keys())
        {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.is_empty() {
                    names.insert(rest.split('/').next().unwrap().to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn read_link(&self, path: &str) -> SlipwayResult<Option<String>> {
        Ok(self.state.lock().unwrap().links.get(path).cloned())
    }

    fn make_link(&self, target: &str, link: &str) -> SlipwayResult<bool> {
        let mut state = self.state.lock().unwrap();
        if Self::entry_exists(&state, link) {
            return Ok(false);
        }
        let clock = state.clock;
        state.links.insert(link.to_string(), target.to_string());
        state.mtimes.insert(link.to_string(), clock);
        Ok(true)
    }

    fn rename(&self, from: &str, to: &str) -> SlipwayResult<()> {
        let mut state = self.state.lock().unwrap();
        let target = state
            .links
            .remove(from)
            .ok_or_else(|| SlipwayError::Transport {
                command: format!("mv -T {from} {to}"),
                detail: "No such file or directory".to_string(),
            })?;
        state.mtimes.remove(from);
        state.links.insert(to.to_string(), target);
        Ok(())
    }

    fn remove(&self, path: &str) -> SlipwayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.links.remove(path);
        state.files.remove(path);
        state.mtimes.remove(path);
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> SlipwayResult<()> {
        let mut state = self.state.lock().unwrap();
        let prefix = format!("{path}/");
        state.dirs.retain(|d| d != path && !d.starts_with(&prefix));
        state.files.retain(|f, _| !f.starts_with(&prefix));
        state.links.retain(|l, _| l != path && !l.starts_with(&prefix));
        Ok(())
    }

    fn exists(&self, path: &str) -> SlipwayResult<bool> {
        Ok(Self::entry_exists(&self.state.lock().unwrap(), path))
    }

    fn mtime(&self, path: &str) -> SlipwayResult<i64> {
        self.state
            .lock()
            .unwrap()
            .mtimes
            .get(path)
            .copied()
            .ok_or_else(|| SlipwayError::Transport {
                command: format!("stat -c %Y {path}"),
                detail: "No such file or directory".to_string(),
            })
    }

    fn now(&self) -> SlipwayResult<i64> {
        Ok(self.state.lock().unwrap().clock)
    }

    fn timestamp(&self) -> SlipwayResult<String> {
        Ok(format!("@{}", self.state.lock().unwrap().clock))
    }

    fn append_line(&self, file: &str, line: &str) -> SlipwayResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.files.entry(file.to_string()).or_default();
        entry.push_str(line);
        entry.push('\n');
        Ok(())
    }

    fn tail(&self, file: &str, n: usize) -> SlipwayResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let Some(content) = state.files.get(file) else {
            return Ok(Vec::new());
        };
        let lines: Vec<String> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    fn files_identical(&self, a: &str, b: &str) -> SlipwayResult<bool> {
        let state = self.state.lock().unwrap();
        match (state.files.get(a), state.files.get(b)) {
            (Some(x), Some(y)) => Ok(x == y),
            _ => Ok(false),
        }
    }

    fn count_glob(&self, dir: &str, pattern: &str) -> SlipwayResult<usize> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{dir}/");
        Ok(state
            .files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rel| glob_matches(pattern, rel))
            .count())
    }

    fn link_copy(&self, from: &str, to: &str) -> SlipwayResult<()> {
        let mut state = self.state.lock().unwrap();
        let content = state
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| SlipwayError::Transport {
                command: format!("cp -l {from} {to}"),
                detail: "No such file or directory".to_string(),
            })?;
        state.files.insert(to.to_string(), content);
        Ok(())
    }

    fn chmod(&self, _mode: &str, _path: &str) -> SlipwayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedRunner;

    #[test]
    fn ssh_fs_builds_one_command_per_operation() {
        let runner = ScriptedRunner::ok();
        let fs = SshFs::new(&runner);
        fs.make_link("src.00042", "/var/www/app/deployment.lock")
            .unwrap();
        fs.rename("/var/www/app/deployment.lock", "/var/www/app/src")
            .unwrap();
        fs.chmod("go+rx", "/var/www/app/src.00042").unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "ln -s src.00042 /var/www/app/deployment.lock");
        assert_eq!(calls[1], "mv -T /var/www/app/deployment.lock /var/www/app/src");
        assert_eq!(calls[2], "chmod go+rx /var/www/app/src.00042");
    }

    #[test]
    fn ssh_fs_append_line_quotes_payload() {
        let runner = ScriptedRunner::ok();
        let fs = SshFs::new(&runner);
        fs.append_line("/var/www/app/deploy.log", "a\tb c").unwrap();
        let calls = runner.calls();
        assert!(calls[0].contains("printf"));
        assert!(calls[0].contains(">>"));
    }

    #[test]
    fn mem_host_list_dir_missing_is_transport_error() {
        let host = MemHost::new();
        assert!(matches!(
            host.list_dir("/nowhere"),
            Err(SlipwayError::Transport { .. })
        ));
    }

    #[test]
    fn mem_host_list_dir_direct_children_only() {
        let host = MemHost::new();
        host.add_dir("/app");
        host.add_dir("/app/src.00001");
        host.add_file("/app/src.00001/requirements.txt", "x");
        host.add_file("/app/deploy.log", "");

        let mut listing = host.list_dir("/app").unwrap();
        listing.sort();
        assert_eq!(listing, vec!["deploy.log", "src.00001"]);
    }

    #[test]
    fn mem_host_link_lifecycle() {
        let host = MemHost::new();
        assert!(host.make_link("src.00001", "/app/lock").unwrap());
        assert!(!host.make_link("src.00002", "/app/lock").unwrap());
        host.rename("/app/lock", "/app/src").unwrap();
        assert_eq!(host.read_link("/app/src").unwrap().unwrap(), "src.00001");
        assert!(host.read_link("/app/lock").unwrap().is_none());
    }

    #[test]
    fn mem_host_glob_counts_migrations() {
        let host = MemHost::new();
        host.add_dir("/app/src.00002");
        host.add_file("/app/src.00002/shop/migrations/0001_initial.py", "");
        host.add_file("/app/src.00002/shop/migrations/0002_add_field.py", "");
        host.add_file("/app/src.00002/shop/models.py", "");
        host.add_file("/app/src.00002/blog/migrations/0001_initial.py", "");

        assert_eq!(
            host.count_glob("/app/src.00002", "*/migrations/*.py").unwrap(),
            3
        );
    }

    #[test]
    fn mem_host_tail_returns_last_lines() {
        let host = MemHost::new();
        host.append_line("/app/deploy.log", "one").unwrap();
        host.append_line("/app/deploy.log", "two").unwrap();
        host.append_line("/app/deploy.log", "three").unwrap();
        assert_eq!(host.tail("/app/deploy.log", 2).unwrap(), vec!["two", "three"]);
        assert!(host.tail("/app/missing.log", 2).unwrap().is_empty());
    }

    #[test]
    fn glob_segment_matching() {
        assert!(glob_matches("*/migrations/*.py", "shop/migrations/0001_initial.py"));
        assert!(!glob_matches("*/migrations/*.py", "shop/migrations/deep/0001.py"));
        assert!(!glob_matches("*/migrations/*.py", "shop/fixtures/0001_initial.py"));
    }
}
