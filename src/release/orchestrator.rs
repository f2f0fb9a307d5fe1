//! End-to-end release workflows
//!
//! Composes the lock, repository, change detector and deploy log into
//! the push / reload / cleanup workflows. Everything that runs after
//! the lock is acquired lives inside the guard's scope, so any error -
//! including an interrupt - unwinds through lock release and never
//! leaves a partial promotion visible.

use crate::config::{Role, Settings};
use crate::error::{SlipwayError, SlipwayResult};
use crate::exec::{Runner, ShellCommand};
use crate::hostfs::HostFs;
use crate::release::detect::{self, Decision};
use crate::release::lock;
use crate::release::log::{DeployLog, Entry};
use crate::release::repository::{parse_sequence, release_name, Release, ReleaseRepository};
use crate::scm::Scm;
use crate::transfer::Uploader;
use crate::ui::{self, Prompter};

/// Options for a push
#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Quick-and-dirty: skip install/migrate when nothing relevant changed
    pub qad: bool,
    /// Take over an existing deployment lock
    pub force: bool,
    /// Back up the database before migrating
    pub backupdb: bool,
}

/// What a successful push did
#[derive(Debug, Clone)]
pub struct PushReport {
    pub release: String,
    pub revision: String,
    pub installed: bool,
    pub migrated: bool,
}

/// Releases removed by a cleanup pass
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
}

/// The top-level release state machine
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    role: Role,
    host: &'a dyn HostFs,
    remote: &'a dyn Runner,
    scm: &'a dyn Scm,
    uploader: &'a dyn Uploader,
    prompter: &'a dyn Prompter,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        role: Role,
        host: &'a dyn HostFs,
        remote: &'a dyn Runner,
        scm: &'a dyn Scm,
        uploader: &'a dyn Uploader,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            settings,
            role,
            host,
            remote,
            scm,
            uploader,
            prompter,
        }
    }

    /// Deploy `reference` as a new numbered release and promote it.
    pub fn push(&self, reference: &str, opts: PushOptions) -> SlipwayResult<PushReport> {
        let project_path = self.settings.role(self.role, "project_path")?;
        let manifest = self.settings.get("manifest")?;
        let revision = self.scm.rev_parse(reference)?;

        let repo = ReleaseRepository::new(self.host, project_path.as_str());
        let existing = repo.list()?;
        let candidate = release_name(repo.next_sequence()?);

        let guard = lock::acquire(self.host, &project_path, &candidate, opts.force)?;

        // Everything below unwinds through the guard on error.
        let current = repo.current()?;
        let candidate_path = repo.path_of(&candidate);

        ui::info(&format!("Uploading {revision} into {candidate}"));
        self.upload(&revision, &repo, &existing, current.as_deref(), &candidate_path)?;

        self.confirm_fast_forward(&project_path, &revision)?;

        let previous_path = current.as_deref().map(|name| repo.path_of(name));
        let decision = detect::decide(
            self.host,
            &manifest,
            &candidate_path,
            previous_path.as_deref(),
            opts.qad,
        )?;

        self.run_steps(&candidate_path, &manifest, decision, opts.backupdb)?;

        let entry = Entry {
            timestamp: self.host.timestamp()?,
            operator: operator(),
            release_dir: candidate.clone(),
            revision: revision.clone(),
        };
        DeployLog::new(self.host, &project_path).append(&entry)?;

        guard.commit()?;
        ui::info(&format!("{candidate} is now live"));

        self.restart()?;
        self.cleanup(self.history_size()?, false)?;

        Ok(PushReport {
            release: candidate,
            revision,
            installed: decision.install,
            migrated: decision.migrate,
        })
    }

    /// Re-run install/migrate/assets against the newest release and
    /// re-promote it. Idempotent: no deploy-log entry is written and an
    /// already-live release stays live.
    pub fn reload_last_push(&self) -> SlipwayResult<()> {
        let project_path = self.settings.role(self.role, "project_path")?;
        let manifest = self.settings.get("manifest")?;

        let repo = ReleaseRepository::new(self.host, project_path.as_str());
        let newest = repo.latest(1)?;
        let release_path = repo.path_of(&newest);

        let guard = lock::acquire(self.host, &project_path, &newest, false)?;
        self.run_steps(&release_path, &manifest, Decision::EVERYTHING, false)?;
        guard.commit()?;

        self.restart()
    }

    /// Prune release directories, keeping the live one plus the `size`
    /// newest below it. `superclean` also removes directories newer
    /// than live - leftovers of failed deploys.
    pub fn cleanup(&self, size: usize, superclean: bool) -> SlipwayResult<CleanupReport> {
        let project_path = self.settings.role(self.role, "project_path")?;
        let repo = ReleaseRepository::new(self.host, project_path.as_str());

        let current = repo.current()?.ok_or(SlipwayError::NoReleasesFound)?;
        let live_sequence = parse_sequence(&current).ok_or_else(|| SlipwayError::Transport {
            command: format!("readlink {project_path}/src"),
            detail: format!("live pointer names a non-release: {current:?}"),
        })?;

        let releases = repo.list()?;
        let older: Vec<&Release> = releases
            .iter()
            .filter(|r| r.sequence < live_sequence)
            .collect();

        let mut report = CleanupReport::default();
        let cut = older.len().saturating_sub(size);
        for release in &older[..cut] {
            self.host.remove_dir(&repo.path_of(&release.name))?;
            report.removed.push(release.name.clone());
        }
        if superclean {
            for release in releases.iter().filter(|r| r.sequence > live_sequence) {
                self.host.remove_dir(&repo.path_of(&release.name))?;
                report.removed.push(release.name.clone());
            }
        }
        Ok(report)
    }

    /// Retention count from settings
    pub fn history_size(&self) -> SlipwayResult<usize> {
        let raw = self.settings.get("history_size")?;
        raw.trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| SlipwayError::ConfigFile {
                path: "history_size".to_string(),
                message: format!("must be a positive integer, got {raw:?}"),
            })
    }

    fn upload(
        &self,
        revision: &str,
        repo: &ReleaseRepository,
        existing: &[Release],
        current: Option<&str>,
        candidate_path: &str,
    ) -> SlipwayResult<()> {
        let staging = tempfile::tempdir()?;
        self.scm.archive_into(revision, staging.path())?;

        let link_dests: Vec<String> = existing
            .iter()
            .map(|r| repo.path_of(&r.name))
            .collect();
        self.uploader.upload(
            staging.path(),
            candidate_path,
            &link_dests,
            &[".env".to_string()],
        )?;

        // Carry the private environment file forward from the live release.
        if let Some(live) = current {
            let live_env = format!("{}/.env", repo.path_of(live));
            if self.host.exists(&live_env)? {
                self.host
                    .link_copy(&live_env, &format!("{candidate_path}/.env"))?;
            }
        }
        self.host.chmod("go+rx", candidate_path)
    }

    fn confirm_fast_forward(&self, project_path: &str, revision: &str) -> SlipwayResult<()> {
        let log = DeployLog::new(self.host, project_path);
        let previous = match log.last() {
            Ok(entry) => entry,
            Err(SlipwayError::EmptyLog) => return Ok(()),
            Err(other) => return Err(other),
        };
        if self.scm.is_ancestor(&previous.revision, revision)? {
            return Ok(());
        }
        ui::warning(&format!(
            "{} deployed {} ({}), and your revision {} does not descend from it",
            previous.operator, previous.release_dir, previous.revision, revision
        ));
        if self
            .prompter
            .confirm("Deploy a non-fast-forward revision anyway?")?
        {
            Ok(())
        } else {
            Err(SlipwayError::Aborted)
        }
    }

    fn run_steps(
        &self,
        release_path: &str,
        manifest: &str,
        decision: Decision,
        backupdb: bool,
    ) -> SlipwayResult<()> {
        let venv = self.settings.role(self.role, "virtualenv_path")?;

        // Install before migrate before asset collection: migrations may
        // depend on freshly installed packages.
        if decision.install {
            ui::info("Installing dependencies");
            self.remote.run(
                &ShellCommand::new(format!("{venv}/bin/pip"))
                    .arg("install")
                    .arg("-r")
                    .arg(manifest)
                    .current_dir(release_path),
            )?;
        }
        if decision.migrate {
            if backupdb {
                ui::info("Backing up the database");
                self.remote.run(&manage(&venv, release_path, "backupdb"))?;
            }
            ui::info("Running migrations");
            self.remote.run(&manage(&venv, release_path, "migrate"))?;
        }

        ui::info("Collecting static assets");
        self.remote
            .run(&manage(&venv, release_path, "collectstatic").arg("--noinput"))?;
        self.remote.run(
            &ShellCommand::new(format!("{venv}/bin/python"))
                .arg("-m")
                .arg("compileall")
                .arg("-q")
                .arg(".")
                .current_dir(release_path),
        )?;
        Ok(())
    }

    fn restart(&self) -> SlipwayResult<()> {
        let restart_cmd = self.settings.role(self.role, "restart_cmd")?;
        self.remote
            .run(&ShellCommand::new("sh").arg("-c").arg(restart_cmd))?;
        Ok(())
    }
}

fn manage(venv: &str, release_path: &str, subcommand: &str) -> ShellCommand {
    ShellCommand::new(format!("{venv}/bin/python"))
        .arg("manage.py")
        .arg(subcommand)
        .current_dir(release_path)
}

fn operator() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
