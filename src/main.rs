//! Slipway CLI - zero-downtime releases over ssh
//!
//! Usage: slipway <COMMAND>
//!
//! Commands:
//!   stage             Deploy the current branch to the dev host
//!   deploy            Deploy the live branch to the live host
//!   cleanup           Prune old release directories
//!   reload-last-push  Re-run install/migrate against the newest release
//!   history           Show recent deploy log entries

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use slipway::config::{ProjectFile, Role, Settings};
use slipway::error::SlipwayError;
use slipway::exec::{self, CancelFlag, LocalRunner, SshRunner};
use slipway::hostfs::SshFs;
use slipway::release::{DeployLog, Orchestrator, PushOptions};
use slipway::scm::{GitScm, Scm};
use slipway::transfer::RsyncUploader;
use slipway::ui::{self, TerminalPrompter};

/// Slipway - zero-downtime release tool
#[derive(Parser, Debug)]
#[command(name = "slipway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the project configuration file
    #[arg(long, default_value = "deploy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RoleArg {
    Dev,
    Live,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Dev => Role::Dev,
            RoleArg::Live => Role::Live,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a branch to the dev host (current branch by default)
    Stage {
        /// Git ref to deploy; defaults to HEAD
        branch: Option<String>,

        /// Quick-and-dirty: skip install/migrate when nothing relevant changed
        #[arg(long)]
        qad: bool,

        /// Take over an existing deployment lock
        #[arg(short, long)]
        force: bool,

        /// Back up the database before migrating
        #[arg(long)]
        backupdb: bool,

        /// Answer yes to every confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Deploy the live branch to the live host (always thorough)
    Deploy {
        /// Git ref to deploy; defaults to the configured live branch
        branch: Option<String>,

        /// Take over an existing deployment lock
        #[arg(short, long)]
        force: bool,

        /// Back up the database before migrating
        #[arg(long)]
        backupdb: bool,

        /// Answer yes to every confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Prune release directories older than the live one
    Cleanup {
        /// How many releases below the live one to keep
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        size: Option<u32>,

        /// Also remove releases newer than the live one (failed-deploy leftovers)
        #[arg(long)]
        superclean: bool,

        /// Which host to clean
        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Re-run install/migrate/assets against the newest release (idempotent)
    ReloadLastPush {
        /// Which host to reload
        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Show recent deploy log entries
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Which host's history to show
        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Open a shell in the project directory on the remote host
    Shell {
        /// Which host to open a shell on
        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Roll back to the previous release (not implemented)
    Rollback,

    /// Fetch a database dump (not implemented)
    FetchDbdump,
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        ui::failure(&format!("{error:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        // The stubs fail fast, before any configuration is needed.
        Commands::Rollback => Err(SlipwayError::NotImplemented {
            what: "rollback".to_string(),
        })?,
        Commands::FetchDbdump => Err(SlipwayError::NotImplemented {
            what: "fetch-dbdump".to_string(),
        })?,
        _ => {}
    }

    let cancel = exec::cancel_flag();
    {
        let flag = cancel.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;
    }

    let settings = load_settings(&cli.config)?;

    match cli.command {
        Commands::Stage {
            branch,
            qad,
            force,
            backupdb,
            yes,
        } => cmd_push(
            &settings,
            &cancel,
            Role::Dev,
            branch,
            PushOptions {
                qad,
                force,
                backupdb,
            },
            yes,
        ),
        Commands::Deploy {
            branch,
            force,
            backupdb,
            yes,
        } => cmd_push(
            &settings,
            &cancel,
            Role::Live,
            branch,
            PushOptions {
                qad: false,
                force,
                backupdb,
            },
            yes,
        ),
        Commands::Cleanup {
            size,
            superclean,
            role,
        } => cmd_cleanup(&settings, &cancel, role.into(), size, superclean),
        Commands::ReloadLastPush { role } => cmd_reload(&settings, &cancel, role.into()),
        Commands::History { count, role } => cmd_history(&settings, &cancel, role.into(), count),
        Commands::Shell { role } => cmd_shell(&settings, role.into()),
        Commands::Rollback | Commands::FetchDbdump => unreachable!("handled above"),
    }
}

fn load_settings(path: &PathBuf) -> Result<Settings> {
    let (file, unknown) = ProjectFile::load(path)?;
    for key in unknown {
        ui::warning(&format!("{}: unknown key '{key}' ignored", path.display()));
    }
    Ok(file.into_settings())
}

fn cmd_push(
    settings: &Settings,
    cancel: &CancelFlag,
    role: Role,
    branch: Option<String>,
    opts: PushOptions,
    yes: bool,
) -> Result<()> {
    let destination = settings.role(role, "host")?;
    let local = LocalRunner::new(Some(cancel.clone()));
    let remote = SshRunner::new(destination.as_str(), Some(cancel.clone()));
    let host = SshFs::new(&remote);
    let scm = GitScm::new(&local);
    let uploader = RsyncUploader::new(destination.as_str(), &local);
    let prompter = TerminalPrompter { assume_yes: yes };

    let reference = match (branch, role) {
        (Some(named), _) => named,
        (None, Role::Live) => {
            // Live deploys always start from fresh remote-tracking refs.
            scm.fetch_all()?;
            settings.get("live_branch")?
        }
        (None, Role::Dev) => "HEAD".to_string(),
    };

    let orchestrator =
        Orchestrator::new(settings, role, &host, &remote, &scm, &uploader, &prompter);
    let report = orchestrator.push(&reference, opts)?;

    ui::success(&format!(
        "Deployed {} ({}) to {}",
        report.release,
        short_revision(&report.revision),
        destination
    ));
    if !report.installed {
        ui::detail("dependencies unchanged - install skipped");
    }
    if !report.migrated {
        ui::detail("migrations unchanged - migrate skipped");
    }
    Ok(())
}

fn cmd_cleanup(
    settings: &Settings,
    cancel: &CancelFlag,
    role: Role,
    size: Option<u32>,
    superclean: bool,
) -> Result<()> {
    let destination = settings.role(role, "host")?;
    let remote = SshRunner::new(destination.as_str(), Some(cancel.clone()));
    let host = SshFs::new(&remote);
    let local = LocalRunner::new(Some(cancel.clone()));
    let scm = GitScm::new(&local);
    let uploader = RsyncUploader::new(destination.as_str(), &local);
    let prompter = TerminalPrompter { assume_yes: true };

    let orchestrator =
        Orchestrator::new(settings, role, &host, &remote, &scm, &uploader, &prompter);
    let size = match size {
        Some(n) => n as usize,
        None => orchestrator.history_size()?,
    };
    let report = orchestrator.cleanup(size, superclean)?;

    if report.removed.is_empty() {
        ui::info("Nothing to prune.");
    } else {
        for name in &report.removed {
            ui::info(&format!("Removed {name}"));
        }
        ui::success(&format!("Pruned {} release(s)", report.removed.len()));
    }
    Ok(())
}

fn cmd_reload(settings: &Settings, cancel: &CancelFlag, role: Role) -> Result<()> {
    let destination = settings.role(role, "host")?;
    let remote = SshRunner::new(destination.as_str(), Some(cancel.clone()));
    let host = SshFs::new(&remote);
    let local = LocalRunner::new(Some(cancel.clone()));
    let scm = GitScm::new(&local);
    let uploader = RsyncUploader::new(destination.as_str(), &local);
    let prompter = TerminalPrompter { assume_yes: true };

    let orchestrator =
        Orchestrator::new(settings, role, &host, &remote, &scm, &uploader, &prompter);
    orchestrator.reload_last_push()?;
    ui::success("Reloaded the last push");
    Ok(())
}

fn cmd_history(settings: &Settings, cancel: &CancelFlag, role: Role, count: usize) -> Result<()> {
    let destination = settings.role(role, "host")?;
    let project_path = settings.role(role, "project_path")?;
    let remote = SshRunner::new(destination.as_str(), Some(cancel.clone()));
    let host = SshFs::new(&remote);

    let log = DeployLog::new(&host, &project_path);
    let entries = log.recent(count)?;
    if entries.is_empty() {
        ui::info("No deploys recorded.");
        return Ok(());
    }
    for entry in &entries {
        ui::info(&format!(
            "{}  {:<12}  {}  {}{}",
            entry.timestamp,
            entry.operator,
            entry.release_dir,
            short_revision(&entry.revision),
            relative_age(&entry.timestamp)
                .map(|age| format!("  ({age})"))
                .unwrap_or_default()
        ));
    }
    Ok(())
}

fn cmd_shell(settings: &Settings, role: Role) -> Result<()> {
    let destination = settings.role(role, "host")?;
    let project_path = settings.role(role, "project_path")?;
    exec::open_shell(&destination, &project_path)?;
    Ok(())
}

fn short_revision(revision: &str) -> &str {
    if revision.len() > 12 {
        &revision[..12]
    } else {
        revision
    }
}

/// Humanize a deploy-log timestamp (UTC) relative to now.
fn relative_age(timestamp: &str) -> Option<String> {
    let logged = chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    let delta = chrono::Utc::now().naive_utc() - logged;
    let minutes = delta.num_minutes();
    Some(match minutes {
        m if m < 1 => "just now".to_string(),
        m if m < 60 => format!("{m}m ago"),
        m if m < 60 * 24 => format!("{}h ago", m / 60),
        m => format!("{}d ago", m / (60 * 24)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_stage() {
        let cli = Cli::try_parse_from(["slipway", "stage"]).unwrap();
        assert!(matches!(cli.command, Commands::Stage { .. }));
    }

    #[test]
    fn test_cli_parse_stage_with_args() {
        let cli = Cli::try_parse_from([
            "slipway", "stage", "feature/x", "--qad", "--force", "--backupdb", "-y",
        ])
        .unwrap();
        if let Commands::Stage {
            branch,
            qad,
            force,
            backupdb,
            yes,
        } = cli.command
        {
            assert_eq!(branch.as_deref(), Some("feature/x"));
            assert!(qad);
            assert!(force);
            assert!(backupdb);
            assert!(yes);
        } else {
            panic!("Expected Stage command");
        }
    }

    #[test]
    fn test_cli_parse_deploy_has_no_qad() {
        assert!(Cli::try_parse_from(["slipway", "deploy", "--qad"]).is_err());
    }

    #[test]
    fn test_cli_parse_cleanup_requires_role() {
        assert!(Cli::try_parse_from(["slipway", "cleanup"]).is_err());
        let cli =
            Cli::try_parse_from(["slipway", "cleanup", "--role", "live", "--superclean"]).unwrap();
        if let Commands::Cleanup {
            size,
            superclean,
            role,
        } = cli.command
        {
            assert!(size.is_none());
            assert!(superclean);
            assert!(matches!(role, RoleArg::Live));
        } else {
            panic!("Expected Cleanup command");
        }
    }

    #[test]
    fn test_cli_parse_cleanup_size_floor() {
        assert!(Cli::try_parse_from(["slipway", "cleanup", "--role", "dev", "--size", "0"]).is_err());
        assert!(Cli::try_parse_from(["slipway", "cleanup", "--role", "dev", "--size", "1"]).is_ok());
    }

    #[test]
    fn test_cli_parse_history_count() {
        let cli = Cli::try_parse_from(["slipway", "history", "--role", "dev", "-n", "3"]).unwrap();
        if let Commands::History { count, .. } = cli.command {
            assert_eq!(count, 3);
        } else {
            panic!("Expected History command");
        }
    }

    #[test]
    fn test_cli_config_flag() {
        let cli = Cli::try_parse_from(["slipway", "--config", "other.toml", "rollback"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn test_cli_parse_reload() {
        let cli = Cli::try_parse_from(["slipway", "reload-last-push", "--role", "dev"]).unwrap();
        assert!(matches!(cli.command, Commands::ReloadLastPush { .. }));
    }

    #[test]
    fn short_revision_truncates() {
        assert_eq!(short_revision("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_revision("abc"), "abc");
    }

    #[test]
    fn relative_age_parses_log_timestamps() {
        assert!(relative_age("2020-01-01 00:00:00").unwrap().ends_with("ago"));
        assert!(relative_age("not a date").is_none());
    }
}
