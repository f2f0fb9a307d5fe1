//! Configuration resolver
//!
//! Most settings are computed lazily from a small set of user-supplied
//! values. A setting resolves to an explicit override when one was set,
//! otherwise to a template default in which each `{name}` placeholder is
//! replaced by the resolved value of `name`, recursively. Role-scoped
//! names (`dev_x`, `live_x`) resolve independently but fall back to the
//! unscoped `x` through their templates.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{SlipwayError, SlipwayResult};

/// Which remote role a command operates against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Dev,
    Live,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dev => "dev",
            Role::Live => "live",
        }
    }
}

/// Template defaults, adapted per role below.
///
/// `project_name` and `host` deliberately have no default; resolving
/// anything that reaches them without an override fails with
/// `UndefinedKey`.
const DEFAULTS: &[(&str, &str)] = &[
    // Global defaults
    ("tld", ".com"),
    ("web_home", "/var/www"),
    ("workon_home", "/var/python-environments"),
    ("backups_dir", "backups"),
    ("media_dir", "media"),
    ("manifest", "requirements.txt"),
    ("history_size", "3"),
    ("virtualenv", "{project_name}"),
    ("vassal", "{project_name}"),
    // Dev defaults
    ("dev_project_name", "{project_name}"),
    ("dev_tld", "{tld}"),
    ("dev_web_home", "{web_home}"),
    ("dev_virtualenv", "{virtualenv}"),
    ("dev_vassal", "{vassal}"),
    ("dev_workon_home", "{workon_home}"),
    ("dev_host", "{host}"),
    ("dev_project_dir", "{dev_project_name}{dev_tld}"),
    ("dev_project_path", "{dev_web_home}/{dev_project_dir}"),
    ("dev_virtualenv_path", "{dev_workon_home}/{dev_virtualenv}"),
    ("dev_restart_cmd", "sudo touch /etc/vassals/{dev_vassal}.ini"),
    ("dev_backups_dir", "{backups_dir}"),
    ("dev_media_dir", "{media_dir}"),
    ("dev_media_path", "{dev_project_path}/{dev_media_dir}"),
    // Live defaults
    ("live_project_name", "{project_name}"),
    ("live_tld", "{tld}"),
    ("live_web_home", "{web_home}"),
    ("live_virtualenv", "{virtualenv}"),
    ("live_vassal", "{vassal}"),
    ("live_workon_home", "{workon_home}"),
    ("live_host", "{host}"),
    ("live_branch", "origin/live"),
    ("live_project_dir", "{live_project_name}{live_tld}"),
    ("live_project_path", "{live_web_home}/{live_project_dir}"),
    ("live_virtualenv_path", "{live_workon_home}/{live_virtualenv}"),
    ("live_restart_cmd", "sudo touch /etc/vassals/{live_vassal}.ini"),
    ("live_backups_dir", "{backups_dir}"),
    ("live_media_dir", "{media_dir}"),
    ("live_media_path", "{live_project_path}/{live_media_dir}"),
    // Local defaults
    ("local_backups_dir", "{backups_dir}"),
    ("local_media_dir", "{media_dir}"),
];

/// Two-tier settings store: overrides shadow template defaults.
///
/// Resolution is lazy and idempotent; no value is cached, and resolving
/// the same unset name twice yields the same string given the same
/// overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    overrides: HashMap<String, String>,
    defaults: Vec<(String, String)>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            defaults: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Construct with a custom defaults table (tests only).
    #[cfg(test)]
    pub(crate) fn with_defaults(defaults: Vec<(String, String)>) -> Self {
        Self {
            overrides: HashMap::new(),
            defaults,
        }
    }

    /// Store an explicit override; it is returned verbatim by `get`,
    /// never re-interpolated.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(name.into(), value.into());
    }

    /// Resolve `name` to its final string value.
    pub fn get(&self, name: &str) -> SlipwayResult<String> {
        let mut in_progress = Vec::new();
        self.resolve(name, &mut in_progress)
    }

    /// Sugar for `get("{role}_{name}")`.
    pub fn role(&self, role: Role, name: &str) -> SlipwayResult<String> {
        self.get(&format!("{}_{}", role.as_str(), name))
    }

    fn resolve(&self, name: &str, in_progress: &mut Vec<String>) -> SlipwayResult<String> {
        if let Some(value) = self.overrides.get(name) {
            return Ok(value.clone());
        }
        if in_progress.iter().any(|n| n == name) {
            return Err(SlipwayError::CyclicDefinition {
                name: name.to_string(),
            });
        }
        let template = self
            .defaults
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| SlipwayError::UndefinedKey {
                name: name.to_string(),
            })?;

        in_progress.push(name.to_string());
        let value = self.interpolate(&template, in_progress);
        in_progress.pop();
        value
    }

    /// Replace each `{name}` with the resolved value of `name`.
    /// `{{` and `}}` are literal braces. Templates come from the
    /// defaults table above, so stray unmatched braces are kept as-is.
    fn interpolate(&self, template: &str, in_progress: &mut Vec<String>) -> SlipwayResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut placeholder = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        placeholder.push(inner);
                    }
                    if closed {
                        out.push_str(&self.resolve(&placeholder, in_progress)?);
                    } else {
                        out.push('{');
                        out.push_str(&placeholder);
                    }
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

/// On-disk project configuration (`deploy.toml`).
///
/// `[settings]` pairs become plain overrides; `[dev]` and `[live]`
/// tables become role-prefixed overrides. All values are strings.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub dev: BTreeMap<String, String>,
    #[serde(default)]
    pub live: BTreeMap<String, String>,
}

impl ProjectFile {
    /// Load and parse, collecting unknown keys as warnings rather than
    /// failing on them.
    pub fn load(path: &Path) -> SlipwayResult<(Self, Vec<String>)> {
        let raw = std::fs::read_to_string(path).map_err(|e| SlipwayError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let de = toml::de::Deserializer::new(&raw);
        let mut unknown = Vec::new();
        let file: ProjectFile = serde_ignored::deserialize(de, |ignored| {
            unknown.push(ignored.to_string());
        })
        .map_err(|e| SlipwayError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok((file, unknown))
    }

    /// Flatten into a `Settings` override map.
    pub fn into_settings(self) -> Settings {
        let mut settings = Settings::new();
        for (key, value) in self.settings {
            settings.set(key, value);
        }
        for (key, value) in self.dev {
            settings.set(format!("dev_{key}"), value);
        }
        for (key, value) in self.live {
            settings.set(format!("live_{key}"), value);
        }
        settings
    }
}
