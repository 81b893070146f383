/*!
 * Config Loader
 * Turns descriptors into validated AppSpecs. Pure apart from filesystem probes.
 */

use super::descriptor::{json_kind, AppDescriptor, ArgsField, EcosystemDescriptor, EnvSection, PROFILE_PREFIX};
use super::quantity::{parse_byte_quantity, split_command_line};
use super::spec::{AppSpec, Backoff, LogPaths, RestartPolicy};
use super::ConfigResult;
use crate::core::errors::ConfigError;
use crate::core::limits::{DEFAULT_BACKOFF_BASE, DEFAULT_KILL_TIMEOUT, DEFAULT_MAX_RESTARTS, DEFAULT_MIN_UPTIME};
use crate::core::types::Bytes;
use path_clean::PathClean;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Loads descriptors for one active profile
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    profile: Option<String>,
    root: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the active profile (`production` reads `env_production`)
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        let profile = profile.into();
        self.profile = if profile.trim().is_empty() {
            None
        } else {
            Some(profile)
        };
        self
    }

    /// Directory relative log paths are resolved against.
    /// Without one, each app's `cwd` is used.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Override the `PATH` used to resolve bare command names
    #[must_use]
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Read and load a JSON descriptor file.
    ///
    /// Relative log paths resolve against the file's directory unless a root
    /// was set explicitly.
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<Vec<AppSpec>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let descriptor = EcosystemDescriptor::from_json(&text)?;

        if self.root.is_none() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                return self.clone().with_root(dir).load(&descriptor);
            }
        }
        self.load(&descriptor)
    }

    /// Load a JSON descriptor held in memory
    pub fn from_json(&self, text: &str) -> ConfigResult<Vec<AppSpec>> {
        self.load(&EcosystemDescriptor::from_json(text)?)
    }

    /// Validate every app of a descriptor
    pub fn load(&self, descriptor: &EcosystemDescriptor) -> ConfigResult<Vec<AppSpec>> {
        if descriptor.apps.is_empty() {
            return Err(ConfigError::NoApps);
        }

        let mut seen = HashSet::with_capacity(descriptor.apps.len());
        let mut specs = Vec::with_capacity(descriptor.apps.len());

        for app in &descriptor.apps {
            let spec = self.load_app(app)?;
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName(spec.name));
            }
            specs.push(spec);
        }

        debug!(
            apps = specs.len(),
            profile = self.profile.as_deref().unwrap_or("default"),
            "Descriptor loaded"
        );
        Ok(specs)
    }

    /// Validate a single app
    pub fn load_app(&self, app: &AppDescriptor) -> ConfigResult<AppSpec> {
        let label = app.display_name();

        let name = match app.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            Some(_) => return Err(ConfigError::invalid(label, "name", "must not be empty")),
            None => return Err(ConfigError::missing(label, "name")),
        };
        let label = name.as_str();

        reject_unknown_fields(label, &app.extra)?;

        let cwd = match &app.cwd {
            Some(cwd) if cwd.as_os_str().is_empty() => {
                return Err(ConfigError::invalid(label, "cwd", "must not be empty"))
            }
            Some(cwd) => cwd.clean(),
            None => return Err(ConfigError::missing(label, "cwd")),
        };
        if !cwd.is_dir() {
            return Err(ConfigError::invalid(
                label,
                "cwd",
                format!("{} is not an existing directory", cwd.display()),
            ));
        }

        let script = match app.script.as_deref().map(str::trim) {
            Some(script) if !script.is_empty() => script.to_string(),
            Some(_) => return Err(ConfigError::invalid(label, "script", "must not be empty")),
            None => return Err(ConfigError::missing(label, "script")),
        };

        let mut args = match &app.args {
            None => Vec::new(),
            Some(ArgsField::List(list)) => list.clone(),
            Some(ArgsField::Line(line)) => {
                split_command_line(line).map_err(|reason| ConfigError::invalid(label, "args", reason))?
            }
        };

        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let (command, program) = match app.interpreter.as_deref().map(str::trim) {
            Some(interpreter) if !interpreter.is_empty() => {
                let program = resolve_program(label, "interpreter", interpreter, &cwd, &search_path)?;
                let script_path = resolve_relative(&cwd, &script);
                if !script_path.is_file() {
                    return Err(ConfigError::invalid(
                        label,
                        "script",
                        format!("{} does not exist", script_path.display()),
                    ));
                }
                args.insert(0, script.clone());
                (interpreter.to_string(), program)
            }
            Some(_) => return Err(ConfigError::invalid(label, "interpreter", "must not be empty")),
            None => {
                let program = resolve_program(label, "script", &script, &cwd, &search_path)?;
                (script, program)
            }
        };

        let instances = match app.instances {
            None => 1,
            Some(n) if n >= 1 && n <= u32::MAX as i64 => n as u32,
            Some(n) => {
                return Err(ConfigError::invalid(
                    label,
                    "instances",
                    format!("{} is not a positive integer", n),
                ))
            }
        };

        let max_memory = app
            .max_memory_restart
            .as_ref()
            .map(|value| parse_memory_field(label, value))
            .transpose()?;

        let env = self.merged_env(label, app)?;

        let root = self.root.clone().unwrap_or_else(|| cwd.clone());
        let logs = LogPaths {
            out: log_path(label, "out_file", app.out_file.as_deref(), &root)?,
            error: log_path(label, "error_file", app.error_file.as_deref(), &root)?,
            combined: log_path(label, "log_file", app.log_file.as_deref(), &root)?,
            merge: app.merge_logs.unwrap_or(false),
        };

        let restart = restart_policy(label, app)?;

        let watch = app.watch.unwrap_or(false);
        if watch {
            warn!(app = %label, "`watch` is accepted but file watching is not supported");
        }

        Ok(AppSpec {
            name,
            command,
            program,
            args,
            cwd,
            instances,
            autorestart: app.autorestart.unwrap_or(true),
            watch,
            max_memory,
            profile: self.profile.clone(),
            env,
            logs,
            time: app.time.unwrap_or(false),
            restart,
            kill_timeout: app
                .kill_timeout
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_KILL_TIMEOUT),
        })
    }

    /// `env` overlaid with `env_<profile>`; the profile wins on conflicts
    fn merged_env(&self, app: &str, desc: &AppDescriptor) -> ConfigResult<BTreeMap<String, String>> {
        let mut merged = BTreeMap::new();

        if let Some(base) = &desc.env {
            merge_section(app, "env", base, &mut merged)?;
        }

        if let Some(profile) = &self.profile {
            let field = format!("{}{}", PROFILE_PREFIX, profile);
            match desc.extra.get(&field) {
                Some(Value::Object(section)) => {
                    let section: EnvSection = section.clone().into_iter().collect();
                    merge_section(app, &field, &section, &mut merged)?;
                }
                Some(other) => {
                    return Err(ConfigError::invalid(
                        app,
                        &field,
                        format!("expected an object, found {}", json_kind(other)),
                    ))
                }
                None => debug!(
                    app = %app,
                    profile = %profile,
                    declared = ?desc.profiles().collect::<Vec<_>>(),
                    "No profile section, using default env"
                ),
            }
        }

        Ok(merged)
    }
}

fn reject_unknown_fields(app: &str, extra: &BTreeMap<String, Value>) -> ConfigResult<()> {
    for (key, value) in extra {
        match key.strip_prefix(PROFILE_PREFIX) {
            Some(profile) if !profile.is_empty() => {
                if !value.is_object() {
                    return Err(ConfigError::invalid(
                        app,
                        key,
                        format!("expected an object, found {}", json_kind(value)),
                    ));
                }
            }
            _ => {
                return Err(ConfigError::UnknownField {
                    app: app.to_string(),
                    field: key.clone(),
                })
            }
        }
    }
    Ok(())
}

fn merge_section(
    app: &str,
    field: &str,
    section: &EnvSection,
    merged: &mut BTreeMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in section {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(ConfigError::invalid(
                app,
                field,
                format!("`{}` is not a valid variable name", key),
            ));
        }
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(ConfigError::invalid(
                    app,
                    &format!("{}.{}", field, key),
                    format!("expected a string, number or boolean, found {}", json_kind(other)),
                ))
            }
        };
        merged.insert(key.clone(), value);
    }
    Ok(())
}

fn parse_memory_field(app: &str, value: &Value) -> ConfigResult<Bytes> {
    const FIELD: &str = "max_memory_restart";
    match value {
        Value::String(s) => parse_byte_quantity(s).map_err(|reason| ConfigError::invalid(app, FIELD, reason)),
        Value::Number(n) => match n.as_u64() {
            Some(bytes) if bytes > 0 => Ok(bytes),
            _ => Err(ConfigError::invalid(app, FIELD, format!("{} is not a positive byte count", n))),
        },
        other => Err(ConfigError::invalid(
            app,
            FIELD,
            format!("expected a string or number, found {}", json_kind(other)),
        )),
    }
}

fn log_path(app: &str, field: &str, raw: Option<&str>, root: &Path) -> ConfigResult<Option<PathBuf>> {
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::invalid(app, field, "must not be empty")),
        Some(raw) => {
            let path = resolve_relative(root, raw);
            if path.file_name().is_none() {
                return Err(ConfigError::invalid(
                    app,
                    field,
                    format!("{} does not name a file", path.display()),
                ));
            }
            Ok(Some(path))
        }
    }
}

fn restart_policy(app: &str, desc: &AppDescriptor) -> ConfigResult<RestartPolicy> {
    let max_restarts = match desc.max_restarts {
        None => DEFAULT_MAX_RESTARTS,
        Some(n) if n >= 0 && n <= u32::MAX as i64 => n as u32,
        Some(n) => {
            return Err(ConfigError::invalid(
                app,
                "max_restarts",
                format!("{} is not a non-negative integer", n),
            ))
        }
    };

    let backoff = match (desc.restart_delay, desc.exp_backoff_restart_delay) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::invalid(
                app,
                "restart_delay",
                "cannot be combined with exp_backoff_restart_delay",
            ))
        }
        (Some(ms), None) => Backoff::Fixed {
            delay: Duration::from_millis(ms),
        },
        (None, Some(0)) => {
            return Err(ConfigError::invalid(
                app,
                "exp_backoff_restart_delay",
                "must be greater than zero",
            ))
        }
        (None, Some(ms)) => Backoff::Exponential {
            base: Duration::from_millis(ms),
        },
        (None, None) => Backoff::Exponential {
            base: DEFAULT_BACKOFF_BASE,
        },
    };

    Ok(RestartPolicy {
        max_restarts,
        min_uptime: desc
            .min_uptime
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MIN_UPTIME),
        backoff,
        stop_exit_codes: desc.stop_exit_codes.clone().unwrap_or_default(),
    })
}

fn resolve_relative(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.clean()
    } else {
        base.join(path).clean()
    }
}

/// Resolve a command to an executable path.
///
/// Anything containing a slash is a path (relative to `cwd`); bare names are
/// looked up on the search path.
fn resolve_program(
    app: &str,
    field: &str,
    command: &str,
    cwd: &Path,
    search_path: &OsString,
) -> ConfigResult<PathBuf> {
    if command.contains('/') {
        let path = resolve_relative(cwd, command);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(ConfigError::invalid(
                app,
                field,
                format!("{} is not an executable file", path.display()),
            ))
        };
    }

    std::env::split_paths(search_path)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ConfigError::invalid(app, field, format!("`{}` not found on PATH", command)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
