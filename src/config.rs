use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::error::MountError;
use crate::mounts::MountOptions;
use crate::ssh::SshTarget;
use crate::sshfs::MountSpec;
use crate::util::{expand_tilde, parse_id_map};

#[derive(Debug, Clone, Facet)]
pub struct Config {
    /// Name used in messages and for the log directory. Defaults to `ssh.host`.
    #[facet(default)]
    pub instance: String,
    pub ssh: SshConfig,
    #[facet(default)]
    pub install: InstallConfig,
    #[facet(default)]
    pub mounts: Vec<MountConfig>,
}

#[derive(Debug, Clone, Facet)]
pub struct SshConfig {
    pub host: String,
    #[facet(default = 22)]
    pub port: u16,
    pub user: String,
    #[facet(default = "~/.ssh/id_ed25519")]
    pub key: String,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct InstallConfig {
    #[facet(default = true)]
    pub auto: bool,
    #[facet(default = 300)]
    pub timeout_s: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            auto: true,
            timeout_s: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct MountConfig {
    pub source: String,
    pub target: String,
    /// `"local:remote"` uid pairs. Validated and passed along, but not
    /// applied to the mount yet.
    #[facet(default)]
    pub uid_map: Vec<String>,
    /// `"local:remote"` gid pairs. Not applied yet, see `uid_map`.
    #[facet(default)]
    pub gid_map: Vec<String>,
}

/// Parsed config together with where it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Canonicalized path to the config file.
    pub config_path: PathBuf,
    pub config: Config,
}

impl LoadedConfig {
    /// The instance name, falling back to the SSH host.
    pub fn display_name(&self) -> &str {
        if self.config.instance.is_empty() {
            &self.config.ssh.host
        } else {
            &self.config.instance
        }
    }

    pub fn ssh_target(&self) -> SshTarget {
        let ssh = &self.config.ssh;
        SshTarget {
            host: ssh.host.clone(),
            port: ssh.port,
            user: ssh.user.clone(),
            key_path: expand_tilde(&ssh.key),
        }
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions {
            install_missing: self.config.install.auto,
            install_timeout: Duration::from_secs(self.config.install.timeout_s),
        }
    }

    /// Resolve mount sources relative to the config file and parse id maps.
    pub fn resolve_mounts(&self) -> Result<Vec<MountSpec>, MountError> {
        let parent = self.config_path.parent().unwrap_or(Path::new("."));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let config_dir = parent.canonicalize().map_err(|e| MountError::Io {
            context: format!("canonicalizing config dir {}", parent.display()),
            source: e,
        })?;

        let mut resolved = Vec::new();
        for m in &self.config.mounts {
            let source = match m.source.as_str() {
                "." => config_dir.clone(),
                other => {
                    let p = expand_tilde(other);
                    if p.is_absolute() { p } else { config_dir.join(p) }
                }
            };

            if !source.is_dir() {
                return Err(MountError::Validation {
                    message: format!("mount source is not a directory: {}", source.display()),
                });
            }

            resolved.push(MountSpec {
                source_path: source.display().to_string(),
                target_path: m.target.clone(),
                uid_map: parse_id_map(&m.uid_map)?,
                gid_map: parse_id_map(&m.gid_map)?,
            });
        }

        Ok(resolved)
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), MountError> {
    if config.ssh.host.trim().is_empty() {
        return Err(MountError::Validation {
            message: "ssh.host must not be empty".into(),
        });
    }
    if config.ssh.user.trim().is_empty() {
        return Err(MountError::Validation {
            message: "ssh.user must not be empty".into(),
        });
    }
    if config.install.timeout_s < 1 {
        return Err(MountError::Validation {
            message: "install.timeout_s must be at least 1".into(),
        });
    }
    if config.mounts.is_empty() {
        return Err(MountError::Validation {
            message: "at least one [[mounts]] entry is required".into(),
        });
    }

    let mut targets = HashSet::new();
    for (idx, m) in config.mounts.iter().enumerate() {
        let label = format!("mounts[{idx}]");
        if m.source.is_empty() {
            return Err(MountError::Validation {
                message: format!("{label}: source is required"),
            });
        }
        if m.target.is_empty() {
            return Err(MountError::Validation {
                message: format!("{label}: target is required"),
            });
        }
        if !targets.insert(m.target.as_str()) {
            return Err(MountError::Validation {
                message: format!("{label}: duplicate mount target '{}'", m.target),
            });
        }
        parse_id_map(&m.uid_map).map_err(|e| prefixed(&label, "uid_map", e))?;
        parse_id_map(&m.gid_map).map_err(|e| prefixed(&label, "gid_map", e))?;
    }

    Ok(())
}

fn prefixed(label: &str, field: &str, error: MountError) -> MountError {
    match error {
        MountError::Validation { message } => MountError::Validation {
            message: format!("{label}.{field}: {message}"),
        },
        other => other,
    }
}

/// The instance name ends up as a directory name under the data dir.
fn validate_name(name: &str) -> Result<(), MountError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(MountError::Validation {
            message: format!("instance name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<LoadedConfig, MountError> {
    let contents = std::fs::read_to_string(path).map_err(|source| MountError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| MountError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;

    let canonical = path.canonicalize().map_err(|source| MountError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let loaded = LoadedConfig {
        config_path: canonical,
        config,
    };
    validate_name(loaded.display_name())?;
    Ok(loaded)
}
