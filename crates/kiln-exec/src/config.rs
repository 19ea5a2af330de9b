//! Execution environment configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Running Docker container, addressed by name.
    #[default]
    Docker,
    /// Running Podman container, addressed by name.
    Podman,
    /// The local host (no container).
    Local,
}

impl EnvironmentKind {
    /// Binary used to reach the container, if any.
    #[must_use]
    pub fn runtime_binary(self) -> Option<&'static str> {
        match self {
            Self::Docker => Some("docker"),
            Self::Podman => Some("podman"),
            Self::Local => None,
        }
    }
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for EnvironmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "local" | "none" => Ok(Self::Local),
            other => Err(format!("unknown environment kind '{other}' (expected docker, podman or local)")),
        }
    }
}

/// Handle describing where invocations run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment kind.
    #[serde(default)]
    pub kind: EnvironmentKind,

    /// Container name (ignored for `local`).
    #[serde(default = "default_container")]
    pub container: String,

    /// Working directory inside the environment.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables passed to every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Extra flags inserted into `exec` before the container name.
    #[serde(default)]
    pub custom_flags: Vec<String>,
}

fn default_container() -> String {
    "kiln".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            kind: EnvironmentKind::Docker,
            container: default_container(),
            working_dir: None,
            env: BTreeMap::new(),
            custom_flags: Vec::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Creates a configuration for a named Docker container.
    #[must_use]
    pub fn docker(container: impl Into<String>) -> Self {
        Self { container: container.into(), ..Self::default() }
    }

    /// Creates a configuration that runs on the local host.
    #[must_use]
    pub fn local() -> Self {
        Self { kind: EnvironmentKind::Local, ..Self::default() }
    }

    /// Sets the environment kind.
    #[must_use]
    pub fn with_kind(mut self, kind: EnvironmentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable name used in logs and errors.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.kind {
            EnvironmentKind::Local => "local".to_string(),
            kind => format!("{kind}:{}", self.container),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("Docker".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Docker);
        assert_eq!("podman".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Podman);
        assert_eq!("none".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Local);
        assert!("lxc".parse::<EnvironmentKind>().is_err());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: EnvironmentConfig = toml::from_str("").unwrap();
        assert_eq!(config, EnvironmentConfig::default());

        let config: EnvironmentConfig =
            toml::from_str("kind = \"podman\"\ncontainer = \"trainer\"\n").unwrap();
        assert_eq!(config.kind, EnvironmentKind::Podman);
        assert_eq!(config.display_name(), "podman:trainer");
    }

    #[test]
    fn test_display_name_local() {
        assert_eq!(EnvironmentConfig::local().display_name(), "local");
    }
}
