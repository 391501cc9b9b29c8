// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing the harness configuration file

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use serde_with::DurationSeconds;
use std::num::NonZeroUsize;
use std::time::Duration;
use upgrade_manifest::ConfigurationError;
use upgrade_manifest::Environment;
use upgrade_manifest::Family;
use upgrade_manifest::LoadError;
use upgrade_manifest::VersionSelection;

/// Configuration for a run of the upgrade test matrix
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// The build the tests run against.
    pub environment: Environment,
    /// Which upgrade paths become test cases.
    #[serde(default)]
    pub matrix: MatrixConfig,
    /// How clusters are upgraded.
    #[serde(default)]
    pub rolling: RollingUpgradeConfig,
    /// How long to wait for query traces.
    #[serde(default)]
    pub trace: TraceConfig,
    /// Logging for the harness itself.
    #[serde(default = "default_log")]
    pub log: ConfigLogging,
}

fn default_log() -> ConfigLogging {
    ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info }
}

impl HarnessConfig {
    /// Returns a configuration with defaults for everything except the
    /// environment
    pub fn new(environment: Environment) -> HarnessConfig {
        HarnessConfig {
            environment,
            matrix: MatrixConfig::default(),
            rolling: RollingUpgradeConfig::default(),
            trace: TraceConfig::default(),
            log: default_log(),
        }
    }

    /// Load a `HarnessConfig` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<HarnessConfig, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: HarnessConfig = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }

    /// Returns the environment after applying overrides from this process's
    /// environment variables
    pub fn resolved_environment(
        &self,
    ) -> Result<Environment, ConfigurationError> {
        self.environment.clone().with_process_overrides()
    }

    /// Settings used while a single test case runs
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            rolling: self.rolling.clone(),
            trace: self.trace.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Oldest starting family to test.  Each suite has its own minimum, used
    /// when this is not set.
    #[serde(default)]
    pub minimum_family: Option<Family>,
    #[serde(default)]
    pub version_selection: VersionSelection,
    /// Only generate paths that upgrade to the family under test.
    #[serde(default)]
    pub target_version_only: bool,
    /// Catalog to use instead of the built-in one.
    #[serde(default)]
    pub manifest: Option<Utf8PathBuf>,
    /// How many test cases may run at once.
    #[serde(default = "default_parallelism")]
    pub max_parallel_cases: NonZeroUsize,
}

fn default_parallelism() -> NonZeroUsize {
    NonZeroUsize::MIN
}

impl Default for MatrixConfig {
    fn default() -> Self {
        MatrixConfig {
            minimum_family: None,
            version_selection: VersionSelection::All,
            target_version_only: false,
            manifest: None,
            max_parallel_cases: default_parallelism(),
        }
    }
}

/// Which nodes a test body gets to query at each step of a rolling upgrade
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationMode {
    /// one session per step: the first node before the upgrade starts, then
    /// the node that was just upgraded
    #[default]
    UpgradedNode,
    /// one session per node per step, whether or not that node has been
    /// upgraded yet
    EveryNode,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RollingUpgradeConfig {
    /// How long a restarted node may take to become ready for queries.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_node_ready_timeout")]
    pub node_ready_timeout_secs: Duration,
    /// How often to check whether a restarted node is ready.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_node_ready_poll_interval")]
    pub node_ready_poll_interval_ms: Duration,
    #[serde(default)]
    pub observe: ObservationMode,
}

fn default_node_ready_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_node_ready_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for RollingUpgradeConfig {
    fn default() -> Self {
        RollingUpgradeConfig {
            node_ready_timeout_secs: default_node_ready_timeout(),
            node_ready_poll_interval_ms: default_node_ready_poll_interval(),
            observe: ObservationMode::default(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TraceConfig {
    /// How long a query's trace may take to be fully written.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_trace_timeout")]
    pub timeout_secs: Duration,
    /// How often to check whether a trace has been written.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_trace_poll_interval")]
    pub poll_interval_ms: Duration,
}

fn default_trace_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_trace_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            timeout_secs: default_trace_timeout(),
            poll_interval_ms: default_trace_poll_interval(),
        }
    }
}

/// Settings used while a single test case runs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionConfig {
    pub rolling: RollingUpgradeConfig,
    pub trace: TraceConfig,
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use camino_tempfile::NamedUtf8TempFile;
    use std::io::Write;

    fn write_config(contents: &str) -> NamedUtf8TempFile {
        let mut file = NamedUtf8TempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_example_config_parses() {
        let path = Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("configs/config.toml");
        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.environment.current_family, Family::new(4, 0));
        assert_eq!(config.matrix.minimum_family, Some(Family::new(3, 0)));
        assert_eq!(config.rolling.observe, ObservationMode::EveryNode);
        assert_eq!(
            config.rolling.node_ready_timeout_secs,
            Duration::from_secs(180)
        );
        assert_eq!(
            config.trace.poll_interval_ms,
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
            [environment]
            current_family = "3.11"
            "#,
        );
        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config,
            HarnessConfig::new(Environment::new(Family::new(3, 11)))
        );
        assert_eq!(config.matrix.max_parallel_cases.get(), 1);
        assert_eq!(config.session(), SessionConfig::default());
    }

    #[test]
    fn test_config_errors() {
        let file = write_config(
            r#"
            [environment]
            current_family = "3.11"

            [rolling]
            node_ready_timeout = 30
            "#,
        );
        assert_matches!(
            HarnessConfig::from_file(file.path()),
            Err(LoadError::Parse { .. })
        );

        let file = write_config(
            r#"
            [environment]
            current_family = "three"
            "#,
        );
        assert_matches!(
            HarnessConfig::from_file(file.path()),
            Err(LoadError::Parse { .. })
        );

        assert_matches!(
            HarnessConfig::from_file(Utf8Path::new("/nonexistent.toml")),
            Err(LoadError::Io { .. })
        );
    }
}
