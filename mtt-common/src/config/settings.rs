//! Harness settings: every pause, timeout and remote-execution knob in one place.
//!
//! Precedence: defaults, then the TOML settings file, then `MTT_*` variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env::{EnvError, EnvParser};
use crate::errors::{HarnessError, HarnessResult};

/// Suite name used as key in skip and run lists.
pub const DEFAULT_SUITE_NAME: &str = "MigrationToolTest";

/// Named pauses and timeouts of one test case run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub zookeeper_settle_secs: u64,
    pub broker_settle_secs: u64,
    pub migration_tool_settle_secs: u64,
    pub topic_settle_secs: u64,
    pub consumer_settle_secs: u64,
    /// Pause after every bounce iteration, bounced or not.
    pub bounce_interval_secs: u64,
    /// Pause after raising the stop request and after the acknowledgment arrives.
    pub stop_observe_secs: u64,
    /// Interval between acknowledgment checks.
    pub ack_poll_secs: u64,
    /// Upper bound on waiting for the acknowledgment. Unset waits forever.
    pub ack_timeout_secs: Option<u64>,
    pub producer_round_pause_secs: u64,
    /// How long teardown lets the producer task finish before aborting it.
    pub producer_grace_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            zookeeper_settle_secs: 2,
            broker_settle_secs: 5,
            migration_tool_settle_secs: 5,
            topic_settle_secs: 5,
            consumer_settle_secs: 20,
            bounce_interval_secs: 15,
            stop_observe_secs: 1,
            ack_poll_secs: 2,
            ack_timeout_secs: None,
            producer_round_pause_secs: 1,
            producer_grace_secs: 5,
        }
    }
}

impl Timings {
    /// All pauses at zero, for dry runs against the mock environment.
    pub fn instant() -> Self {
        Self {
            zookeeper_settle_secs: 0,
            broker_settle_secs: 0,
            migration_tool_settle_secs: 0,
            topic_settle_secs: 0,
            consumer_settle_secs: 0,
            bounce_interval_secs: 0,
            stop_observe_secs: 0,
            ack_poll_secs: 0,
            ack_timeout_secs: None,
            producer_round_pause_secs: 0,
            producer_grace_secs: 0,
        }
    }

    pub fn zookeeper_settle(&self) -> Duration {
        Duration::from_secs(self.zookeeper_settle_secs)
    }

    pub fn broker_settle(&self) -> Duration {
        Duration::from_secs(self.broker_settle_secs)
    }

    pub fn migration_tool_settle(&self) -> Duration {
        Duration::from_secs(self.migration_tool_settle_secs)
    }

    pub fn topic_settle(&self) -> Duration {
        Duration::from_secs(self.topic_settle_secs)
    }

    pub fn consumer_settle(&self) -> Duration {
        Duration::from_secs(self.consumer_settle_secs)
    }

    pub fn bounce_interval(&self) -> Duration {
        Duration::from_secs(self.bounce_interval_secs)
    }

    pub fn stop_observe(&self) -> Duration {
        Duration::from_secs(self.stop_observe_secs)
    }

    pub fn ack_poll(&self) -> Duration {
        Duration::from_secs(self.ack_poll_secs)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_secs.map(Duration::from_secs)
    }

    pub fn producer_round_pause(&self) -> Duration {
        Duration::from_secs(self.producer_round_pause_secs)
    }

    pub fn producer_grace(&self) -> Duration {
        Duration::from_secs(self.producer_grace_secs)
    }
}

/// Remote execution knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub ssh_user: Option<String>,
    pub connect_timeout_secs: u64,
    /// Ceiling for one remote command, including copies.
    pub command_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            ssh_user: None,
            connect_timeout_secs: 5,
            command_timeout_secs: 300,
        }
    }
}

impl RemoteSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub suite_name: String,
    pub timings: Timings,
    pub remote: RemoteSettings,
    /// Replace remote execution with the in-process mock environment.
    pub mock: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            suite_name: DEFAULT_SUITE_NAME.to_string(),
            timings: Timings::default(),
            remote: RemoteSettings::default(),
            mock: false,
        }
    }
}

impl HarnessSettings {
    /// `~/.config/mtt/settings.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mtt").join("settings.toml"))
    }

    pub fn from_toml_str(content: &str, origin: &Path) -> HarnessResult<Self> {
        toml::from_str(content).map_err(|e| {
            HarnessError::SetupFailed(format!("invalid settings file {}: {e}", origin.display()))
        })
    }

    /// Load from `explicit`, else from the default path when it exists, else defaults.
    pub fn load_file(explicit: Option<&Path>) -> HarnessResult<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path).map_err(|source| HarnessError::ReadFile {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(component = "Settings", path = %path.display(), "Loaded settings file");
        Self::from_toml_str(&content, &path)
    }

    /// Apply `MTT_*` overrides in place.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        let t = &mut self.timings;
        t.zookeeper_settle_secs = parser
            .get_u64_range("ZOOKEEPER_SETTLE_SECS", t.zookeeper_settle_secs, 0, 3600)
            .value;
        t.broker_settle_secs = parser
            .get_u64_range("BROKER_SETTLE_SECS", t.broker_settle_secs, 0, 3600)
            .value;
        t.migration_tool_settle_secs = parser
            .get_u64_range(
                "MIGRATION_TOOL_SETTLE_SECS",
                t.migration_tool_settle_secs,
                0,
                3600,
            )
            .value;
        t.topic_settle_secs = parser
            .get_u64_range("TOPIC_SETTLE_SECS", t.topic_settle_secs, 0, 3600)
            .value;
        t.consumer_settle_secs = parser
            .get_u64_range("CONSUMER_SETTLE_SECS", t.consumer_settle_secs, 0, 3600)
            .value;
        t.bounce_interval_secs = parser
            .get_u64_range("BOUNCE_INTERVAL_SECS", t.bounce_interval_secs, 0, 3600)
            .value;
        t.ack_poll_secs = parser
            .get_u64_range("ACK_POLL_SECS", t.ack_poll_secs, 0, 600)
            .value;
        let ack_timeout = parser.get_optional_duration("ACK_TIMEOUT");
        if ack_timeout.is_from_env() {
            t.ack_timeout_secs = ack_timeout.value.map(whole_secs_rounded_up);
        }

        let remote = &mut self.remote;
        remote.command_timeout_secs = parser
            .get_u64_range("COMMAND_TIMEOUT_SECS", remote.command_timeout_secs, 1, 86_400)
            .value;
        if let Some(user) = parser.get_optional_string("SSH_USER").value {
            remote.ssh_user = Some(user);
        }

        self.mock = parser.get_bool("MOCK_SSH", self.mock).value;
    }

    /// File (or defaults) plus environment. Any bad variable fails the load.
    pub fn resolve(explicit: Option<&Path>) -> HarnessResult<Self> {
        let mut settings = Self::load_file(explicit)?;
        let mut parser = EnvParser::new();
        settings.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(HarnessError::SetupFailed(render_env_errors(
                &parser.take_errors(),
            )));
        }
        Ok(settings)
    }
}

/// Sub-second remainders round up so `500ms` never becomes a zero timeout.
fn whole_secs_rounded_up(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn render_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
