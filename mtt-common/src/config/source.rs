//! Where a configuration value came from.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default or the settings file.
    Default,
    /// An `MTT_*` environment variable.
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Environment => "environment",
        })
    }
}

/// A value paired with its source, plus the variable name when it came from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    pub fn is_from_env(&self) -> bool {
        self.source == ConfigSource::Environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sourced_tracks_origin() {
        let default = Sourced::default_value(5u64);
        assert_eq!(default.source, ConfigSource::Default);
        assert!(!default.is_from_env());
        assert_eq!(default.var, None);

        let env = Sourced::from_env(7u64, "MTT_ACK_POLL_SECS");
        assert!(env.is_from_env());
        assert_eq!(env.var.as_deref(), Some("MTT_ACK_POLL_SECS"));
        assert_eq!(env.source.to_string(), "environment");
    }
}
