//! Configuration: settings file, environment overrides and source tracking.

pub mod env;
pub mod settings;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use settings::{DEFAULT_SUITE_NAME, HarnessSettings, RemoteSettings, Timings};
pub use source::{ConfigSource, Sourced};
