//! Layer configuration.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

use crate::diagnostics::{self, StrictMode, VMI901};
use crate::util::time::timestamp_micros;

/// Port the viewer listens on for the telemetry stream.
pub const DEFAULT_STREAM_PORT: u16 = 2104;

/// Which backend receives telemetry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryBackend {
    /// Length-prefixed binary records over TCP.
    Stream,
    /// Embedded SQLite database.
    Store,
    /// In-process queue, drained by the embedder. Only reachable through
    /// [`configure`](crate::core::context::configure); nothing drains it
    /// when the loader creates the context.
    Memory,
    /// Events are dropped.
    Disabled,
}

impl Default for TelemetryBackend {
    fn default() -> Self {
        if cfg!(feature = "stream") {
            TelemetryBackend::Stream
        } else if cfg!(feature = "store") {
            TelemetryBackend::Store
        } else {
            TelemetryBackend::Disabled
        }
    }
}

impl FromStr for TelemetryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "tcp" | "socket" => Ok(TelemetryBackend::Stream),
            "store" | "sqlite" | "db" => Ok(TelemetryBackend::Store),
            "memory" => Ok(TelemetryBackend::Memory),
            "none" | "off" | "disabled" => Ok(TelemetryBackend::Disabled),
            _ => Err(ConfigError::InvalidValue {
                key: "VMI_TELEMETRY",
                value: s.to_owned(),
            }),
        }
    }
}

/// A configuration value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The value of an environment variable is not valid for its key.
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value '{}' for {}", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Telemetry backend, fixed for the lifetime of the layer context.
    pub backend: TelemetryBackend,

    /// Address the stream backend connects to (default: 127.0.0.1:2104)
    pub endpoint: SocketAddr,

    /// Database file for the store backend. `None` picks a timestamped file
    /// under the system temp directory; `":memory:"` keeps it in memory.
    pub database_path: Option<PathBuf>,

    /// Emit a memory snapshot every N presented frames (0 = never)
    pub snapshot_interval: u64,

    /// Strict mode applied when the context is created
    pub strict: StrictMode,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            backend: TelemetryBackend::default(),
            endpoint: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_STREAM_PORT)),
            database_path: None,
            snapshot_interval: 60,
            strict: StrictMode::Warn,
        }
    }
}

impl LayerConfig {
    /// Config for tests and embedders: events stay in process.
    pub fn in_memory() -> Self {
        Self {
            backend: TelemetryBackend::Memory,
            snapshot_interval: 0,
            ..Self::default()
        }
    }

    /// Read the configuration from `VMI_*` environment variables.
    ///
    /// Unparseable values are reported as VMI901 and left at their default.
    /// `VMI_TELEMETRY=memory` is rejected the same way.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LayerConfig::from_env`], with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("VMI_TELEMETRY") {
            match value.parse() {
                Ok(TelemetryBackend::Memory) => report_invalid(&ConfigError::InvalidValue {
                    key: "VMI_TELEMETRY",
                    value,
                }),
                Ok(backend) => config.backend = backend,
                Err(err) => report_invalid(&err),
            }
        }

        if let Some(value) = lookup("VMI_ENDPOINT") {
            match value.trim().parse() {
                Ok(endpoint) => config.endpoint = endpoint,
                Err(_) => report_invalid(&ConfigError::InvalidValue {
                    key: "VMI_ENDPOINT",
                    value,
                }),
            }
        }

        if let Some(value) = lookup("VMI_DATABASE") {
            if !value.trim().is_empty() {
                config.database_path = Some(PathBuf::from(value.trim()));
            }
        }

        if let Some(value) = lookup("VMI_SNAPSHOT_INTERVAL") {
            match value.trim().parse() {
                Ok(interval) => config.snapshot_interval = interval,
                Err(_) => report_invalid(&ConfigError::InvalidValue {
                    key: "VMI_SNAPSHOT_INTERVAL",
                    value,
                }),
            }
        }

        if let Some(value) = lookup("VMI_STRICT") {
            match StrictMode::parse(&value) {
                Some(mode) => config.strict = mode,
                None => report_invalid(&ConfigError::InvalidValue {
                    key: "VMI_STRICT",
                    value,
                }),
            }
        }

        config
    }

    /// Path the store backend opens.
    pub fn resolved_database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => std::env::temp_dir()
                .join("vkmem-inspector")
                .join(format!("{}.vmi", timestamp_micros())),
        }
    }

    /// Builder pattern: set the telemetry backend.
    pub fn with_backend(mut self, backend: TelemetryBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Builder pattern: set the stream endpoint.
    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Builder pattern: set the database path.
    pub fn with_database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Builder pattern: set the snapshot interval in frames.
    pub fn with_snapshot_interval(mut self, frames: u64) -> Self {
        self.snapshot_interval = frames;
        self
    }

    /// Builder pattern: set strict mode.
    pub fn with_strict(mut self, strict: StrictMode) -> Self {
        self.strict = strict;
        self
    }
}

fn report_invalid(err: &ConfigError) {
    diagnostics::emit_with_context(&VMI901, &err.to_string());
}
