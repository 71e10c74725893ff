//! Process-wide `tracing` setup.
//!
//! Output is JSON by default; `LOG_HUMAN=true` switches to the human-readable
//! formatter. `LOG_LEVEL` takes an `EnvFilter` directive such as `debug` or
//! `info,courier_service=trace`.

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";
pub const LOG_HUMAN_VAR: &str = "LOG_HUMAN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive.
    pub level: String,
    /// Human-readable output instead of JSON.
    pub human: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            human: false,
        }
    }
}

impl LogConfig {
    /// Reads `LOG_LEVEL` and `LOG_HUMAN` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(LOG_LEVEL_VAR).ok(),
            std::env::var(LOG_HUMAN_VAR).ok(),
        )
    }

    fn from_vars(level: Option<String>, human: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: level
                .filter(|level| !level.trim().is_empty())
                .unwrap_or(defaults.level),
            human: human.is_some_and(|value| value == "true"),
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if `level` is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log level {:?}", config.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.human {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
