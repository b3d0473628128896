//! Structured logging for expression evaluation
//!
//! The engine logs through `tracing` unconditionally; installing a
//! subscriber is left to the application. With the `tracing` feature,
//! [`init_tracing`] installs a `tracing-subscriber` formatter.
//!
//! # Targets
//!
//! - `tessera_exec`, `tessera_core`, `tessera_kernels`: library, expression
//!   and run lifecycle, kernel decisions
//! - `tessera::profile`: per-task timings of nodes whose descriptor sets
//!   `profile_time`, and a summary of every finished run
//!
//! # Environment Variables
//!
//! - `TESSERA_LOG`: engine log level (default `info`)
//! - `TESSERA_LOG_JSON`: `1` selects JSON lines
//! - `TESSERA_PROFILE`: `1` forces profile events on

use anyhow::Result;
use tessera_core::LibraryConfig;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PROFILE_TARGET: &str = "tessera::profile";

/// Subscriber settings for the engine's log targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level of the engine crates, e.g. `debug`
    pub level: String,
    /// Emit `tessera::profile` events
    pub profile: bool,
    /// One JSON object per event instead of compact text
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            profile: false,
            json: false,
        }
    }
}

impl TracingConfig {
    /// Settings matching `config`: profiling follows the default descriptor,
    /// overridable from the environment
    pub fn for_library(config: &LibraryConfig) -> Self {
        let mut tracing = Self {
            profile: config.default_descriptor.profile_time,
            ..Self::default()
        };
        if let Ok(level) = std::env::var("TESSERA_LOG") {
            tracing.level = level;
        }
        tracing.json |= env_flag("TESSERA_LOG_JSON");
        tracing.profile |= env_flag("TESSERA_PROFILE");
        tracing
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_profile(mut self, on: bool) -> Self {
        self.profile = on;
        self
    }

    pub fn with_json(mut self, on: bool) -> Self {
        self.json = on;
        self
    }

    /// Filter directive covering the engine crates and the profile target
    pub fn directives(&self) -> String {
        let profile = if self.profile { "info" } else { "off" };
        format!(
            "warn,tessera_core={level},tessera_kernels={level},tessera_exec={level},{PROFILE_TARGET}={profile}",
            level = self.level
        )
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Install a global subscriber
///
/// Worker and accelerator threads are named, so events carry the thread
/// name.
///
/// # Errors
///
/// Fails on an invalid level or when a global subscriber is already
/// installed.
#[cfg(feature = "tracing")]
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directives())?;
    let layer = fmt::layer().with_target(true).with_thread_names(true);
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(layer.json()).try_init()?;
    } else {
        registry.with(layer.compact()).try_init()?;
    }
    Ok(())
}

/// No subscriber without the `tracing` feature
#[cfg(not(feature = "tracing"))]
pub fn init_tracing(_config: TracingConfig) -> Result<()> {
    Ok(())
}

/// Elapsed time of one task
pub fn record_task_time(task: &str, elapsed_us: u64, ok: bool) {
    tracing::info!(target: PROFILE_TARGET, task, elapsed_us, ok, "task timing");
}

/// Summary of a finished run
pub fn record_run(expression: &str, tasks: usize, elapsed_us: u64, failed: bool) {
    tracing::info!(target: PROFILE_TARGET, expression, tasks, elapsed_us, failed, "run timing");
}
