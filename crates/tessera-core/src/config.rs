//! Library configuration
//!
//! [`LibraryConfig`] is consumed once when a library context is created.
//! Defaults can be overridden programmatically with the `with_*` builders or
//! from the environment with [`LibraryConfig::from_env`].
//!
//! # Environment Variables
//!
//! - `TESSERA_BLOCK_SIZE`: tile edge length of every storage
//! - `TESSERA_WORKERS`: executor worker threads (`0` = available parallelism)
//! - `TESSERA_ACCELERATOR`: `1` enables the accelerator backend
//! - `TESSERA_DEVICES`: number of accelerator devices
//! - `TESSERA_QUEUES`: queues per accelerator device

use crate::descriptor::Descriptor;
use crate::error::{TesseraError, TesseraResult};

/// Default tile edge length
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Accelerator backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcceleratorConfig {
    /// Register accelerator algorithms and start device queues
    pub enabled: bool,
    /// Number of devices to expose
    pub device_count: usize,
    /// Queues per device
    pub queues_per_device: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_count: 1,
            queues_per_device: 1,
        }
    }
}

/// Configuration of one library context
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryConfig {
    /// Tile edge length of every storage created under the context
    pub block_size: usize,
    /// Executor worker threads, `0` selects the available parallelism
    pub worker_threads: usize,
    /// Accelerator backend settings
    pub accelerator: AcceleratorConfig,
    /// Descriptor applied to nodes created without one
    pub default_descriptor: Descriptor,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            worker_threads: 0,
            accelerator: AcceleratorConfig::default(),
            default_descriptor: Descriptor::default(),
        }
    }
}

impl LibraryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `TESSERA_*` environment variables.
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bs) = env_usize("TESSERA_BLOCK_SIZE") {
            config.block_size = bs;
        }
        if let Some(workers) = env_usize("TESSERA_WORKERS") {
            config.worker_threads = workers;
        }
        if let Some(flag) = env_usize("TESSERA_ACCELERATOR") {
            config.accelerator.enabled = flag != 0;
        }
        if let Some(devices) = env_usize("TESSERA_DEVICES") {
            config.accelerator.device_count = devices;
        }
        if let Some(queues) = env_usize("TESSERA_QUEUES") {
            config.accelerator.queues_per_device = queues;
        }
        config
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Enable the accelerator backend with `devices` devices of `queues` queues each
    pub fn with_accelerator(mut self, devices: usize, queues: usize) -> Self {
        self.accelerator = AcceleratorConfig {
            enabled: true,
            device_count: devices,
            queues_per_device: queues,
        };
        self
    }

    pub fn with_default_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.default_descriptor = descriptor;
        self
    }

    /// Number of worker threads after resolving `0`
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero block size, or an enabled accelerator
    /// without devices or queues.
    pub fn validate(&self) -> TesseraResult<()> {
        if self.block_size == 0 {
            return Err(TesseraError::invalid_argument("block size must be positive"));
        }
        if self.block_size > u32::MAX as usize {
            return Err(TesseraError::invalid_argument(
                "block size must fit in 32-bit local indices",
            ));
        }
        if self.accelerator.enabled
            && (self.accelerator.device_count == 0 || self.accelerator.queues_per_device == 0)
        {
            return Err(TesseraError::invalid_argument(
                "accelerator needs at least one device and one queue",
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
