//! Library instance
//!
//! A [`Library`] owns everything an expression needs to run: the object
//! [`Context`], the host [`Executor`], the optional accelerator with its
//! device manager, and the algorithm registry. It is cheap to clone and is
//! shared by every expression created from it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{Context, LibraryConfig, Matrix, Ref, Scalar, TesseraResult, Type, Vector};

use crate::accelerator::{Accelerator, DeviceManager, SimulatedAccelerator};
use crate::dispatch::{AlgorithmKey, AlgorithmRegistry, NodeProcessor};
use crate::executor::Executor;
use crate::expression::Expression;

struct LibraryInner {
    context: Arc<Context>,
    executor: Executor,
    accelerator: Option<Arc<dyn Accelerator>>,
    devices: DeviceManager,
    registry: RwLock<AlgorithmRegistry>,
}

/// Shared handle to a library instance
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    /// Start a library with the built-in algorithms
    ///
    /// When `config.accelerator.enabled` is set a [`SimulatedAccelerator`] is
    /// started and accelerator algorithms are registered next to the host
    /// ones.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an inconsistent configuration, `Generic` if
    /// threads cannot be spawned.
    pub fn new(config: LibraryConfig) -> TesseraResult<Self> {
        let accelerator: Option<Arc<dyn Accelerator>> = if config.accelerator.enabled {
            config.validate()?;
            Some(Arc::new(SimulatedAccelerator::from_config(&config.accelerator)?))
        } else {
            None
        };
        let registry = AlgorithmRegistry::with_builtin(accelerator.is_some());
        Self::with_parts(config, registry, accelerator)
    }

    /// Library configured from `TESSERA_*` environment variables
    pub fn from_env() -> TesseraResult<Self> {
        Self::new(LibraryConfig::from_env())
    }

    /// Host-only library with a caller-provided registry
    pub fn with_registry(config: LibraryConfig, registry: AlgorithmRegistry) -> TesseraResult<Self> {
        Self::with_parts(config, registry, None)
    }

    /// Library assembled from explicit parts
    pub fn with_parts(
        config: LibraryConfig,
        registry: AlgorithmRegistry,
        accelerator: Option<Arc<dyn Accelerator>>,
    ) -> TesseraResult<Self> {
        let context = Context::new(config)?;
        let executor = Executor::new(context.config().resolved_worker_threads())?;
        let devices = DeviceManager::new(accelerator.as_ref().map_or(0, |a| a.device_count()));

        tracing::info!(
            block_size = context.block_size(),
            workers = executor.worker_count(),
            accelerator = accelerator.as_ref().map(|a| a.name()),
            devices = devices.device_count(),
            algorithms = registry.len(),
            "library initialized"
        );

        Ok(Self {
            inner: Arc::new(LibraryInner {
                context,
                executor,
                accelerator,
                devices,
                registry: RwLock::new(registry),
            }),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    pub fn config(&self) -> &LibraryConfig {
        self.inner.context.config()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.executor.worker_count()
    }

    pub fn has_accelerator(&self) -> bool {
        self.inner.accelerator.is_some()
    }

    pub fn accelerator(&self) -> Option<&Arc<dyn Accelerator>> {
        self.inner.accelerator.as_ref()
    }

    /// Register an algorithm ahead of existing ones for `key`, overriding
    /// them; affects expressions submitted afterwards
    pub fn register_processor(&self, key: AlgorithmKey, processor: Arc<dyn NodeProcessor>) {
        self.inner.registry.write().register(key, processor);
    }

    pub(crate) fn registry(&self) -> &RwLock<AlgorithmRegistry> {
        &self.inner.registry
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub(crate) fn devices(&self) -> &DeviceManager {
        &self.inner.devices
    }

    pub fn make_matrix(&self, nrows: usize, ncols: usize, ty: Type) -> TesseraResult<Ref<Matrix>> {
        Matrix::make(nrows, ncols, ty, &self.inner.context)
    }

    pub fn make_vector(&self, nrows: usize, ty: Type) -> TesseraResult<Ref<Vector>> {
        Vector::make(nrows, ty, &self.inner.context)
    }

    pub fn make_scalar(&self, ty: Type) -> Ref<Scalar> {
        Scalar::make(ty, &self.inner.context)
    }

    /// New empty expression bound to this library
    pub fn make_expression(&self) -> Expression {
        Expression::new(self.clone())
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("context", &self.inner.context.id())
            .field("workers", &self.worker_count())
            .field("accelerator", &self.inner.accelerator)
            .finish_non_exhaustive()
    }
}
