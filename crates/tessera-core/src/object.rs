//! Shared object substrate
//!
//! Every engine entity (matrices, vectors, scalars, staging buffers,
//! expressions) embeds an [`ObjectMeta`]: a process-unique [`ObjectId`], an
//! optional debug label and the id of the [`Context`] that created it.
//!
//! Objects are never copied, only shared through [`Ref`] (an `Arc`). The
//! dependency analysis compares objects by [`ObjectId`], i.e. by reference
//! identity and never by value.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::LibraryConfig;
use crate::error::{TesseraError, TesseraResult};

/// Shared handle to an engine object
pub type Ref<T> = Arc<T>;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an engine object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId(pub u64);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of the library context that owns an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Identity, label and owning context shared by every object
#[derive(Debug)]
pub struct ObjectMeta {
    id: ObjectId,
    context: ContextId,
    label: RwLock<Option<String>>,
}

impl ObjectMeta {
    pub fn new(context: &Context) -> Self {
        Self {
            id: ObjectId::next(),
            context: context.id(),
            label: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write() = Some(label.into());
    }
}

/// Common behaviour of all engine objects
pub trait Object {
    fn meta(&self) -> &ObjectMeta;

    fn id(&self) -> ObjectId {
        self.meta().id()
    }

    fn context_id(&self) -> ContextId {
        self.meta().context()
    }

    fn label(&self) -> Option<String> {
        self.meta().label()
    }

    fn set_label(&self, label: &str) {
        self.meta().set_label(label)
    }

    /// Label if set, otherwise the object id
    fn debug_name(&self) -> String {
        self.label().unwrap_or_else(|| self.id().to_string())
    }
}

/// Explicit library context
///
/// Carries the configuration objects are created under (notably the block
/// size of every storage). There is no hidden global; callers thread the
/// context through factory calls.
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    config: LibraryConfig,
}

impl Context {
    /// Create a context from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is inconsistent.
    pub fn new(config: LibraryConfig) -> TesseraResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            config,
        }))
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Check that `object` was created under this context
    pub fn check_owned(&self, object: &dyn Object) -> TesseraResult<()> {
        if object.context_id() != self.id {
            return Err(TesseraError::invalid_argument(format!(
                "object {} belongs to another library context",
                object.debug_name()
            )));
        }
        Ok(())
    }
}
