//! Algorithm registry and backend selection
//!
//! Each node is lowered by a [`NodeProcessor`] registered under an
//! [`AlgorithmKey`] of operation kind, storage format and backend. Selection
//! prefers the accelerator backend when one is available and the node's
//! descriptor allows it, and falls back to the host otherwise. Adding a
//! backend means registering more processors; nothing else changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tessera_core::{Descriptor, Format, TesseraError, TesseraResult};

use crate::node::{ExpressionNode, OpKind};
use crate::task::TaskBuilder;

/// Execution backend of an algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backend {
    Cpu,
    Accelerator,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
            Backend::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Registry key of an algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgorithmKey {
    pub kind: OpKind,
    pub format: Format,
    pub backend: Backend,
}

impl AlgorithmKey {
    pub fn new(kind: OpKind, format: Format, backend: Backend) -> Self {
        Self { kind, format, backend }
    }
}

/// Lowers a node into tasks
pub trait NodeProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this processor can handle `node`; among the processors of a
    /// key the most recently registered accepting one wins
    fn select(&self, _node: &ExpressionNode) -> bool {
        true
    }

    /// Emit the node's tasks
    ///
    /// # Errors
    ///
    /// Argument or state errors that can only be detected at lowering time.
    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()>;
}

impl fmt::Debug for dyn NodeProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeProcessor({})", self.name())
    }
}

/// Processor chosen for a node
#[derive(Clone)]
pub struct Selection {
    pub backend: Backend,
    pub processor: Arc<dyn NodeProcessor>,
}

/// Table of processors by key
#[derive(Default)]
pub struct AlgorithmRegistry {
    table: HashMap<AlgorithmKey, Vec<Arc<dyn NodeProcessor>>>,
}

impl AlgorithmRegistry {
    /// Empty registry, every lookup fails with `NotImplemented`
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in COO processors for the host and, when
    /// `accelerated`, for the accelerator backend
    pub fn with_builtin(accelerated: bool) -> Self {
        let mut registry = Self::new();
        crate::processors::register_builtin(&mut registry, Backend::Cpu);
        if accelerated {
            crate::processors::register_builtin(&mut registry, Backend::Accelerator);
        }
        registry
    }

    /// Add a processor ahead of those already registered for `key`
    ///
    /// A processor whose `select` accepts every node therefore overrides the
    /// earlier ones, built-ins included.
    pub fn register(&mut self, key: AlgorithmKey, processor: Arc<dyn NodeProcessor>) {
        tracing::debug!(kind = %key.kind, backend = %key.backend, processor = processor.name(), "register algorithm");
        self.table.entry(key).or_default().insert(0, processor);
    }

    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn find(&self, node: &ExpressionNode, backend: Backend) -> Option<Arc<dyn NodeProcessor>> {
        let key = AlgorithmKey::new(node.kind(), node.format(), backend);
        self.table
            .get(&key)?
            .iter()
            .find(|p| p.select(node))
            .map(Arc::clone)
    }

    /// Pick the processor for `node`
    ///
    /// # Errors
    ///
    /// `NoAcceleration` if the descriptor requires acceleration that cannot
    /// be provided, `NotImplemented` if no processor accepts the node.
    pub fn select(&self, node: &ExpressionNode, accelerator_available: bool) -> TesseraResult<Selection> {
        let desc: &Descriptor = node.descriptor();
        let try_accelerator = accelerator_available && !desc.force_no_acceleration;

        if try_accelerator {
            if let Some(processor) = self.find(node, Backend::Accelerator) {
                return Ok(Selection {
                    backend: Backend::Accelerator,
                    processor,
                });
            }
        }
        if desc.require_acceleration {
            return Err(TesseraError::no_acceleration(format!(
                "{node} requires acceleration but no accelerated algorithm is usable"
            )));
        }
        if try_accelerator {
            tracing::debug!(node = %node, "no accelerated algorithm, falling back to cpu");
        }

        self.find(node, Backend::Cpu)
            .map(|processor| Selection {
                backend: Backend::Cpu,
                processor,
            })
            .ok_or_else(|| {
                TesseraError::not_implemented(format!("no algorithm for {} in {:?} format", node.kind(), node.format()))
            })
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("algorithms", &self.len())
            .finish()
    }
}
