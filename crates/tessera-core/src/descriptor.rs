//! Per-operation execution descriptor
//!
//! A [`Descriptor`] is an immutable bag of hints attached to an expression
//! node. It is built once with the `with_*` methods and then shared by
//! reference between the node, the dispatcher and the emitted tasks.

/// Preferred traversal direction for products over sparse frontiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TraversalDirection {
    /// Scatter from the input entries (row-driven)
    #[default]
    Push,
    /// Gather into the output entries (column-driven)
    Pull,
}

/// Execution hints for a single operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    /// Input staging data is already sorted by (row, col)
    pub values_sorted: bool,
    /// Input staging data contains no duplicate coordinates
    pub no_duplicates: bool,
    /// Interpret the mask as its structural complement
    pub mask_complement: bool,
    /// Accumulate into the previous content of the result
    pub accum_result: bool,
    /// Log elapsed time of every task of the node
    pub profile_time: bool,
    /// Never select an accelerator algorithm
    pub force_no_acceleration: bool,
    /// Fail with `NoAcceleration` unless an accelerator algorithm runs the node
    pub require_acceleration: bool,
    /// Allow algorithms to stop once the result is known
    pub early_exit: bool,
    /// Traversal direction hint
    pub direction: TraversalDirection,
    /// Pin every device task of the node to this device
    pub device_id: Option<usize>,
}

impl Descriptor {
    /// Create a descriptor with all hints off
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values_sorted(mut self, on: bool) -> Self {
        self.values_sorted = on;
        self
    }

    pub fn with_no_duplicates(mut self, on: bool) -> Self {
        self.no_duplicates = on;
        self
    }

    pub fn with_mask_complement(mut self, on: bool) -> Self {
        self.mask_complement = on;
        self
    }

    pub fn with_accum_result(mut self, on: bool) -> Self {
        self.accum_result = on;
        self
    }

    pub fn with_profile_time(mut self, on: bool) -> Self {
        self.profile_time = on;
        self
    }

    pub fn with_force_no_acceleration(mut self, on: bool) -> Self {
        self.force_no_acceleration = on;
        self
    }

    pub fn with_require_acceleration(mut self, on: bool) -> Self {
        self.require_acceleration = on;
        self
    }

    pub fn with_early_exit(mut self, on: bool) -> Self {
        self.early_exit = on;
        self
    }

    pub fn with_direction(mut self, direction: TraversalDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Pin device work to `device`
    pub fn with_device_id(mut self, device: usize) -> Self {
        self.device_id = Some(device);
        self
    }
}
