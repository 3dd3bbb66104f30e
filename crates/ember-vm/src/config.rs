use ember_asm::AssembleOptions;

/// Tunables for a [`crate::Runtime`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Ops a fiber may run before it yields to the next ready fiber of its context.
    pub slice_fuel: u64,
    /// Frames a single fiber may hold; a call past this raises `IllegalState`.
    pub max_call_depth: usize,
    /// How method code is assembled when the runtime loads a module.
    pub assemble: AssembleOptions,
    /// Whether [`crate::VmMetrics`] are collected.
    pub metrics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            slice_fuel: 10_000,
            max_call_depth: 1_024,
            assemble: AssembleOptions::default(),
            metrics: false,
        }
    }
}
