// Function-pass interface: the contract between the host pipeline and the
// passes in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};

use firv_core::ir::{layout, Function, Ty};
use firv_core::Result;

/// Process-wide identifier for a pass type. Each pass type allocates exactly
/// one of these into a static token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(usize);

impl PassId {
    pub fn allocate() -> PassId {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        PassId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Analyses left intact by a successful run. A pass that rewrites the CFG
/// returns `None`: dominators, loop info and anything derived from block
/// structure must be recomputed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    All,
    None,
}

/// Target-configuration analysis. Owns the data-layout queries passes need;
/// function passes receive it through [`PassContext`].
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub pointer_bytes: u32,
}

impl TargetConfig {
    pub fn host() -> Self {
        Self { pointer_bytes: 8 }
    }

    /// Store size in bytes of a value of `ty`, the amount a memcpy of the
    /// value moves.
    pub fn store_size(&self, ty: &Ty) -> u64 {
        layout::size_of(ty)
    }
}

/// Per-invocation context handed to a function pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub target: TargetConfig,
}

impl PassContext {
    pub fn new(target: TargetConfig) -> Self {
        Self { target }
    }

    pub fn host() -> Self {
        Self::new(TargetConfig::host())
    }
}

pub trait FunctionPass {
    fn name(&self) -> &str;

    fn pass_id(&self) -> PassId;

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::None
    }

    /// Run on one function, mutating it in place. Returns true iff the
    /// function was modified.
    fn run(&self, func: &mut Function, ctx: &PassContext) -> Result<bool>;
}
