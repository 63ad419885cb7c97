// CFG duplication: clone every block of the function, remap operands inside
// the clones, and rewire cloned branches so the second copy stays inside
// itself.

use firv_core::ir::clone::{
    clone_basic_block, remap_instruction, remap_terminator_values, BlockMap, ValueMap,
};
use firv_core::ir::{BlockId, Function};
use firv_core::Result;

use crate::error::pass_error;

/// Label suffix for cloned blocks.
pub const CLONE_SUFFIX: &str = ".cl";

pub struct DuplicatedCfg {
    /// The function's blocks at duplication time, in iteration order.
    pub original_blocks: Vec<BlockId>,
    /// Their clones, in the same order.
    pub cloned_blocks: Vec<BlockId>,
    pub block_map: BlockMap,
}

pub fn duplicate_cfg(func: &mut Function) -> Result<DuplicatedCfg> {
    let original_blocks = func.block_ids();

    let mut vmap = ValueMap::new();
    let mut block_map = BlockMap::new();
    let mut cloned_blocks = Vec::with_capacity(original_blocks.len());
    for &bb in &original_blocks {
        let clone = clone_basic_block(func, bb, CLONE_SUFFIX, &mut vmap)?;
        cloned_blocks.push(clone);
        block_map.insert(bb, clone);
    }

    for &clone in &cloned_blocks {
        let block = func
            .block_mut(clone)
            .ok_or_else(|| pass_error(format!("cloned block bb{} vanished", clone)))?;
        for inst in &mut block.instructions {
            remap_instruction(inst, &vmap, &block_map);
        }
        remap_terminator_values(&mut block.terminator, &vmap);
        for succ in block.terminator.kind.successors_mut() {
            match block_map.get(succ) {
                Some(&mapped) => *succ = mapped,
                None => {
                    // Every block was cloned above, so a missing mapping is
                    // a programming error. The successor is left untouched.
                    let _ = pass_error(format!("missing block mapping for bb{}", succ));
                }
            }
        }
    }

    Ok(DuplicatedCfg {
        original_blocks,
        cloned_blocks,
        block_map,
    })
}
