use std::collections::HashMap;

use crate::error::{Error, Result};

use super::{BlockId, Function, InstKind, Instruction, RegId, Terminator, Value};

/// Injective map from original registers to their clones. Operands defined
/// outside the cloned region never appear as keys and are left untouched by
/// remapping (the ignore-missing-locals policy).
pub type ValueMap = HashMap<RegId, Value>;

/// Original block to cloned block. Dual of the value map, restricted to
/// blocks; used to rewire cloned terminators and phi edges.
pub type BlockMap = HashMap<BlockId, BlockId>;

/// Clone one basic block, appending the copy to the function. Every cloned
/// instruction gets a fresh register recorded in `vmap`; operands and the
/// terminator are copied verbatim and still refer to the originals until the
/// caller remaps them. Debug locations are preserved.
pub fn clone_basic_block(
    func: &mut Function,
    source: BlockId,
    suffix: &str,
    vmap: &mut ValueMap,
) -> Result<BlockId> {
    let src = func
        .block(source)
        .ok_or_else(|| Error::malformed_ir(format!("cannot clone missing block {}", source)))?
        .clone();

    let label = src
        .label
        .as_ref()
        .map(|label| format!("{}{}", label, suffix))
        .or_else(|| Some(format!("bb{}{}", source, suffix)));
    let clone_id = func.add_block(label);

    let mut cloned_instructions = Vec::with_capacity(src.instructions.len());
    for inst in &src.instructions {
        let id = func.fresh_reg();
        vmap.insert(inst.id, Value::Reg(id));
        cloned_instructions.push(Instruction {
            id,
            kind: inst.kind.clone(),
            ty: inst.ty.clone(),
            name: inst.name.clone(),
            debug_loc: inst.debug_loc.clone(),
        });
    }

    let block = func
        .block_mut(clone_id)
        .ok_or_else(|| Error::malformed_ir(format!("freshly cloned block {} vanished", clone_id)))?;
    block.instructions = cloned_instructions;
    block.terminator = src.terminator.clone();

    Ok(clone_id)
}

/// Rewrite a register operand through the value map; anything absent from
/// the map (arguments, constants, values defined outside the cloned region)
/// stays as-is.
pub fn remap_value(vmap: &ValueMap, value: &mut Value) {
    if let Value::Reg(reg) = value {
        if let Some(new) = vmap.get(reg) {
            *value = new.clone();
        }
    }
}

/// Remap every operand of a cloned instruction. Phi edges additionally remap
/// their incoming blocks through `bmap` when a mapping exists.
pub fn remap_instruction(inst: &mut Instruction, vmap: &ValueMap, bmap: &BlockMap) {
    for operand in inst.kind.values_mut() {
        remap_value(vmap, operand);
    }
    if let InstKind::Phi { incoming } = &mut inst.kind {
        for (_, block) in incoming {
            if let Some(clone) = bmap.get(block) {
                *block = *clone;
            }
        }
    }
}

/// Remap the value operands of a terminator (return values and branch
/// conditions). Successor rewiring is a separate concern handled by the
/// caller, which owns the error reporting for missing mappings.
pub fn remap_terminator_values(term: &mut Terminator, vmap: &ValueMap) {
    for operand in term.kind.values_mut() {
        remap_value(vmap, operand);
    }
}
