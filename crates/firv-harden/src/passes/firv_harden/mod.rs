//! Fault-injection resilience verification hardening.
//!
//! A function carrying the [`FnAttr::FirvHarden`] attribute is rewritten so
//! that its computation runs twice and the two return values are compared
//! bit-for-bit before the function returns:
//!
//! ```text
//! FirvPrologue -> StoreLoad -> originals... -> store Slot1 -> FirvInterlude
//! FirvInterlude -> clones...                -> store Slot2 -> FirvEpilogue.1
//! FirvEpilogue.1 -> equal ? FirvEpilogue.2 : FailBB
//! FirvEpilogue.2 -> equal ? ReturnBB       : FailBB
//! ReturnBB: ret Slot1
//! FailBB: trap; unreachable
//! ```
//!
//! The two epilogue checks are sequential so a single flipped branch cannot
//! skip the comparison. A mismatch traps instead of returning silently
//! corrupted data.

mod compare;
mod duplicate;

#[cfg(test)]
mod tests;

use once_cell::sync::Lazy;

use firv_core::diagnostics::report_warning;
use firv_core::ir::{BlockId, Builder, FnAttr, Function, Intrinsic, TermKind, Ty, Value};
use firv_core::Result;

use crate::error::pass_error;
use crate::pass::{FunctionPass, PassContext, PassId};
use crate::pass_ensure;

pub use duplicate::CLONE_SUFFIX;

use compare::{emit_slot_compare, is_hardenable_type};
use duplicate::{duplicate_cfg, DuplicatedCfg};

/// Process-wide identifier for this pass type; the only module-level state.
pub static FIRV_HARDEN_PASS_ID: Lazy<PassId> = Lazy::new(PassId::allocate);

/// Branch weights biasing layout toward the equal successor; the fail path
/// stays cold.
const COLD_FAIL_WEIGHTS: (u32, u32) = (1, 99999);

pub struct FirvHarden;

pub fn create_firv_harden_pass() -> Box<dyn FunctionPass> {
    Box::new(FirvHarden)
}

impl FunctionPass for FirvHarden {
    fn name(&self) -> &str {
        "firv-harden"
    }

    fn pass_id(&self) -> PassId {
        *FIRV_HARDEN_PASS_ID
    }

    fn run(&self, func: &mut Function, ctx: &PassContext) -> Result<bool> {
        run_on_function(func, ctx)
    }
}

struct Slots {
    slot1: Value,
    slot2: Value,
}

struct SretInfo {
    index: u32,
    pointee: Ty,
}

fn run_on_function(func: &mut Function, ctx: &PassContext) -> Result<bool> {
    if !func.has_attr(FnAttr::FirvHarden) {
        return Ok(false);
    }

    let sret = func.sret_param().and_then(|(index, param)| {
        param
            .sret
            .clone()
            .map(|pointee| SretInfo { index, pointee })
    });
    let effective_ty = match &sret {
        Some(info) => {
            tracing::debug!(
                function = %func.name,
                sret_arg = info.index,
                ty = %info.pointee,
                "struct-return argument redirects hardening to its buffer"
            );
            info.pointee.clone()
        }
        None => func.return_type.clone(),
    };

    // The gate must run before any mutation: a declined function is handed
    // back untouched. It shares its predicate with the comparator, so every
    // accepted type can be compared all the way down.
    if !is_hardenable_type(&effective_ty) {
        report_warning(format!(
            "declining FIRV hardening for `{}`: unsupported return type {}",
            func.name, effective_ty
        ));
        return Ok(false);
    }
    tracing::debug!(function = %func.name, ty = %effective_ty, "applying FIRV hardening");
    pass_ensure!(
        !func.blocks.is_empty(),
        format!("cannot harden `{}`: function has no body", func.name)
    );

    store_args_and_load(func)?;

    let dup = duplicate_cfg(func)?;

    // Entry at this point is StoreLoad; the prologue is inserted in front of
    // it below.
    let store_load_bb = func
        .entry()
        .ok_or_else(|| pass_error(format!("function `{}` has no entry block", func.name)))?;

    let slots = create_prologue(func, &effective_ty, store_load_bb)?;
    let return_bb = create_return_bb(func, &slots, &effective_ty, sret.is_some())?;
    let fail_bb = create_fail_bb(func)?;
    let interlude_bb = create_interlude(func, &dup, store_load_bb)?;
    let epilogue_bb = create_epilogue(func, &slots, &effective_ty, return_bb, fail_bb)?;

    replace_returns(
        func,
        &dup.original_blocks,
        &slots.slot1,
        interlude_bb,
        sret.as_ref(),
        ctx,
    )?;
    replace_returns(
        func,
        &dup.cloned_blocks,
        &slots.slot2,
        epilogue_bb,
        sret.as_ref(),
        ctx,
    )?;

    Ok(true)
}

/// Insert the StoreLoad block as the new entry: every argument is spilled to
/// a fresh stack slot and reloaded, and all uses outside StoreLoad are
/// rewritten to the reload. Both copies of the body then observe their
/// inputs through committed memory rather than argument registers.
fn store_args_and_load(func: &mut Function) -> Result<()> {
    let old_entry = func
        .entry()
        .ok_or_else(|| pass_error(format!("function `{}` has no entry block", func.name)))?;
    let store_load = func.add_entry_block("StoreLoad");

    let params: Vec<(u32, Ty, String)> = func
        .params
        .iter()
        .enumerate()
        .map(|(idx, param)| {
            let name = param
                .name
                .clone()
                .unwrap_or_else(|| format!("arg{}", idx));
            (idx as u32, param.ty.clone(), name)
        })
        .collect();

    let mut reloads = Vec::with_capacity(params.len());
    {
        let mut b = Builder::at_end(func, store_load)?;
        for (index, ty, name) in &params {
            tracing::debug!(arg = %name, ty = %ty, "rematerializing argument through memory");
            let slot = b.alloca(ty.clone(), &format!("{}.st", name))?;
            b.volatile_store(Value::Arg(*index), slot.clone())?;
            let reload = b.volatile_load(ty.clone(), slot, name)?;
            reloads.push((*index, reload));
        }
        b.br(old_entry)?;
    }
    for (index, reload) in reloads {
        func.replace_arg_uses_outside(index, &reload, store_load);
    }

    Ok(())
}

/// The new function entry: allocates the two return-value slots, then falls
/// through to StoreLoad.
fn create_prologue(func: &mut Function, effective_ty: &Ty, store_load: BlockId) -> Result<Slots> {
    let prologue = func.add_entry_block("FirvPrologue");
    let mut b = Builder::at_end(func, prologue)?;
    let slot1 = b.alloca(effective_ty.clone(), "FirvSlot1")?;
    let slot2 = b.alloca(effective_ty.clone(), "FirvSlot2")?;
    b.br(store_load)?;
    Ok(Slots { slot1, slot2 })
}

/// The unique function exit. RetVal2 is deliberately unused: the volatile
/// load of the second slot must survive dead-code elimination.
fn create_return_bb(
    func: &mut Function,
    slots: &Slots,
    effective_ty: &Ty,
    is_sret: bool,
) -> Result<BlockId> {
    let return_bb = func.add_block(Some("ReturnBB".into()));
    let mut b = Builder::at_end(func, return_bb)?;
    let ret_val1 = b.volatile_load(effective_ty.clone(), slots.slot1.clone(), "RetVal1")?;
    b.volatile_load(effective_ty.clone(), slots.slot2.clone(), "RetVal2")?;
    if is_sret {
        b.ret_void()?;
    } else {
        b.ret(ret_val1)?;
    }
    Ok(return_bb)
}

/// Both failed checks funnel into this single block.
fn create_fail_bb(func: &mut Function) -> Result<BlockId> {
    let fail_bb = func.add_block(Some("FailBB".into()));
    let mut b = Builder::at_end(func, fail_bb)?;
    b.call_intrinsic(Intrinsic::Trap, Vec::new())?;
    b.unreachable()?;
    Ok(fail_bb)
}

/// Bridge from the first copy into the second: an unconditional branch to
/// the clone of the entry block.
fn create_interlude(
    func: &mut Function,
    dup: &DuplicatedCfg,
    store_load: BlockId,
) -> Result<BlockId> {
    let first_clone = *dup
        .block_map
        .get(&store_load)
        .ok_or_else(|| pass_error(format!("missing clone for entry block bb{}", store_load)))?;
    let interlude = func.add_block(Some("FirvInterlude".into()));
    let mut b = Builder::at_end(func, interlude)?;
    b.br(first_clone)?;
    Ok(interlude)
}

/// Two sequential slot checks guarding the return.
fn create_epilogue(
    func: &mut Function,
    slots: &Slots,
    effective_ty: &Ty,
    return_bb: BlockId,
    fail_bb: BlockId,
) -> Result<BlockId> {
    let epilogue1 = func.add_block(Some("FirvEpilogue.1".into()));
    let epilogue2 = func.add_block(Some("FirvEpilogue.2".into()));

    emit_slot_check(func, slots, effective_ty, epilogue1, epilogue2, fail_bb)?;
    emit_slot_check(func, slots, effective_ty, epilogue2, return_bb, fail_bb)?;

    Ok(epilogue1)
}

fn emit_slot_check(
    func: &mut Function,
    slots: &Slots,
    effective_ty: &Ty,
    this_bb: BlockId,
    next_bb: BlockId,
    fail_bb: BlockId,
) -> Result<()> {
    let mut b = Builder::at_end(func, this_bb)?;
    let equal = emit_slot_compare(&mut b, effective_ty, slots.slot1.clone(), slots.slot2.clone())?;
    b.cond_br(equal, next_bb, fail_bb, Some(COLD_FAIL_WEIGHTS))?;
    Ok(())
}

/// Rewrite every return terminator among `blocks` into a slot store (or an
/// sret memcpy of the output buffer) followed by a branch to `next`. The
/// replacement branch inherits the return's debug location.
fn replace_returns(
    func: &mut Function,
    blocks: &[BlockId],
    slot: &Value,
    next: BlockId,
    sret: Option<&SretInfo>,
    ctx: &PassContext,
) -> Result<()> {
    let func_name = func.name.clone();
    for &bb in blocks {
        let Some(block) = func.block(bb) else {
            continue;
        };
        let TermKind::Return(ret_val) = block.terminator.kind.clone() else {
            continue;
        };
        let debug_loc = block.terminator.debug_loc.clone();

        let mut b = Builder::at_end(func, bb)?;
        b.set_debug_loc(debug_loc);
        match sret {
            Some(info) => {
                let bytes = ctx.target.store_size(&info.pointee);
                b.memcpy(slot.clone(), Value::Arg(info.index), bytes, true)?;
            }
            None => {
                let value = ret_val.ok_or_else(|| {
                    pass_error(format!(
                        "bare return in hardened non-void function `{}`",
                        func_name
                    ))
                })?;
                b.volatile_store(value, slot.clone())?;
            }
        }
        b.br(next)?;
    }
    Ok(())
}
