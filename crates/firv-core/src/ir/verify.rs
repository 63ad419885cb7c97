use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

use super::ty::Ty;
use super::{BlockId, Function, InstKind, RegId, TermKind, Value};

/// Structural well-formedness check: single entry, terminator legality,
/// unique definitions, definitions dominating uses, phi edges matching
/// predecessors, and return values agreeing with the signature.
///
/// Blocks unreachable from the entry are only checked structurally; SSA
/// dominance is meaningless for them.
pub fn verify_function(func: &Function) -> Result<()> {
    let err = |message: String| Error::verification(func.name.clone(), message);

    let Some(entry) = func.entry() else {
        return Err(err("function has no entry block".into()));
    };
    if func.block(entry).is_none() {
        return Err(err(format!("entry block {} does not exist", entry)));
    }

    let mut seen_blocks = HashSet::new();
    for bb in &func.blocks {
        if !seen_blocks.insert(bb.id) {
            return Err(err(format!("duplicate block id {}", bb.id)));
        }
    }
    for bb in &func.blocks {
        for succ in bb.terminator.kind.successors() {
            if func.block(succ).is_none() {
                return Err(err(format!(
                    "block {} branches to missing block {}",
                    bb.id, succ
                )));
            }
        }
    }

    // Unique register definitions across the whole function.
    let mut def_block: HashMap<RegId, BlockId> = HashMap::new();
    for bb in &func.blocks {
        for inst in &bb.instructions {
            if def_block.insert(inst.id, bb.id).is_some() {
                return Err(err(format!("register %{} defined more than once", inst.id)));
            }
        }
    }

    let reachable: HashSet<BlockId> = func.reachable_blocks().into_iter().collect();
    let preds = func.predecessors();
    let dominators = compute_dominators(func, entry, &reachable, &preds);

    for bb in &func.blocks {
        if !reachable.contains(&bb.id) {
            continue;
        }
        let dom = dominators
            .get(&bb.id)
            .ok_or_else(|| err(format!("no dominator set for block {}", bb.id)))?;
        let block_preds: HashSet<BlockId> = preds
            .get(&bb.id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();

        let mut defined_here: HashSet<RegId> = HashSet::new();
        let mut past_phis = false;
        for inst in &bb.instructions {
            match &inst.kind {
                InstKind::Phi { incoming } => {
                    if past_phis {
                        return Err(err(format!(
                            "phi %{} does not lead block {}",
                            inst.id, bb.id
                        )));
                    }
                    for (value, from) in incoming {
                        if !block_preds.contains(from) {
                            return Err(err(format!(
                                "phi %{} names {} which is not a predecessor of block {}",
                                inst.id, from, bb.id
                            )));
                        }
                        if let Value::Reg(reg) = value {
                            let Some(&def) = def_block.get(reg) else {
                                return Err(err(format!(
                                    "phi %{} uses undefined register %{}",
                                    inst.id, reg
                                )));
                            };
                            if reachable.contains(from) && !dominates(&dominators, def, *from) {
                                return Err(err(format!(
                                    "phi %{} input %{} does not dominate edge from {}",
                                    inst.id, reg, from
                                )));
                            }
                        }
                    }
                }
                kind => {
                    past_phis = true;
                    for operand in kind.values() {
                        check_use(func, operand, bb.id, &defined_here, &def_block, dom, &err)?;
                    }
                }
            }
            defined_here.insert(inst.id);
        }

        for operand in bb.terminator.kind.values() {
            check_use(func, operand, bb.id, &defined_here, &def_block, dom, &err)?;
        }

        match &bb.terminator.kind {
            TermKind::CondBr { condition, .. } => {
                if let Some(ty) = func.value_type(condition) {
                    if ty != Ty::I1 {
                        return Err(err(format!(
                            "conditional branch in block {} on non-i1 value of type {}",
                            bb.id, ty
                        )));
                    }
                }
            }
            TermKind::Return(value) => match (value, &func.return_type) {
                (None, Ty::Void) => {}
                (None, other) => {
                    return Err(err(format!("bare return in function returning {}", other)))
                }
                (Some(_), Ty::Void) => {
                    return Err(err("value return in void function".into()));
                }
                (Some(value), expected) => {
                    if let Some(ty) = func.value_type(value) {
                        if &ty != expected {
                            return Err(err(format!(
                                "return of {} from function returning {}",
                                ty, expected
                            )));
                        }
                    }
                }
            },
            _ => {}
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn check_use(
    func: &Function,
    operand: &Value,
    block: BlockId,
    defined_here: &HashSet<RegId>,
    def_block: &HashMap<RegId, BlockId>,
    dom: &HashSet<BlockId>,
    err: &impl Fn(String) -> Error,
) -> Result<()> {
    let Value::Reg(reg) = operand else {
        if let Value::Arg(idx) = operand {
            if func.params.get(*idx as usize).is_none() {
                return Err(err(format!("use of missing argument {}", idx)));
            }
        }
        return Ok(());
    };
    if defined_here.contains(reg) {
        return Ok(());
    }
    let Some(&def) = def_block.get(reg) else {
        return Err(err(format!("use of undefined register %{}", reg)));
    };
    if def == block {
        return Err(err(format!(
            "register %{} used before its definition in block {}",
            reg, block
        )));
    }
    if !dom.contains(&def) {
        return Err(err(format!(
            "definition of %{} in block {} does not dominate its use in block {}",
            reg, def, block
        )));
    }
    Ok(())
}

fn dominates(
    dominators: &HashMap<BlockId, HashSet<BlockId>>,
    dominator: BlockId,
    block: BlockId,
) -> bool {
    dominators
        .get(&block)
        .map(|dom| dom.contains(&dominator))
        .unwrap_or(false)
}

/// Iterative dataflow dominator computation over the reachable subgraph.
fn compute_dominators(
    func: &Function,
    entry: BlockId,
    reachable: &HashSet<BlockId>,
    preds: &HashMap<BlockId, Vec<BlockId>>,
) -> HashMap<BlockId, HashSet<BlockId>> {
    let all: HashSet<BlockId> = reachable.iter().copied().collect();
    let mut dominators: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for &bb in reachable {
        if bb == entry {
            dominators.insert(bb, HashSet::from([bb]));
        } else {
            dominators.insert(bb, all.clone());
        }
    }

    let order = func.reachable_blocks();
    let mut changed = true;
    while changed {
        changed = false;
        for &bb in &order {
            if bb == entry {
                continue;
            }
            let mut new_dom: Option<HashSet<BlockId>> = None;
            if let Some(block_preds) = preds.get(&bb) {
                for pred in block_preds {
                    if !reachable.contains(pred) {
                        continue;
                    }
                    let pred_dom = &dominators[pred];
                    new_dom = Some(match new_dom {
                        None => pred_dom.clone(),
                        Some(acc) => acc.intersection(pred_dom).copied().collect(),
                    });
                }
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(bb);
            if dominators[&bb] != new_dom {
                dominators.insert(bb, new_dom);
                changed = true;
            }
        }
    }

    dominators
}
