use pretty_assertions::assert_eq;

use firv_core::diagnostics::diagnostic_manager;
use firv_core::ir::verify::verify_function;
use firv_core::ir::{
    BasicBlock, BlockId, Builder, CallTarget, Constant, DebugLoc, FnAttr, Function, InstKind,
    IntBinOp, IntPredicate, Intrinsic, Param, TermKind, Ty, Value,
};

use crate::pass::{FunctionPass, PassContext};

use super::*;

const SCAFFOLD_LABELS: [&str; 6] = [
    "FirvPrologue",
    "FirvInterlude",
    "FirvEpilogue.1",
    "FirvEpilogue.2",
    "ReturnBB",
    "FailBB",
];

fn harden(func: &mut Function) -> bool {
    FirvHarden
        .run(func, &PassContext::host())
        .expect("pass should not error")
}

fn block_by_label<'f>(func: &'f Function, label: &str) -> &'f BasicBlock {
    func.blocks
        .iter()
        .find(|bb| bb.label.as_deref() == Some(label))
        .unwrap_or_else(|| panic!("no block labeled {}", label))
}

/// The two return-value slots allocated by the prologue.
fn slots(func: &Function) -> (Value, Value) {
    let prologue = block_by_label(func, "FirvPrologue");
    assert_eq!(prologue.instructions.len(), 2);
    assert_eq!(prologue.instructions[0].name.as_deref(), Some("FirvSlot1"));
    assert_eq!(prologue.instructions[1].name.as_deref(), Some("FirvSlot2"));
    (
        Value::Reg(prologue.instructions[0].id),
        Value::Reg(prologue.instructions[1].id),
    )
}

/// Partition the post-pass blocks into the first copy and the clones,
/// leaving out the scaffolding blocks the pass materialized around them.
fn copies(func: &Function) -> (Vec<BlockId>, Vec<BlockId>) {
    let mut originals = Vec::new();
    let mut clones = Vec::new();
    for bb in &func.blocks {
        let label = bb.label.as_deref().unwrap_or("");
        if SCAFFOLD_LABELS.contains(&label) {
            continue;
        }
        if label.ends_with(CLONE_SUFFIX) {
            clones.push(bb.id);
        } else {
            originals.push(bb.id);
        }
    }
    (originals, clones)
}

fn count_volatile_stores_to(func: &Function, blocks: &[BlockId], slot: &Value) -> usize {
    blocks
        .iter()
        .filter_map(|&id| func.block(id))
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| {
            matches!(
                &inst.kind,
                InstKind::Store { ptr, volatile: true, .. } if ptr == slot
            )
        })
        .count()
}

fn add_function() -> Function {
    let mut func = Function::new(
        "add",
        vec![Param::new("a", Ty::I32), Param::new("b", Ty::I32)],
        Ty::I32,
    );
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    let sum = b
        .int_bin(IntBinOp::Add, Value::Arg(0), Value::Arg(1), "sum")
        .expect("add");
    b.ret(sum).expect("ret");
    func
}

fn two_return_function() -> Function {
    let mut func = Function::new("pick", vec![Param::new("c", Ty::I1)], Ty::I32);
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let yes = func.add_block(Some("yes".into()));
    let no = func.add_block(Some("no".into()));
    {
        let mut b = Builder::at_end(&mut func, entry).expect("builder");
        b.cond_br(Value::Arg(0), yes, no, None).expect("condbr");
    }
    {
        let mut b = Builder::at_end(&mut func, yes).expect("builder");
        b.ret(Value::const_i32(1)).expect("ret");
    }
    {
        let mut b = Builder::at_end(&mut func, no).expect("builder");
        b.ret(Value::const_i32(2)).expect("ret");
    }
    func
}

fn loop_function() -> Function {
    let mut func = Function::new("loopy", vec![Param::new("n", Ty::I32)], Ty::I32);
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let header = func.add_block(Some("header".into()));
    let body = func.add_block(Some("body".into()));
    let exit = func.add_block(Some("exit".into()));
    {
        let mut b = Builder::at_end(&mut func, entry).expect("builder");
        b.br(header).expect("br");
    }
    let (i, acc);
    {
        let mut b = Builder::at_end(&mut func, header).expect("builder");
        i = b
            .phi(Ty::I32, vec![(Value::const_i32(0), entry)], "i")
            .expect("phi");
        acc = b
            .phi(Ty::I32, vec![(Value::const_i32(0), entry)], "acc")
            .expect("phi");
        let again = b
            .icmp(IntPredicate::Slt, i.clone(), Value::Arg(0), "again")
            .expect("icmp");
        b.cond_br(again, body, exit, None).expect("condbr");
    }
    let (i_next, acc_next);
    {
        let mut b = Builder::at_end(&mut func, body).expect("builder");
        acc_next = b
            .int_bin(IntBinOp::Add, acc.clone(), i.clone(), "acc.next")
            .expect("add");
        i_next = b
            .int_bin(IntBinOp::Add, i.clone(), Value::const_i32(1), "i.next")
            .expect("add");
        b.br(header).expect("br");
    }
    {
        let mut b = Builder::at_end(&mut func, exit).expect("builder");
        b.ret(acc).expect("ret");
    }

    // Close the loop-carried phis now that the latch values exist.
    let header_block = func.block_mut(header).expect("header");
    let InstKind::Phi { incoming } = &mut header_block.instructions[0].kind else {
        panic!("expected phi");
    };
    incoming.push((i_next, body));
    let InstKind::Phi { incoming } = &mut header_block.instructions[1].kind else {
        panic!("expected phi");
    };
    incoming.push((acc_next, body));

    verify_function(&func).expect("loop function is well-formed");
    func
}

fn pair_ty() -> Ty {
    Ty::anon_struct(vec![Ty::I32, Ty::I32])
}

fn sret_function() -> Function {
    let mut func = Function::new(
        "baz",
        vec![Param::sret("out", pair_ty()), Param::new("a", Ty::I32)],
        Ty::Void,
    );
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    let x = b
        .gep(
            pair_ty(),
            Value::Arg(0),
            vec![Value::const_i32(0), Value::const_i32(0)],
            "x",
        )
        .expect("gep");
    b.store(Value::Arg(1), x).expect("store");
    let y = b
        .gep(
            pair_ty(),
            Value::Arg(0),
            vec![Value::const_i32(0), Value::const_i32(1)],
            "y",
        )
        .expect("gep");
    let succ = b
        .int_bin(IntBinOp::Add, Value::Arg(1), Value::const_i32(1), "succ")
        .expect("add");
    b.store(succ, y).expect("store");
    b.ret_void().expect("ret");
    func
}

#[test]
fn unattributed_function_is_left_untouched() {
    let mut func = add_function();
    func.attrs.clear();
    let before = func.clone();
    assert!(!harden(&mut func));
    assert_eq!(func, before);
}

#[test]
fn pointer_return_is_declined_with_a_diagnostic() {
    let mut func = Function::new("bar_returns_pointer", vec![], Ty::I32.ptr_to());
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    let slot = b.alloca(Ty::I32, "slot").expect("alloca");
    b.ret(slot).expect("ret");

    let before = func.clone();
    let mark = diagnostic_manager().snapshot();
    assert!(!harden(&mut func));
    assert_eq!(func, before);
    assert!(diagnostic_manager()
        .diagnostics_since(mark)
        .iter()
        .any(|d| d.message.contains("bar_returns_pointer")));
}

#[test]
fn vector_return_is_declined() {
    let vec_ty = Ty::Vector(Box::new(Ty::F32), 4);
    let mut func = Function::new("simd_identity", vec![], vec_ty.clone());
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    b.ret(Value::Const(Constant::Undef(vec_ty))).expect("ret");

    let before = func.clone();
    assert!(!harden(&mut func));
    assert_eq!(func, before);
}

#[test]
fn struct_with_pointer_field_is_declined_before_any_mutation() {
    let leaky = Ty::anon_struct(vec![Ty::I32, Ty::I32.ptr_to()]);
    let mut func = Function::new("leaky", vec![], leaky.clone());
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    let slot = b.alloca(leaky.clone(), "slot").expect("alloca");
    let loaded = b.load(leaky, slot, "value").expect("load");
    b.ret(loaded).expect("ret");

    let before = func.clone();
    assert!(!harden(&mut func));
    assert_eq!(func, before);
}

#[test]
fn hardened_add_has_the_expected_skeleton() {
    let mut func = add_function();
    assert!(harden(&mut func));
    verify_function(&func).expect("hardened function stays well-formed");

    // Attribute is consumed as a gate, never rewritten.
    assert!(func.has_attr(FnAttr::FirvHarden));

    // entry + StoreLoad, both cloned, plus the six scaffold blocks.
    assert_eq!(func.blocks.len(), 10);
    assert_eq!(
        func.entry(),
        Some(block_by_label(&func, "FirvPrologue").id)
    );

    let (slot1, slot2) = slots(&func);
    let prologue = block_by_label(&func, "FirvPrologue");
    for inst in &prologue.instructions {
        assert_eq!(inst.kind, InstKind::Alloca { allocated: Ty::I32 });
    }
    assert_eq!(
        prologue.terminator.kind,
        TermKind::Br(block_by_label(&func, "StoreLoad").id)
    );

    // StoreLoad spills and reloads both arguments.
    let store_load = block_by_label(&func, "StoreLoad");
    assert_eq!(store_load.instructions.len(), 6);
    assert!(matches!(
        store_load.instructions[1].kind,
        InstKind::Store {
            value: Value::Arg(0),
            volatile: true,
            ..
        }
    ));

    // Both epilogue checks compare the two slots and carry the cold-path
    // weights.
    for label in ["FirvEpilogue.1", "FirvEpilogue.2"] {
        let check = block_by_label(&func, label);
        assert!(matches!(
            &check.instructions[0].kind,
            InstKind::Load { ptr, volatile: true } if ptr == &slot1
        ));
        assert!(matches!(
            &check.instructions[1].kind,
            InstKind::Load { ptr, volatile: true } if ptr == &slot2
        ));
        assert!(matches!(
            check.instructions[2].kind,
            InstKind::ICmp(IntPredicate::Eq, ..)
        ));
        let TermKind::CondBr {
            if_false, weights, ..
        } = &check.terminator.kind
        else {
            panic!("expected conditional check, got {:?}", check.terminator.kind);
        };
        assert_eq!(*if_false, block_by_label(&func, "FailBB").id);
        assert_eq!(*weights, Some((1, 99999)));
    }
    let TermKind::CondBr { if_true, .. } =
        &block_by_label(&func, "FirvEpilogue.1").terminator.kind
    else {
        panic!("expected conditional check");
    };
    assert_eq!(*if_true, block_by_label(&func, "FirvEpilogue.2").id);
    let TermKind::CondBr { if_true, .. } =
        &block_by_label(&func, "FirvEpilogue.2").terminator.kind
    else {
        panic!("expected conditional check");
    };
    assert_eq!(*if_true, block_by_label(&func, "ReturnBB").id);

    // FailBB traps and never falls through.
    let fail = block_by_label(&func, "FailBB");
    assert_eq!(fail.instructions.len(), 1);
    assert!(matches!(
        &fail.instructions[0].kind,
        InstKind::Call {
            target: CallTarget::Intrinsic(Intrinsic::Trap),
            ..
        }
    ));
    assert_eq!(fail.terminator.kind, TermKind::Unreachable);

    // ReturnBB reloads both slots but returns only the first.
    let return_bb = block_by_label(&func, "ReturnBB");
    assert_eq!(return_bb.instructions.len(), 2);
    assert_eq!(return_bb.instructions[0].name.as_deref(), Some("RetVal1"));
    assert_eq!(return_bb.instructions[1].name.as_deref(), Some("RetVal2"));
    assert_eq!(
        return_bb.terminator.kind,
        TermKind::Return(Some(Value::Reg(return_bb.instructions[0].id)))
    );
}

#[test]
fn exactly_one_reachable_return_remains() {
    let mut func = two_return_function();
    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");

    let return_bb = block_by_label(&func, "ReturnBB").id;
    let reachable_returns: Vec<BlockId> = func
        .reachable_blocks()
        .into_iter()
        .filter(|&id| {
            func.block(id)
                .map(|bb| bb.terminator.kind.is_return())
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(reachable_returns, vec![return_bb]);
}

#[test]
fn every_return_is_rewritten_once_per_copy() {
    let mut func = two_return_function();
    assert!(harden(&mut func));

    let (slot1, slot2) = slots(&func);
    let (originals, clones) = copies(&func);
    // Two pre-pass returns, so two slot stores per copy.
    assert_eq!(count_volatile_stores_to(&func, &originals, &slot1), 2);
    assert_eq!(count_volatile_stores_to(&func, &originals, &slot2), 0);
    assert_eq!(count_volatile_stores_to(&func, &clones, &slot2), 2);
    assert_eq!(count_volatile_stores_to(&func, &clones, &slot1), 0);

    // The rewritten blocks end with the slot store right where the return
    // used to be, followed by the copy's bridge branch.
    let interlude = block_by_label(&func, "FirvInterlude").id;
    let epilogue = block_by_label(&func, "FirvEpilogue.1").id;
    for label in ["yes", "no"] {
        let bb = block_by_label(&func, label);
        assert!(matches!(
            bb.instructions.last().map(|inst| &inst.kind),
            Some(InstKind::Store { volatile: true, .. })
        ));
        assert_eq!(bb.terminator.kind, TermKind::Br(interlude));
    }
    for label in ["yes.cl", "no.cl"] {
        let bb = block_by_label(&func, label);
        assert_eq!(bb.terminator.kind, TermKind::Br(epilogue));
    }
}

#[test]
fn copies_stay_on_their_side_of_the_interlude() {
    let mut func = loop_function();
    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");

    let (originals, clones) = copies(&func);
    let interlude = block_by_label(&func, "FirvInterlude").id;
    let epilogue = block_by_label(&func, "FirvEpilogue.1").id;

    for &id in &originals {
        let bb = func.block(id).expect("block");
        for succ in bb.terminator.kind.successors() {
            assert!(
                originals.contains(&succ) || succ == interlude,
                "original bb{} escapes to bb{}",
                id,
                succ
            );
        }
    }
    for &id in &clones {
        let bb = func.block(id).expect("block");
        for succ in bb.terminator.kind.successors() {
            assert!(
                clones.contains(&succ) || succ == epilogue,
                "cloned bb{} escapes to bb{}",
                id,
                succ
            );
        }
    }

    // The cloned loop still closes on the cloned header.
    let cloned_header = block_by_label(&func, "header.cl").id;
    let cloned_body = block_by_label(&func, "body.cl");
    assert_eq!(cloned_body.terminator.kind, TermKind::Br(cloned_header));
    for inst in &block_by_label(&func, "header.cl").instructions {
        if let InstKind::Phi { incoming } = &inst.kind {
            for (_, from) in incoming {
                assert!(clones.contains(from));
            }
        }
    }
}

#[test]
fn zero_argument_function_gets_an_empty_storeload() {
    let mut func = Function::new("constant", vec![], Ty::I32);
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    b.ret(Value::const_i32(42)).expect("ret");

    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");
    let store_load = block_by_label(&func, "StoreLoad");
    assert!(store_load.instructions.is_empty());
    assert_eq!(
        store_load.terminator.kind,
        TermKind::Br(block_by_label(&func, "entry").id)
    );
}

#[test]
fn unreachable_blocks_are_cloned_without_crashing() {
    let mut func = add_function();
    let orphan = func.add_block(Some("orphan".into()));
    func.block_mut(orphan).expect("orphan").terminator =
        firv_core::ir::Terminator::unreachable();

    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");
    let orphan_clone = block_by_label(&func, "orphan.cl");
    assert_eq!(orphan_clone.terminator.kind, TermKind::Unreachable);
    assert!(!func.reachable_blocks().contains(&orphan_clone.id));
}

#[test]
fn sret_buffer_is_hardened_per_field() {
    let mut func = sret_function();
    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");

    // Slots take the pointed-to struct type, not the pointer.
    let prologue = block_by_label(&func, "FirvPrologue");
    for inst in &prologue.instructions {
        assert_eq!(
            inst.kind,
            InstKind::Alloca {
                allocated: pair_ty()
            }
        );
    }

    // Each return rewrite copies the output buffer into its slot.
    let (slot1, slot2) = slots(&func);
    let entry = block_by_label(&func, "entry");
    assert!(matches!(
        entry.instructions.last().map(|inst| &inst.kind),
        Some(InstKind::MemCpy {
            dest,
            src: Value::Arg(0),
            bytes: 8,
            volatile: true,
        }) if dest == &slot1
    ));
    let cloned_entry = block_by_label(&func, "entry.cl");
    assert!(matches!(
        cloned_entry.instructions.last().map(|inst| &inst.kind),
        Some(InstKind::MemCpy {
            dest,
            src: Value::Arg(0),
            bytes: 8,
            volatile: true,
        }) if dest == &slot2
    ));

    // The checks recurse per field over the slot pointers.
    for label in ["FirvEpilogue.1", "FirvEpilogue.2"] {
        let check = block_by_label(&func, label);
        let geps = check
            .instructions
            .iter()
            .filter(|inst| matches!(inst.kind, InstKind::Gep { .. }))
            .count();
        let cmps = check
            .instructions
            .iter()
            .filter(|inst| matches!(inst.kind, InstKind::ICmp(IntPredicate::Eq, ..)))
            .count();
        assert_eq!(geps, 4);
        assert_eq!(cmps, 2);
    }

    // The function still returns void; the buffer itself is the result.
    let return_bb = block_by_label(&func, "ReturnBB");
    assert_eq!(return_bb.terminator.kind, TermKind::Return(None));
    assert_eq!(return_bb.instructions.len(), 2);
}

#[test]
fn comparator_recurses_through_nested_aggregates() {
    let nested = Ty::anon_struct(vec![Ty::array(Ty::F64, 2), Ty::I32]);
    let mut func = Function::new("nested", vec![], nested.clone());
    func.add_attr(FnAttr::FirvHarden);
    let entry = func.add_block(Some("entry".into()));
    let mut b = Builder::at_end(&mut func, entry).expect("builder");
    let slot = b.alloca(nested.clone(), "slot").expect("alloca");
    let value = b.load(nested, slot, "value").expect("load");
    b.ret(value).expect("ret");

    assert!(harden(&mut func));
    verify_function(&func).expect("well-formed");

    // Per check: one float compare per array element, one integer compare
    // for the trailing field.
    for label in ["FirvEpilogue.1", "FirvEpilogue.2"] {
        let check = block_by_label(&func, label);
        let fcmps = check
            .instructions
            .iter()
            .filter(|inst| matches!(inst.kind, InstKind::FCmp(..)))
            .count();
        let icmps = check
            .instructions
            .iter()
            .filter(|inst| matches!(inst.kind, InstKind::ICmp(..)))
            .count();
        assert_eq!(fcmps, 2);
        assert_eq!(icmps, 1);
    }
}

#[test]
fn debug_locations_survive_duplication_and_return_rewrites() {
    let mut func = add_function();
    let entry = func.entry().expect("entry");
    let body_loc = DebugLoc::new("adder.c", 3, 12);
    let ret_loc = DebugLoc::new("adder.c", 4, 5);
    {
        let block = func.block_mut(entry).expect("entry block");
        block.instructions[0].debug_loc = Some(body_loc.clone());
        block.terminator.debug_loc = Some(ret_loc.clone());
    }

    assert!(harden(&mut func));

    // The clone carries the body's location verbatim.
    let cloned_entry = block_by_label(&func, "entry.cl");
    assert_eq!(cloned_entry.instructions[0].debug_loc, Some(body_loc));

    // The branch (and slot store) that replaced each return keep the
    // return's location.
    for label in ["entry", "entry.cl"] {
        let bb = block_by_label(&func, label);
        assert_eq!(bb.terminator.debug_loc, Some(ret_loc.clone()));
        assert_eq!(
            bb.instructions.last().and_then(|inst| inst.debug_loc.clone()),
            Some(ret_loc.clone())
        );
    }
}

#[test]
fn pass_metadata_is_stable() {
    let pass = create_firv_harden_pass();
    assert_eq!(pass.name(), "firv-harden");
    assert_eq!(pass.pass_id(), *FIRV_HARDEN_PASS_ID);
    assert_eq!(
        pass.preserved_analyses(),
        crate::pass::PreservedAnalyses::None
    );
}
