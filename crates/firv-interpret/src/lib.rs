//! A small reference interpreter for the firv IR. It exists so semantic
//! properties of transformations can be checked by executing functions
//! before and after a rewrite on matched inputs.

use std::collections::HashMap;

use firv_core::error::{Error, Result};
use firv_core::ir::{
    BlockId, CallTarget, Constant, FloatBinOp, FloatPredicate, Function, InstKind, Instruction,
    IntBinOp, IntPredicate, Intrinsic, RegId, TermKind, Ty, Value,
};


/// Runtime representation of an IR value.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Struct(Vec<ExecValue>),
    Array(Vec<ExecValue>),
    Ptr(PtrValue),
    Undef,
}

/// A pointer is a memory cell plus an access path into the aggregate stored
/// there; geps extend the path, loads and stores resolve it.
#[derive(Debug, Clone, PartialEq)]
pub struct PtrValue {
    pub cell: usize,
    pub path: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Option<ExecValue>),
    Trapped,
}

/// Typed cell memory shared between the harness and the interpreted
/// function, so callers can hand buffers (e.g. struct-return outputs) into a
/// run and inspect them afterwards.
#[derive(Debug, Default)]
pub struct Machine {
    cells: Vec<ExecValue>,
}

impl Machine {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    pub fn alloc(&mut self, init: ExecValue) -> PtrValue {
        let cell = self.cells.len();
        self.cells.push(init);
        PtrValue {
            cell,
            path: Vec::new(),
        }
    }

    pub fn read(&self, ptr: &PtrValue) -> Result<ExecValue> {
        let mut value = self
            .cells
            .get(ptr.cell)
            .ok_or_else(|| exec_error(format!("read through dangling cell {}", ptr.cell)))?;
        for &index in &ptr.path {
            value = match value {
                ExecValue::Struct(fields) => fields.get(index).ok_or_else(|| {
                    exec_error(format!("pointer path hits missing field {}", index))
                })?,
                ExecValue::Array(elements) => elements.get(index).ok_or_else(|| {
                    exec_error(format!("pointer path hits missing element {}", index))
                })?,
                other => {
                    return Err(exec_error(format!(
                        "pointer path descends into non-aggregate {:?}",
                        other
                    )))
                }
            };
        }
        Ok(value.clone())
    }

    pub fn write(&mut self, ptr: &PtrValue, new: ExecValue) -> Result<()> {
        let mut value = self
            .cells
            .get_mut(ptr.cell)
            .ok_or_else(|| exec_error(format!("write through dangling cell {}", ptr.cell)))?;
        for &index in &ptr.path {
            value = match value {
                ExecValue::Struct(fields) => fields.get_mut(index).ok_or_else(|| {
                    exec_error(format!("pointer path hits missing field {}", index))
                })?,
                ExecValue::Array(elements) => elements.get_mut(index).ok_or_else(|| {
                    exec_error(format!("pointer path hits missing element {}", index))
                })?,
                other => {
                    return Err(exec_error(format!(
                        "pointer path descends into non-aggregate {:?}",
                        other
                    )))
                }
            };
        }
        *value = new;
        Ok(())
    }
}

/// Zero-initialized runtime value of a type, used for fresh allocas and for
/// caller-provided buffers.
pub fn zero_value(ty: &Ty) -> ExecValue {
    match ty {
        Ty::I1 => ExecValue::Bool(false),
        Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64 => ExecValue::Int(0),
        Ty::F32 | Ty::F64 => ExecValue::Float(0.0),
        Ty::Struct { fields, .. } => ExecValue::Struct(fields.iter().map(zero_value).collect()),
        Ty::Array(element, len) => {
            ExecValue::Array((0..*len).map(|_| zero_value(element)).collect())
        }
        Ty::Ptr(_) | Ty::Vector(..) | Ty::Void => ExecValue::Undef,
    }
}

pub struct Interpreter {
    step_budget: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            step_budget: 1_000_000,
        }
    }

    pub fn with_step_budget(step_budget: u64) -> Self {
        Self { step_budget }
    }

    /// Execute `func` on `args`. Returns [`Outcome::Trapped`] when the trap
    /// intrinsic fires; any structural problem is an error.
    pub fn run(&self, machine: &mut Machine, func: &Function, args: &[ExecValue]) -> Result<Outcome> {
        if args.len() != func.params.len() {
            return Err(exec_error(format!(
                "`{}` expects {} arguments, got {}",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        let mut frame = Frame {
            args,
            regs: HashMap::new(),
            previous: None,
        };
        let mut current = func
            .entry()
            .ok_or_else(|| exec_error(format!("`{}` has no entry block", func.name)))?;
        let mut steps = 0u64;

        loop {
            let block = func
                .block(current)
                .ok_or_else(|| exec_error(format!("jump to missing block bb{}", current)))?;
            for inst in &block.instructions {
                steps += 1;
                if steps > self.step_budget {
                    return Err(exec_error(format!(
                        "step budget of {} exhausted in `{}`",
                        self.step_budget, func.name
                    )));
                }
                match frame.execute(machine, inst)? {
                    Step::Value(value) => {
                        frame.regs.insert(inst.id, value);
                    }
                    Step::Done => {}
                    Step::Trap => {
                        tracing::debug!(function = %func.name, "trap intrinsic fired");
                        return Ok(Outcome::Trapped);
                    }
                }
            }

            steps += 1;
            if steps > self.step_budget {
                return Err(exec_error(format!(
                    "step budget of {} exhausted in `{}`",
                    self.step_budget, func.name
                )));
            }
            match &block.terminator.kind {
                TermKind::Return(value) => {
                    let returned = match value {
                        Some(value) => Some(frame.eval(value)?),
                        None => None,
                    };
                    return Ok(Outcome::Returned(returned));
                }
                TermKind::Br(target) => {
                    frame.previous = Some(current);
                    current = *target;
                }
                TermKind::CondBr {
                    condition,
                    if_true,
                    if_false,
                    ..
                } => {
                    let taken = as_bool(&frame.eval(condition)?)?;
                    frame.previous = Some(current);
                    current = if taken { *if_true } else { *if_false };
                }
                TermKind::Unreachable => {
                    return Err(exec_error(format!(
                        "executed unreachable in `{}` block bb{}",
                        func.name, current
                    )))
                }
            }
        }
    }
}

enum Step {
    Value(ExecValue),
    Done,
    Trap,
}

struct Frame<'a> {
    args: &'a [ExecValue],
    regs: HashMap<RegId, ExecValue>,
    previous: Option<BlockId>,
}

impl<'a> Frame<'a> {
    fn eval(&self, value: &Value) -> Result<ExecValue> {
        match value {
            Value::Reg(reg) => self
                .regs
                .get(reg)
                .cloned()
                .ok_or_else(|| exec_error(format!("register %{} read before definition", reg))),
            Value::Arg(idx) => self
                .args
                .get(*idx as usize)
                .cloned()
                .ok_or_else(|| exec_error(format!("missing argument {}", idx))),
            Value::Const(constant) => Ok(const_value(constant)),
        }
    }

    fn execute(&mut self, machine: &mut Machine, inst: &Instruction) -> Result<Step> {
        let value = match &inst.kind {
            InstKind::IntBin(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                int_bin(*op, &lhs, &rhs, &inst.ty)?
            }
            InstKind::FloatBin(op, lhs, rhs) => {
                let lhs = as_float(&self.eval(lhs)?)?;
                let rhs = as_float(&self.eval(rhs)?)?;
                let result = match op {
                    FloatBinOp::FAdd => lhs + rhs,
                    FloatBinOp::FSub => lhs - rhs,
                    FloatBinOp::FMul => lhs * rhs,
                    FloatBinOp::FDiv => lhs / rhs,
                };
                ExecValue::Float(result)
            }
            InstKind::ICmp(pred, lhs, rhs) => {
                let lhs = as_int(&self.eval(lhs)?)?;
                let rhs = as_int(&self.eval(rhs)?)?;
                let result = match pred {
                    IntPredicate::Eq => lhs == rhs,
                    IntPredicate::Ne => lhs != rhs,
                    IntPredicate::Slt => lhs < rhs,
                    IntPredicate::Sle => lhs <= rhs,
                    IntPredicate::Sgt => lhs > rhs,
                    IntPredicate::Sge => lhs >= rhs,
                };
                ExecValue::Bool(result)
            }
            InstKind::FCmp(pred, lhs, rhs) => {
                let lhs = as_float(&self.eval(lhs)?)?;
                let rhs = as_float(&self.eval(rhs)?)?;
                // Ordered predicates: false whenever either side is NaN.
                let result = match pred {
                    FloatPredicate::Oeq => lhs == rhs,
                    FloatPredicate::One => !lhs.is_nan() && !rhs.is_nan() && lhs != rhs,
                    FloatPredicate::Olt => lhs < rhs,
                    FloatPredicate::Ogt => lhs > rhs,
                };
                ExecValue::Bool(result)
            }
            InstKind::Alloca { allocated } => ExecValue::Ptr(machine.alloc(zero_value(allocated))),
            InstKind::Load { ptr, .. } => {
                let ptr = as_ptr(&self.eval(ptr)?)?;
                machine.read(&ptr)?
            }
            InstKind::Store { value, ptr, .. } => {
                let new = self.eval(value)?;
                let ptr = as_ptr(&self.eval(ptr)?)?;
                machine.write(&ptr, new)?;
                return Ok(Step::Done);
            }
            InstKind::Gep { ptr, indices, .. } => {
                let mut ptr = as_ptr(&self.eval(ptr)?)?;
                let mut indices = indices.iter();
                let base = indices
                    .next()
                    .ok_or_else(|| exec_error("gep without indices".to_string()))?;
                if as_int(&self.eval(base)?)? != 0 {
                    return Err(exec_error(
                        "gep with a non-zero base offset is unsupported".to_string(),
                    ));
                }
                for index in indices {
                    ptr.path.push(as_int(&self.eval(index)?)? as usize);
                }
                ExecValue::Ptr(ptr)
            }
            InstKind::ExtractValue { aggregate, indices } => {
                let mut value = self.eval(aggregate)?;
                for &index in indices {
                    value = match value {
                        ExecValue::Struct(mut fields) => {
                            if (index as usize) < fields.len() {
                                fields.swap_remove(index as usize)
                            } else {
                                return Err(exec_error(format!(
                                    "extractvalue index {} out of bounds",
                                    index
                                )));
                            }
                        }
                        ExecValue::Array(mut elements) => {
                            if (index as usize) < elements.len() {
                                elements.swap_remove(index as usize)
                            } else {
                                return Err(exec_error(format!(
                                    "extractvalue index {} out of bounds",
                                    index
                                )));
                            }
                        }
                        other => {
                            return Err(exec_error(format!(
                                "extractvalue on non-aggregate {:?}",
                                other
                            )))
                        }
                    };
                }
                value
            }
            InstKind::MemCpy { dest, src, .. } => {
                let src = as_ptr(&self.eval(src)?)?;
                let dest = as_ptr(&self.eval(dest)?)?;
                let value = machine.read(&src)?;
                machine.write(&dest, value)?;
                return Ok(Step::Done);
            }
            InstKind::Call { target, args: _ } => match target {
                CallTarget::Intrinsic(Intrinsic::Trap) => return Ok(Step::Trap),
                CallTarget::Function(name) => {
                    return Err(exec_error(format!(
                        "call to external function `{}` is unsupported",
                        name
                    )))
                }
            },
            InstKind::Phi { incoming } => {
                let previous = self
                    .previous
                    .ok_or_else(|| exec_error("phi evaluated in the entry block".to_string()))?;
                let (value, _) = incoming
                    .iter()
                    .find(|(_, block)| *block == previous)
                    .ok_or_else(|| {
                        exec_error(format!("phi has no incoming edge from bb{}", previous))
                    })?;
                self.eval(value)?
            }
        };
        Ok(Step::Value(value))
    }
}

fn const_value(constant: &Constant) -> ExecValue {
    match constant {
        Constant::Int(value, ty) => ExecValue::Int(wrap_int(*value, ty)),
        Constant::Float(value, _) => ExecValue::Float(*value),
        Constant::Bool(value) => ExecValue::Bool(*value),
        Constant::Struct(fields, _) => ExecValue::Struct(fields.iter().map(const_value).collect()),
        Constant::Array(elements, _) => {
            ExecValue::Array(elements.iter().map(const_value).collect())
        }
        Constant::Undef(_) => ExecValue::Undef,
    }
}

fn int_bin(op: IntBinOp, lhs: &ExecValue, rhs: &ExecValue, ty: &Ty) -> Result<ExecValue> {
    // i1 conjunctions work on booleans; everything else is two's-complement
    // arithmetic truncated to the result width.
    if let (ExecValue::Bool(lhs), ExecValue::Bool(rhs)) = (lhs, rhs) {
        let result = match op {
            IntBinOp::And => lhs & rhs,
            IntBinOp::Or => lhs | rhs,
            IntBinOp::Xor => lhs ^ rhs,
            other => {
                return Err(exec_error(format!(
                    "{:?} is not defined on booleans",
                    other
                )))
            }
        };
        return Ok(ExecValue::Bool(result));
    }

    let lhs = as_int(lhs)?;
    let rhs = as_int(rhs)?;
    let result = match op {
        IntBinOp::Add => lhs.wrapping_add(rhs),
        IntBinOp::Sub => lhs.wrapping_sub(rhs),
        IntBinOp::Mul => lhs.wrapping_mul(rhs),
        IntBinOp::And => lhs & rhs,
        IntBinOp::Or => lhs | rhs,
        IntBinOp::Xor => lhs ^ rhs,
    };
    Ok(ExecValue::Int(wrap_int(result, ty)))
}

/// Sign-extending truncation to the width of `ty`.
fn wrap_int(value: i64, ty: &Ty) -> i64 {
    match ty.int_bits() {
        Some(64) | None => value,
        Some(bits) => {
            let shift = 64 - bits;
            (value << shift) >> shift
        }
    }
}

fn as_int(value: &ExecValue) -> Result<i64> {
    match value {
        ExecValue::Int(v) => Ok(*v),
        ExecValue::Bool(v) => Ok(*v as i64),
        other => Err(exec_error(format!("expected an integer, got {:?}", other))),
    }
}

fn as_float(value: &ExecValue) -> Result<f64> {
    match value {
        ExecValue::Float(v) => Ok(*v),
        other => Err(exec_error(format!("expected a float, got {:?}", other))),
    }
}

fn as_bool(value: &ExecValue) -> Result<bool> {
    match value {
        ExecValue::Bool(v) => Ok(*v),
        ExecValue::Int(v) => Ok(*v != 0),
        other => Err(exec_error(format!("expected a boolean, got {:?}", other))),
    }
}

fn as_ptr(value: &ExecValue) -> Result<PtrValue> {
    match value {
        ExecValue::Ptr(ptr) => Ok(ptr.clone()),
        other => Err(exec_error(format!("expected a pointer, got {:?}", other))),
    }
}

fn exec_error(message: String) -> Error {
    Error::from(message)
}
