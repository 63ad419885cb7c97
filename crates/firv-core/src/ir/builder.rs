use crate::error::{Error, Result};

use super::ty::Ty;
use super::{
    BlockId, CallTarget, Constant, DebugLoc, FloatBinOp, FloatPredicate, InstKind, Instruction,
    IntBinOp, IntPredicate, Intrinsic, TermKind, Terminator, Value,
};

/// Typed instruction builder with an explicit insertion point. A builder is
/// opened for one block-rewrite and dropped when that rewrite is done; it
/// stamps its current debug location on everything it emits.
pub struct Builder<'f> {
    func: &'f mut super::Function,
    block: BlockId,
    at: usize,
    debug_loc: Option<DebugLoc>,
}

impl<'f> Builder<'f> {
    pub fn at_end(func: &'f mut super::Function, block: BlockId) -> Result<Self> {
        let at = func
            .block(block)
            .ok_or_else(|| Error::malformed_ir(format!("no block {} to position at", block)))?
            .instructions
            .len();
        Ok(Self {
            func,
            block,
            at,
            debug_loc: None,
        })
    }

    pub fn at_front(func: &'f mut super::Function, block: BlockId) -> Result<Self> {
        func.block(block)
            .ok_or_else(|| Error::malformed_ir(format!("no block {} to position at", block)))?;
        Ok(Self {
            func,
            block,
            at: 0,
            debug_loc: None,
        })
    }

    pub fn set_debug_loc(&mut self, debug_loc: Option<DebugLoc>) {
        self.debug_loc = debug_loc;
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn func(&self) -> &super::Function {
        self.func
    }

    fn insert(&mut self, kind: InstKind, ty: Ty, name: &str) -> Result<Value> {
        let id = self.func.fresh_reg();
        let inst = Instruction {
            id,
            kind,
            ty,
            name: if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            },
            debug_loc: self.debug_loc.clone(),
        };
        let block = self
            .func
            .block_mut(self.block)
            .ok_or_else(|| Error::malformed_ir(format!("insertion block {} vanished", self.block)))?;
        block.instructions.insert(self.at, inst);
        self.at += 1;
        Ok(Value::Reg(id))
    }

    fn operand_type(&self, value: &Value) -> Result<Ty> {
        self.func
            .value_type(value)
            .ok_or_else(|| Error::malformed_ir(format!("operand {:?} has no derivable type", value)))
    }

    pub fn alloca(&mut self, allocated: Ty, name: &str) -> Result<Value> {
        let ptr_ty = allocated.clone().ptr_to();
        self.insert(InstKind::Alloca { allocated }, ptr_ty, name)
    }

    pub fn load(&mut self, ty: Ty, ptr: Value, name: &str) -> Result<Value> {
        self.load_impl(ty, ptr, false, name)
    }

    pub fn volatile_load(&mut self, ty: Ty, ptr: Value, name: &str) -> Result<Value> {
        self.load_impl(ty, ptr, true, name)
    }

    fn load_impl(&mut self, ty: Ty, ptr: Value, volatile: bool, name: &str) -> Result<Value> {
        let ptr_ty = self.operand_type(&ptr)?;
        if !ptr_ty.is_pointer() {
            return Err(Error::malformed_ir(format!(
                "load requires a pointer operand, got {}",
                ptr_ty
            )));
        }
        self.insert(InstKind::Load { ptr, volatile }, ty, name)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<Value> {
        self.store_impl(value, ptr, false)
    }

    pub fn volatile_store(&mut self, value: Value, ptr: Value) -> Result<Value> {
        self.store_impl(value, ptr, true)
    }

    fn store_impl(&mut self, value: Value, ptr: Value, volatile: bool) -> Result<Value> {
        let ptr_ty = self.operand_type(&ptr)?;
        if !ptr_ty.is_pointer() {
            return Err(Error::malformed_ir(format!(
                "store requires a pointer operand, got {}",
                ptr_ty
            )));
        }
        self.insert(
            InstKind::Store {
                value,
                ptr,
                volatile,
            },
            Ty::Void,
            "",
        )
    }

    pub fn int_bin(&mut self, op: IntBinOp, lhs: Value, rhs: Value, name: &str) -> Result<Value> {
        let ty = self.operand_type(&lhs)?;
        if !ty.is_integer() {
            return Err(Error::malformed_ir(format!(
                "integer binop on non-integer type {}",
                ty
            )));
        }
        self.insert(InstKind::IntBin(op, lhs, rhs), ty, name)
    }

    pub fn float_bin(
        &mut self,
        op: FloatBinOp,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value> {
        let ty = self.operand_type(&lhs)?;
        if !ty.is_float() {
            return Err(Error::malformed_ir(format!(
                "float binop on non-float type {}",
                ty
            )));
        }
        self.insert(InstKind::FloatBin(op, lhs, rhs), ty, name)
    }

    pub fn icmp(
        &mut self,
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value> {
        self.insert(InstKind::ICmp(pred, lhs, rhs), Ty::I1, name)
    }

    pub fn icmp_eq(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value> {
        self.icmp(IntPredicate::Eq, lhs, rhs, name)
    }

    pub fn fcmp(
        &mut self,
        pred: FloatPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value> {
        self.insert(InstKind::FCmp(pred, lhs, rhs), Ty::I1, name)
    }

    pub fn fcmp_oeq(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value> {
        self.fcmp(FloatPredicate::Oeq, lhs, rhs, name)
    }

    /// Bitwise and; the result type follows the left operand (`i1` for the
    /// boolean conjunctions the comparators build).
    pub fn and(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value> {
        let ty = self.operand_type(&lhs)?;
        if !ty.is_integer() {
            return Err(Error::malformed_ir(format!("and on non-integer type {}", ty)));
        }
        self.insert(InstKind::IntBin(IntBinOp::And, lhs, rhs), ty, name)
    }

    pub fn gep(
        &mut self,
        base_ty: Ty,
        ptr: Value,
        indices: Vec<Value>,
        name: &str,
    ) -> Result<Value> {
        let ptr_ty = self.operand_type(&ptr)?;
        if !ptr_ty.is_pointer() {
            return Err(Error::malformed_ir(format!(
                "gep requires a pointer operand, got {}",
                ptr_ty
            )));
        }
        let element = gep_result_type(&base_ty, &indices)?;
        self.insert(
            InstKind::Gep {
                base_ty,
                ptr,
                indices,
            },
            element.ptr_to(),
            name,
        )
    }

    pub fn extract_value(
        &mut self,
        aggregate: Value,
        indices: Vec<u32>,
        name: &str,
    ) -> Result<Value> {
        let mut ty = self.operand_type(&aggregate)?;
        for &idx in &indices {
            ty = match ty {
                Ty::Struct { fields, .. } => fields
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| Error::malformed_ir(format!("struct has no field {}", idx)))?,
                Ty::Array(element, len) => {
                    if (idx as u64) < len {
                        *element
                    } else {
                        return Err(Error::malformed_ir(format!(
                            "array index {} out of bounds {}",
                            idx, len
                        )));
                    }
                }
                other => {
                    return Err(Error::malformed_ir(format!(
                        "extractvalue into non-aggregate {}",
                        other
                    )))
                }
            };
        }
        self.insert(InstKind::ExtractValue { aggregate, indices }, ty, name)
    }

    pub fn memcpy(&mut self, dest: Value, src: Value, bytes: u64, volatile: bool) -> Result<Value> {
        for operand in [&dest, &src] {
            let ty = self.operand_type(operand)?;
            if !ty.is_pointer() {
                return Err(Error::malformed_ir(format!(
                    "memcpy requires pointer operands, got {}",
                    ty
                )));
            }
        }
        self.insert(
            InstKind::MemCpy {
                dest,
                src,
                bytes,
                volatile,
            },
            Ty::Void,
            "",
        )
    }

    pub fn call_intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Value>) -> Result<Value> {
        self.insert(
            InstKind::Call {
                target: CallTarget::Intrinsic(intrinsic),
                args,
            },
            Ty::Void,
            "",
        )
    }

    pub fn call_function(
        &mut self,
        name: impl Into<String>,
        args: Vec<Value>,
        return_type: Ty,
        result_name: &str,
    ) -> Result<Value> {
        self.insert(
            InstKind::Call {
                target: CallTarget::Function(name.into()),
                args,
            },
            return_type,
            result_name,
        )
    }

    pub fn phi(&mut self, ty: Ty, incoming: Vec<(Value, BlockId)>, name: &str) -> Result<Value> {
        self.insert(InstKind::Phi { incoming }, ty, name)
    }

    fn set_terminator(&mut self, kind: TermKind) -> Result<()> {
        let debug_loc = self.debug_loc.clone();
        let block = self
            .func
            .block_mut(self.block)
            .ok_or_else(|| Error::malformed_ir(format!("insertion block {} vanished", self.block)))?;
        block.terminator = Terminator { kind, debug_loc };
        Ok(())
    }

    pub fn br(&mut self, target: BlockId) -> Result<()> {
        self.set_terminator(TermKind::Br(target))
    }

    pub fn cond_br(
        &mut self,
        condition: Value,
        if_true: BlockId,
        if_false: BlockId,
        weights: Option<(u32, u32)>,
    ) -> Result<()> {
        self.set_terminator(TermKind::CondBr {
            condition,
            if_true,
            if_false,
            weights,
        })
    }

    pub fn ret(&mut self, value: Value) -> Result<()> {
        self.set_terminator(TermKind::Return(Some(value)))
    }

    pub fn ret_void(&mut self) -> Result<()> {
        self.set_terminator(TermKind::Return(None))
    }

    pub fn unreachable(&mut self) -> Result<()> {
        self.set_terminator(TermKind::Unreachable)
    }
}

/// Element type a gep lands on after walking `indices` into `base_ty`. The
/// leading index scales the base pointer and does not change the type.
fn gep_result_type(base_ty: &Ty, indices: &[Value]) -> Result<Ty> {
    if indices.is_empty() {
        return Err(Error::malformed_ir("gep requires at least one index"));
    }
    let mut ty = base_ty.clone();
    for index in &indices[1..] {
        ty = match ty {
            Ty::Struct { fields, .. } => {
                let Value::Const(Constant::Int(idx, _)) = index else {
                    return Err(Error::malformed_ir(
                        "struct gep index must be a constant integer",
                    ));
                };
                fields
                    .get(*idx as usize)
                    .cloned()
                    .ok_or_else(|| Error::malformed_ir(format!("struct has no field {}", idx)))?
            }
            Ty::Array(element, _) => *element,
            Ty::Vector(element, _) => *element,
            other => {
                return Err(Error::malformed_ir(format!(
                    "gep cannot index into {}",
                    other
                )))
            }
        };
    }
    Ok(ty)
}
