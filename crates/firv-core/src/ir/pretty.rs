use std::fmt::{self, Formatter};

use itertools::Itertools;

use crate::pretty::{PrettyCtx, PrettyPrintable};

use super::{
    BasicBlock, CallTarget, Constant, FloatBinOp, FloatPredicate, FnAttr, Function, InstKind,
    Instruction, IntBinOp, IntPredicate, TermKind, Value,
};

impl PrettyPrintable for Function {
    fn fmt_pretty(&self, f: &mut Formatter<'_>, ctx: &mut PrettyCtx<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(idx, param)| {
                let name = param.name.clone().unwrap_or_else(|| format!("arg{}", idx));
                if let Some(pointee) = &param.sret {
                    format!("{}: sret {}", name, pointee)
                } else {
                    format!("{}: {}", name, param.ty)
                }
            })
            .join(", ");
        let attrs = if self.attrs.is_empty() {
            String::new()
        } else {
            format!(
                " [attrs: {}]",
                self.attrs.iter().map(format_attr).join(", ")
            )
        };
        ctx.writeln(
            f,
            format!(
                "fn {}({}) -> {}{} {{",
                self.name, params, self.return_type, attrs
            ),
        )?;
        ctx.with_indent(|ctx| {
            for bb in &self.blocks {
                write_block(self, bb, f, ctx)?;
            }
            Ok(())
        })?;
        ctx.writeln(f, "}")
    }
}

fn format_attr(attr: &FnAttr) -> &'static str {
    match attr {
        FnAttr::FirvHarden => "firv-harden",
    }
}

fn write_block(
    func: &Function,
    bb: &BasicBlock,
    f: &mut Formatter<'_>,
    ctx: &mut PrettyCtx<'_>,
) -> fmt::Result {
    let entry_marker = if func.entry() == Some(bb.id) {
        " // entry"
    } else {
        ""
    };
    match &bb.label {
        Some(label) => ctx.writeln(f, format!("bb{} ({}):{}", bb.id, label, entry_marker))?,
        None => ctx.writeln(f, format!("bb{}:{}", bb.id, entry_marker))?,
    }
    ctx.with_indent(|ctx| {
        for inst in &bb.instructions {
            ctx.writeln(f, format_instruction(inst, ctx))?;
        }
        let mut line = format_terminator(&bb.terminator.kind);
        if ctx.options.show_debug_locs {
            if let Some(loc) = &bb.terminator.debug_loc {
                line.push_str(&format!(" @{}:{}:{}", loc.file, loc.line, loc.column));
            }
        }
        ctx.writeln(f, line)
    })
}

fn format_instruction(inst: &Instruction, ctx: &PrettyCtx<'_>) -> String {
    let body = match &inst.kind {
        InstKind::IntBin(op, lhs, rhs) => format!(
            "{} {} {}, {}",
            format_int_op(op),
            inst.ty,
            format_value(lhs),
            format_value(rhs)
        ),
        InstKind::FloatBin(op, lhs, rhs) => format!(
            "{} {} {}, {}",
            format_float_op(op),
            inst.ty,
            format_value(lhs),
            format_value(rhs)
        ),
        InstKind::ICmp(pred, lhs, rhs) => format!(
            "icmp {} {}, {}",
            format_int_pred(pred),
            format_value(lhs),
            format_value(rhs)
        ),
        InstKind::FCmp(pred, lhs, rhs) => format!(
            "fcmp {} {}, {}",
            format_float_pred(pred),
            format_value(lhs),
            format_value(rhs)
        ),
        InstKind::Alloca { allocated } => format!("alloca {}", allocated),
        InstKind::Load { ptr, volatile } => format!(
            "load{} {}, {}",
            if *volatile { " volatile" } else { "" },
            inst.ty,
            format_value(ptr)
        ),
        InstKind::Store {
            value,
            ptr,
            volatile,
        } => format!(
            "store{} {}, {}",
            if *volatile { " volatile" } else { "" },
            format_value(value),
            format_value(ptr)
        ),
        InstKind::Gep {
            base_ty,
            ptr,
            indices,
        } => format!(
            "gep {}, {} [{}]",
            base_ty,
            format_value(ptr),
            indices.iter().map(format_value).join(", ")
        ),
        InstKind::ExtractValue { aggregate, indices } => format!(
            "extractvalue {} [{}]",
            format_value(aggregate),
            indices.iter().map(|idx| idx.to_string()).join(", ")
        ),
        InstKind::MemCpy {
            dest,
            src,
            bytes,
            volatile,
        } => format!(
            "memcpy{} {}, {}, {} bytes",
            if *volatile { " volatile" } else { "" },
            format_value(dest),
            format_value(src),
            bytes
        ),
        InstKind::Call { target, args } => {
            let callee = match target {
                CallTarget::Function(name) => format!("@{}", name),
                CallTarget::Intrinsic(intrinsic) => format!("@intrinsic.{}", intrinsic.name()),
            };
            format!(
                "call {} {}({})",
                inst.ty,
                callee,
                args.iter().map(format_value).join(", ")
            )
        }
        InstKind::Phi { incoming } => format!(
            "phi {} {}",
            inst.ty,
            incoming
                .iter()
                .map(|(value, block)| format!("[{}, bb{}]", format_value(value), block))
                .join(", ")
        ),
    };

    let mut line = if inst.has_result() {
        format!("%{} = {}", inst.id, body)
    } else {
        body
    };
    if ctx.options.show_names {
        if let Some(name) = &inst.name {
            line.push_str(&format!(" // {}", name));
        }
    }
    if ctx.options.show_debug_locs {
        if let Some(loc) = &inst.debug_loc {
            line.push_str(&format!(" @{}:{}:{}", loc.file, loc.line, loc.column));
        }
    }
    line
}

fn format_terminator(kind: &TermKind) -> String {
    match kind {
        TermKind::Return(None) => "ret void".to_string(),
        TermKind::Return(Some(value)) => format!("ret {}", format_value(value)),
        TermKind::Br(target) => format!("br bb{}", target),
        TermKind::CondBr {
            condition,
            if_true,
            if_false,
            weights,
        } => {
            let mut line = format!(
                "br {}, bb{}, bb{}",
                format_value(condition),
                if_true,
                if_false
            );
            if let Some((taken, not_taken)) = weights {
                line.push_str(&format!(" !prof ({}, {})", taken, not_taken));
            }
            line
        }
        TermKind::Unreachable => "unreachable".to_string(),
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Reg(id) => format!("%{}", id),
        Value::Arg(idx) => format!("arg{}", idx),
        Value::Const(constant) => format_constant(constant),
    }
}

fn format_constant(constant: &Constant) -> String {
    match constant {
        Constant::Int(value, ty) => format!("{} {}", ty, value),
        Constant::Float(value, ty) => format!("{} {}", ty, value),
        Constant::Bool(value) => format!("i1 {}", value),
        Constant::Struct(fields, _) => {
            format!("{{{}}}", fields.iter().map(format_constant).join(", "))
        }
        Constant::Array(elements, _) => {
            format!("[{}]", elements.iter().map(format_constant).join(", "))
        }
        Constant::Undef(ty) => format!("{} undef", ty),
    }
}

fn format_int_op(op: &IntBinOp) -> &'static str {
    match op {
        IntBinOp::Add => "add",
        IntBinOp::Sub => "sub",
        IntBinOp::Mul => "mul",
        IntBinOp::And => "and",
        IntBinOp::Or => "or",
        IntBinOp::Xor => "xor",
    }
}

fn format_float_op(op: &FloatBinOp) -> &'static str {
    match op {
        FloatBinOp::FAdd => "fadd",
        FloatBinOp::FSub => "fsub",
        FloatBinOp::FMul => "fmul",
        FloatBinOp::FDiv => "fdiv",
    }
}

fn format_int_pred(pred: &IntPredicate) -> &'static str {
    match pred {
        IntPredicate::Eq => "eq",
        IntPredicate::Ne => "ne",
        IntPredicate::Slt => "slt",
        IntPredicate::Sle => "sle",
        IntPredicate::Sgt => "sgt",
        IntPredicate::Sge => "sge",
    }
}

fn format_float_pred(pred: &FloatPredicate) -> &'static str {
    match pred {
        FloatPredicate::Oeq => "oeq",
        FloatPredicate::One => "one",
        FloatPredicate::Olt => "olt",
        FloatPredicate::Ogt => "ogt",
    }
}
