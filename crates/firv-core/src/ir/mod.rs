pub mod builder;
pub mod clone;
pub mod layout;
pub mod pretty;
pub mod ty;
pub mod verify;


pub use builder::Builder;
pub use ty::Ty;

/// SSA register ids. Each instruction that produces a value defines the
/// register with its own id.
pub type RegId = u32;
pub type BlockId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of the instruction with the same id.
    Reg(RegId),
    /// Incoming function argument, by position.
    Arg(u32),
    Const(Constant),
}

impl Value {
    pub fn const_i32(value: i32) -> Value {
        Value::Const(Constant::Int(value as i64, Ty::I32))
    }

    pub fn const_i64(value: i64) -> Value {
        Value::Const(Constant::Int(value, Ty::I64))
    }

    pub fn const_f64(value: f64) -> Value {
        Value::Const(Constant::Float(value, Ty::F64))
    }

    pub fn const_bool(value: bool) -> Value {
        Value::Const(Constant::Bool(value))
    }

    pub fn as_reg(&self) -> Option<RegId> {
        match self {
            Value::Reg(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64, Ty),
    Float(f64, Ty),
    Bool(bool),
    Struct(Vec<Constant>, Ty),
    Array(Vec<Constant>, Ty),
    Undef(Ty),
}

impl Constant {
    pub fn ty(&self) -> Ty {
        match self {
            Constant::Int(_, ty) => ty.clone(),
            Constant::Float(_, ty) => ty.clone(),
            Constant::Bool(_) => Ty::I1,
            Constant::Struct(_, ty) => ty.clone(),
            Constant::Array(_, ty) => ty.clone(),
            Constant::Undef(ty) => ty.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    /// Ordered equality: false if either operand is NaN.
    Oeq,
    One,
    Olt,
    Ogt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// Immediate, non-recoverable abort.
    Trap,
}

impl Intrinsic {
    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::Trap => "trap",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Function(String),
    Intrinsic(Intrinsic),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    IntBin(IntBinOp, Value, Value),
    FloatBin(FloatBinOp, Value, Value),
    ICmp(IntPredicate, Value, Value),
    FCmp(FloatPredicate, Value, Value),
    Alloca {
        allocated: Ty,
    },
    Load {
        ptr: Value,
        volatile: bool,
    },
    Store {
        value: Value,
        ptr: Value,
        volatile: bool,
    },
    /// Typed pointer arithmetic. The leading index scales the base pointer,
    /// trailing indices walk into the aggregate.
    Gep {
        base_ty: Ty,
        ptr: Value,
        indices: Vec<Value>,
    },
    ExtractValue {
        aggregate: Value,
        indices: Vec<u32>,
    },
    MemCpy {
        dest: Value,
        src: Value,
        bytes: u64,
        volatile: bool,
    },
    Call {
        target: CallTarget,
        args: Vec<Value>,
    },
    Phi {
        incoming: Vec<(Value, BlockId)>,
    },
}

impl InstKind {
    /// Mutable references to every value operand, phi inputs, call
    /// arguments and gep indices included.
    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::IntBin(_, lhs, rhs)
            | InstKind::FloatBin(_, lhs, rhs)
            | InstKind::ICmp(_, lhs, rhs)
            | InstKind::FCmp(_, lhs, rhs) => vec![lhs, rhs],
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Gep { ptr, indices, .. } => {
                let mut out = vec![ptr];
                out.extend(indices.iter_mut());
                out
            }
            InstKind::ExtractValue { aggregate, .. } => vec![aggregate],
            InstKind::MemCpy { dest, src, .. } => vec![dest, src],
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(value, _)| value).collect(),
        }
    }

    pub fn values(&self) -> Vec<&Value> {
        match self {
            InstKind::IntBin(_, lhs, rhs)
            | InstKind::FloatBin(_, lhs, rhs)
            | InstKind::ICmp(_, lhs, rhs)
            | InstKind::FCmp(_, lhs, rhs) => vec![lhs, rhs],
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Gep { ptr, indices, .. } => {
                let mut out = vec![ptr];
                out.extend(indices.iter());
                out
            }
            InstKind::ExtractValue { aggregate, .. } => vec![aggregate],
            InstKind::MemCpy { dest, src, .. } => vec![dest, src],
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::Phi { incoming } => incoming.iter().map(|(value, _)| value).collect(),
        }
    }
}

/// Source location carried by an instruction, preserved verbatim by cloning
/// and block rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl DebugLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: RegId,
    pub kind: InstKind,
    /// Result type; `Void` for instructions that produce no value.
    pub ty: Ty,
    pub name: Option<String>,
    pub debug_loc: Option<DebugLoc>,
}

impl Instruction {
    pub fn has_result(&self) -> bool {
        !self.ty.is_void()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    Return(Option<Value>),
    Br(BlockId),
    CondBr {
        condition: Value,
        if_true: BlockId,
        if_false: BlockId,
        /// Branch-weight metadata `(if_true, if_false)` consumed by layout
        /// heuristics.
        weights: Option<(u32, u32)>,
    },
    Unreachable,
}

impl TermKind {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TermKind::Return(_) | TermKind::Unreachable => Vec::new(),
            TermKind::Br(target) => vec![*target],
            TermKind::CondBr {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
        }
    }

    /// Successor slots for rewiring. Unconditional branches have one slot,
    /// conditional branches two.
    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            TermKind::Return(_) | TermKind::Unreachable => Vec::new(),
            TermKind::Br(target) => vec![target],
            TermKind::CondBr {
                if_true, if_false, ..
            } => vec![if_true, if_false],
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            TermKind::Return(Some(value)) => vec![value],
            TermKind::CondBr { condition, .. } => vec![condition],
            _ => Vec::new(),
        }
    }

    pub fn values(&self) -> Vec<&Value> {
        match self {
            TermKind::Return(Some(value)) => vec![value],
            TermKind::CondBr { condition, .. } => vec![condition],
            _ => Vec::new(),
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, TermKind::Return(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Terminator {
    pub kind: TermKind,
    pub debug_loc: Option<DebugLoc>,
}

impl Terminator {
    pub fn unreachable() -> Self {
        Self {
            kind: TermKind::Unreachable,
            debug_loc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: Option<String>,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: Option<String>) -> Self {
        Self {
            id,
            label,
            instructions: Vec::new(),
            terminator: Terminator::unreachable(),
        }
    }
}

/// Function attribute set entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnAttr {
    /// Opt-in marker for fault-injection resilience hardening.
    FirvHarden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Ty,
    /// Struct-return marker: the parameter is a pointer to a caller-owned
    /// buffer of the carried type, which is the function's logical result.
    pub sret: Option<Ty>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            sret: None,
        }
    }

    pub fn sret(name: impl Into<String>, pointee: Ty) -> Self {
        Self {
            name: Some(name.into()),
            ty: pointee.clone().ptr_to(),
            sret: Some(pointee),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Ty,
    pub attrs: Vec<FnAttr>,
    pub blocks: Vec<BasicBlock>,
    entry: Option<BlockId>,
    next_reg: RegId,
    next_block: BlockId,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, return_type: Ty) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            attrs: Vec::new(),
            blocks: Vec::new(),
            entry: None,
            next_reg: 0,
            next_block: 0,
        }
    }

    pub fn has_attr(&self, attr: FnAttr) -> bool {
        self.attrs.contains(&attr)
    }

    pub fn add_attr(&mut self, attr: FnAttr) {
        if !self.has_attr(attr) {
            self.attrs.push(attr);
        }
    }

    /// The struct-return parameter, if any, with its index.
    pub fn sret_param(&self) -> Option<(u32, &Param)> {
        self.params
            .iter()
            .enumerate()
            .find(|(_, param)| param.sret.is_some())
            .map(|(idx, param)| (idx as u32, param))
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.entry.and_then(|id| self.block(id))
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|bb| bb.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|bb| bb.id == id)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|bb| bb.id).collect()
    }

    pub fn fresh_reg(&mut self) -> RegId {
        let id = self.next_reg;
        self.next_reg += 1;
        id
    }

    /// Append a new empty block (terminator `Unreachable`). The first block
    /// ever added becomes the entry.
    pub fn add_block(&mut self, label: Option<String>) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.push(BasicBlock::new(id, label));
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Create a new block and make it the function entry, placing it first
    /// in iteration order. The caller is responsible for terminating it with
    /// a branch to the previous entry.
    pub fn add_entry_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.insert(0, BasicBlock::new(id, Some(label.into())));
        self.entry = Some(id);
        id
    }

    /// Find the instruction defining a register.
    pub fn instruction(&self, reg: RegId) -> Option<&Instruction> {
        self.blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter())
            .find(|inst| inst.id == reg)
    }

    /// Block containing the definition of a register.
    pub fn defining_block(&self, reg: RegId) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|bb| bb.instructions.iter().any(|inst| inst.id == reg))
            .map(|bb| bb.id)
    }

    /// Static type of a value, when derivable.
    pub fn value_type(&self, value: &Value) -> Option<Ty> {
        match value {
            Value::Reg(reg) => self.instruction(*reg).map(|inst| inst.ty.clone()),
            Value::Arg(idx) => self.params.get(*idx as usize).map(|param| param.ty.clone()),
            Value::Const(constant) => Some(constant.ty()),
        }
    }

    /// Replace every use of argument `arg` with `new`, except uses inside
    /// `exclude`. Mirrors the argument-rematerialization contract: the block
    /// that spills the argument keeps referring to the argument itself.
    pub fn replace_arg_uses_outside(&mut self, arg: u32, new: &Value, exclude: BlockId) {
        for bb in &mut self.blocks {
            if bb.id == exclude {
                continue;
            }
            for inst in &mut bb.instructions {
                for operand in inst.kind.values_mut() {
                    if matches!(operand, Value::Arg(idx) if *idx == arg) {
                        *operand = new.clone();
                    }
                }
            }
            for operand in bb.terminator.kind.values_mut() {
                if matches!(operand, Value::Arg(idx) if *idx == arg) {
                    *operand = new.clone();
                }
            }
        }
    }

    /// Predecessor map derived from terminators.
    pub fn predecessors(&self) -> std::collections::HashMap<BlockId, Vec<BlockId>> {
        let mut preds: std::collections::HashMap<BlockId, Vec<BlockId>> =
            std::collections::HashMap::new();
        for bb in &self.blocks {
            for succ in bb.terminator.kind.successors() {
                preds.entry(succ).or_default().push(bb.id);
            }
        }
        preds
    }

    /// Blocks reachable from the entry, in breadth-first order.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from([entry]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(bb) = self.block(id) {
                for succ in bb.terminator.kind.successors() {
                    if !seen.contains(&succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        order
    }
}
