//! A small control-flow graph IR.
//!
//! Values are numbered SSA style within a function, memory is only reached
//! through `alloca`ed pointers and every [`BasicBlock`] ends in exactly one
//! [`Terminator`].

use std::fmt;

pub mod builder;

pub use builder::IrBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    Ptr,
    Void,
}

impl Type {
    /// Width of an integer type
    pub fn bits(self) -> Option<u32> {
        match self {
            Type::I1 => Some(1),
            Type::I8 => Some(8),
            Type::I16 => Some(16),
            Type::I32 => Some(32),
            Type::I64 => Some(64),
            Type::Ptr | Type::Void => None,
        }
    }

    pub fn is_integer(self) -> bool {
        self.bits().is_some()
    }

    /// Bytes taken in memory, `None` for types that can't be stored
    pub fn size(self) -> Option<usize> {
        match self {
            Type::I1 | Type::I8 => Some(1),
            Type::I16 => Some(2),
            Type::I32 => Some(4),
            Type::I64 => Some(8),
            Type::Ptr | Type::Void => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Ptr => write!(f, "ptr"),
            Type::Void => write!(f, "void"),
            int => write!(f, "i{}", int.bits().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index into [`Module::externs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(ValueId),
    Const(Type, i64),
}

impl Operand {
    pub fn int(ty: Type, value: i64) -> Operand {
        Operand::Const(ty, value)
    }
}

impl From<ValueId> for Operand {
    fn from(value: ValueId) -> Self {
        Operand::Value(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(value) => write!(f, "{}", value),
            Operand::Const(_, value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Reserve `count` elements of `ty`, yields a pointer
    Alloca { dst: ValueId, ty: Type, count: u32 },
    Load { dst: ValueId, ty: Type, ptr: Operand },
    Store { ty: Type, value: Operand, ptr: Operand },

    /// Wrapping integer arithmetic
    Add { dst: ValueId, ty: Type, lhs: Operand, rhs: Operand },
    Sub { dst: ValueId, ty: Type, lhs: Operand, rhs: Operand },

    /// Yields an `i1`
    ICmpEq { dst: ValueId, ty: Type, lhs: Operand, rhs: Operand },
    Select { dst: ValueId, ty: Type, cond: Operand, then: Operand, otherwise: Operand },

    ZExt { dst: ValueId, from: Type, to: Type, value: Operand },
    Trunc { dst: ValueId, from: Type, to: Type, value: Operand },

    /// Byte offset from a pointer, `index` is treated as unsigned
    Gep { dst: ValueId, base: Operand, index_ty: Type, index: Operand },

    Call { dst: Option<ValueId>, callee: ExternId, args: Vec<Operand> },
}

impl Instr {
    pub fn dst(&self) -> Option<ValueId> {
        match self {
            Instr::Alloca { dst, .. }
            | Instr::Load { dst, .. }
            | Instr::Add { dst, .. }
            | Instr::Sub { dst, .. }
            | Instr::ICmpEq { dst, .. }
            | Instr::Select { dst, .. }
            | Instr::ZExt { dst, .. }
            | Instr::Trunc { dst, .. }
            | Instr::Gep { dst, .. } => Some(*dst),
            Instr::Call { dst, .. } => *dst,
            Instr::Store { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    /// Goes to `then` when `cond` is non-zero
    CondBr { cond: Operand, then: BlockId, otherwise: BlockId },
    Ret(Operand),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr { then, otherwise, .. } => vec![*then, *otherwise],
            Terminator::Ret(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: String,
    pub instrs: Vec<Instr>,
    /// Only `None` while the block is still being built
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
}

/// A parameterless function, execution starts at the first block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub blocks: Vec<BasicBlock>,
    /// Values are numbered `0..value_count`
    pub value_count: u32,
}

impl Function {
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.instrs.len() + 1).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub externs: Vec<ExternDecl>,
    pub functions: Vec<Function>,
    /// Function the driver invokes
    pub entry: String,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn extern_decl(&self, id: ExternId) -> Option<&ExternDecl> {
        self.externs.get(id.0 as usize)
    }

    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|function| function.blocks.len()).sum()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for decl in &self.externs {
            let params: Vec<String> = decl.params.iter().map(Type::to_string).collect();
            writeln!(f, "declare {} @{}({})", decl.ret, decl.name, params.join(", "))?;
        }
        for function in &self.functions {
            writeln!(f)?;
            writeln!(f, "define {} @{}() {{", function.ret, function.name)?;
            for block in &function.blocks {
                writeln!(f, "{}:", block.label)?;
                for instr in &block.instrs {
                    write!(f, "  ")?;
                    write_instr(f, self, instr)?;
                    writeln!(f)?;
                }
                match &block.terminator {
                    Some(terminator) => {
                        write!(f, "  ")?;
                        write_terminator(f, function, terminator)?;
                        writeln!(f)?;
                    }
                    None => writeln!(f, "  ; unterminated")?,
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

fn write_instr(f: &mut fmt::Formatter<'_>, module: &Module, instr: &Instr) -> fmt::Result {
    match instr {
        Instr::Alloca { dst, ty, count } => write!(f, "{dst} = alloca {ty}, {count}"),
        Instr::Load { dst, ty, ptr } => write!(f, "{dst} = load {ty}, ptr {ptr}"),
        Instr::Store { ty, value, ptr } => write!(f, "store {ty} {value}, ptr {ptr}"),
        Instr::Add { dst, ty, lhs, rhs } => write!(f, "{dst} = add {ty} {lhs}, {rhs}"),
        Instr::Sub { dst, ty, lhs, rhs } => write!(f, "{dst} = sub {ty} {lhs}, {rhs}"),
        Instr::ICmpEq { dst, ty, lhs, rhs } => write!(f, "{dst} = icmp eq {ty} {lhs}, {rhs}"),
        Instr::Select {
            dst,
            ty,
            cond,
            then,
            otherwise,
        } => write!(f, "{dst} = select i1 {cond}, {ty} {then}, {ty} {otherwise}"),
        Instr::ZExt { dst, from, to, value } => write!(f, "{dst} = zext {from} {value} to {to}"),
        Instr::Trunc { dst, from, to, value } => write!(f, "{dst} = trunc {from} {value} to {to}"),
        Instr::Gep {
            dst,
            base,
            index_ty,
            index,
        } => write!(f, "{dst} = getelementptr inbounds i8, ptr {base}, {index_ty} {index}"),
        Instr::Call { dst, callee, args } => {
            let (name, ret, params) = match module.extern_decl(*callee) {
                Some(decl) => (decl.name.as_str(), decl.ret, decl.params.as_slice()),
                None => ("<unknown>", Type::Void, &[][..]),
            };
            if let Some(dst) = dst {
                write!(f, "{dst} = ")?;
            }
            let args: Vec<String> = args
                .iter()
                .enumerate()
                .map(|(i, arg)| match params.get(i) {
                    Some(ty) => format!("{ty} {arg}"),
                    None => arg.to_string(),
                })
                .collect();
            write!(f, "call {ret} @{name}({})", args.join(", "))
        }
    }
}

fn write_terminator(
    f: &mut fmt::Formatter<'_>,
    function: &Function,
    terminator: &Terminator,
) -> fmt::Result {
    let label = |id: &BlockId| match function.block(*id) {
        Some(block) => block.label.clone(),
        None => format!("<block {}>", id.0),
    };
    match terminator {
        Terminator::Br(target) => write!(f, "br label %{}", label(target)),
        Terminator::CondBr {
            cond,
            then,
            otherwise,
        } => write!(f, "br i1 {cond}, label %{}, label %{}", label(then), label(otherwise)),
        Terminator::Ret(value) => write!(f, "ret {} {value}", function.ret),
    }
}
