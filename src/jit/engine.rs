use std::io::{self, Read, Write};

use log::{debug, trace};
use num_traits::{WrappingAdd, WrappingSub};
use thiserror::Error;

use crate::codegen::{END_OF_INPUT, READ_BYTE, WRITE_BYTE, ZERO_FILL};
use crate::ir::{ExternDecl, Function, Instr, Module, Operand, Terminator, Type, ValueId};

use super::{verify, EntryPoint, ExecutionEngine, JitError};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("access of {len} bytes at offset {offset} is outside an allocation of {size} bytes")]
    OutOfBounds { offset: i64, len: usize, size: usize },

    #[error("expected an integer but found a pointer")]
    NotAnInteger,

    #[error("expected a pointer but found an integer")]
    NotAPointer,

    #[error("value %{0} was read before it was written")]
    Uninitialized(u32),

    #[error("{0} can't be loaded or stored")]
    Unstorable(Type),

    #[error("I/O error in a host primitive")]
    Io(#[from] io::Error),
}

/// Host functions the primitives bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Host {
    ZeroFill,
    WriteByte,
    ReadByte,
}

impl Host {
    fn resolve(decl: &ExternDecl) -> Option<Host> {
        let (host, ret, params): (Host, Type, &[Type]) = match decl.name.as_str() {
            ZERO_FILL => (Host::ZeroFill, Type::Void, &[Type::Ptr, Type::I64]),
            WRITE_BYTE => (Host::WriteByte, Type::I32, &[Type::I32]),
            READ_BYTE => (Host::ReadByte, Type::I32, &[]),
            _ => return None,
        };
        (decl.ret == ret && decl.params == params).then_some(host)
    }
}

/// Flattened function body, terminators become absolute jumps
#[derive(Debug, Clone)]
enum Op {
    Instr(Instr),
    Jump(usize),
    Branch { cond: Operand, then: usize, otherwise: usize },
    Return(Operand),
}

#[derive(Debug)]
struct CompiledFunction {
    name: String,
    ops: Vec<Op>,
    hosts: Vec<Host>,
    value_count: usize,
}

fn lower(function: &Function, hosts: Vec<Host>) -> CompiledFunction {
    let mut starts = Vec::with_capacity(function.blocks.len());
    let mut next = 0;
    for block in &function.blocks {
        starts.push(next);
        next += block.instrs.len() + 1;
    }

    let mut ops = Vec::with_capacity(next);
    for block in &function.blocks {
        ops.extend(block.instrs.iter().cloned().map(Op::Instr));
        // verified modules always have a terminator and valid targets
        ops.push(match &block.terminator {
            Some(Terminator::Br(target)) => Op::Jump(starts[target.0 as usize]),
            Some(Terminator::CondBr {
                cond,
                then,
                otherwise,
            }) => Op::Branch {
                cond: *cond,
                then: starts[then.0 as usize],
                otherwise: starts[otherwise.0 as usize],
            },
            Some(Terminator::Ret(value)) => Op::Return(*value),
            None => Op::Return(Operand::int(function.ret, 0)),
        });
    }
    trace!("lowered `{}` into {} ops", function.name, ops.len());

    CompiledFunction {
        name: function.name.clone(),
        ops,
        hosts,
        value_count: function.value_count as usize,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Val {
    /// Zero extended to the width of its type
    Int(i64),
    Ptr { alloc: usize, offset: i64 },
}

/// Keeps only the low bits of `ty`
fn normalize(ty: Type, value: i64) -> i64 {
    match ty {
        Type::I1 => value & 1,
        Type::I8 => value as u8 as i64,
        Type::I16 => value as u16 as i64,
        Type::I32 => value as u32 as i64,
        _ => value,
    }
}

fn wrapping<T: WrappingAdd + WrappingSub>(subtract: bool, lhs: T, rhs: T) -> T {
    if subtract {
        lhs.wrapping_sub(&rhs)
    } else {
        lhs.wrapping_add(&rhs)
    }
}

fn arithmetic(ty: Type, subtract: bool, lhs: i64, rhs: i64) -> i64 {
    match ty {
        Type::I1 => wrapping(subtract, lhs as u8, rhs as u8) as i64 & 1,
        Type::I8 => wrapping(subtract, lhs as u8, rhs as u8) as i64,
        Type::I16 => wrapping(subtract, lhs as u16, rhs as u16) as i64,
        Type::I32 => wrapping(subtract, lhs as u32, rhs as u32) as i64,
        _ => wrapping(subtract, lhs, rhs),
    }
}

/// Registers and memory of one invocation
struct Frame {
    values: Vec<Option<Val>>,
    memory: Vec<Vec<u8>>,
}

impl Frame {
    fn new(value_count: usize) -> Frame {
        Frame {
            values: vec![None; value_count],
            memory: vec![],
        }
    }

    fn get(&self, operand: &Operand) -> Result<Val, RuntimeError> {
        match operand {
            Operand::Const(ty, value) => Ok(Val::Int(normalize(*ty, *value))),
            Operand::Value(id) => self
                .values
                .get(id.0 as usize)
                .copied()
                .flatten()
                .ok_or(RuntimeError::Uninitialized(id.0)),
        }
    }

    fn int(&self, operand: &Operand) -> Result<i64, RuntimeError> {
        match self.get(operand)? {
            Val::Int(value) => Ok(value),
            Val::Ptr { .. } => Err(RuntimeError::NotAnInteger),
        }
    }

    fn ptr(&self, operand: &Operand) -> Result<(usize, i64), RuntimeError> {
        match self.get(operand)? {
            Val::Ptr { alloc, offset } => Ok((alloc, offset)),
            Val::Int(_) => Err(RuntimeError::NotAPointer),
        }
    }

    fn set(&mut self, dst: ValueId, value: Val) {
        if let Some(slot) = self.values.get_mut(dst.0 as usize) {
            *slot = Some(value);
        }
    }

    fn bytes(&mut self, ptr: &Operand, len: usize) -> Result<&mut [u8], RuntimeError> {
        let (alloc, offset) = self.ptr(ptr)?;
        let memory = &mut self.memory[alloc];
        let size = memory.len();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start.checked_add(len).is_some_and(|end| end <= size))
            .ok_or(RuntimeError::OutOfBounds { offset, len, size })?;
        Ok(&mut memory[start..start + len])
    }

    fn load(&mut self, ty: Type, ptr: &Operand) -> Result<i64, RuntimeError> {
        let len = ty.size().ok_or(RuntimeError::Unstorable(ty))?;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(self.bytes(ptr, len)?);
        Ok(normalize(ty, i64::from_le_bytes(buf)))
    }

    fn store(&mut self, ty: Type, value: i64, ptr: &Operand) -> Result<(), RuntimeError> {
        let len = ty.size().ok_or(RuntimeError::Unstorable(ty))?;
        self.bytes(ptr, len)?
            .copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }
}

/// Streams the I/O primitives are bound to
struct Io<R, W> {
    input: R,
    output: W,
}

impl<R: Read, W: Write> Io<R, W> {
    fn read_byte(&mut self) -> Result<i64, RuntimeError> {
        let mut byte = [0u8; 1];
        loop {
            return match self.input.read(&mut byte) {
                Ok(0) => Ok(END_OF_INPUT),
                Ok(_) => Ok(byte[0] as i64),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e.into()),
            };
        }
    }

    fn call(
        &mut self,
        frame: &mut Frame,
        host: Host,
        args: &[Operand],
    ) -> Result<Option<Val>, RuntimeError> {
        match (host, args) {
            (Host::ZeroFill, [ptr, len]) => {
                let len = usize::try_from(frame.int(len)?).unwrap_or(usize::MAX);
                frame.bytes(ptr, len)?.fill(0);
                Ok(None)
            }
            (Host::WriteByte, [value]) => {
                let value = frame.int(value)?;
                self.output.write_all(&[value as u8])?;
                Ok(Some(Val::Int(value)))
            }
            (Host::ReadByte, []) => {
                let value = self.read_byte()?;
                Ok(Some(Val::Int(normalize(Type::I32, value))))
            }
            // arity is checked by the verifier
            _ => Ok(None),
        }
    }
}

fn step<R: Read, W: Write>(
    io: &mut Io<R, W>,
    hosts: &[Host],
    frame: &mut Frame,
    instr: &Instr,
) -> Result<(), RuntimeError> {
    match instr {
        Instr::Alloca { dst, ty, count } => {
            let size = ty.size().ok_or(RuntimeError::Unstorable(*ty))? * *count as usize;
            frame.memory.push(vec![0; size]);
            let alloc = frame.memory.len() - 1;
            frame.set(*dst, Val::Ptr { alloc, offset: 0 });
        }
        Instr::Load { dst, ty, ptr } => {
            let value = frame.load(*ty, ptr)?;
            frame.set(*dst, Val::Int(value));
        }
        Instr::Store { ty, value, ptr } => {
            let value = frame.int(value)?;
            frame.store(*ty, value, ptr)?;
        }
        Instr::Add { dst, ty, lhs, rhs } | Instr::Sub { dst, ty, lhs, rhs } => {
            let subtract = matches!(instr, Instr::Sub { .. });
            let value = arithmetic(*ty, subtract, frame.int(lhs)?, frame.int(rhs)?);
            frame.set(*dst, Val::Int(value));
        }
        Instr::ICmpEq { dst, ty, lhs, rhs } => {
            let equal = normalize(*ty, frame.int(lhs)?) == normalize(*ty, frame.int(rhs)?);
            frame.set(*dst, Val::Int(equal as i64));
        }
        Instr::Select {
            dst,
            cond,
            then,
            otherwise,
            ..
        } => {
            let value = if frame.int(cond)? != 0 {
                frame.get(then)?
            } else {
                frame.get(otherwise)?
            };
            frame.set(*dst, value);
        }
        Instr::ZExt { dst, from, value, .. } => {
            let value = normalize(*from, frame.int(value)?);
            frame.set(*dst, Val::Int(value));
        }
        Instr::Trunc { dst, to, value, .. } => {
            let value = normalize(*to, frame.int(value)?);
            frame.set(*dst, Val::Int(value));
        }
        Instr::Gep {
            dst,
            base,
            index_ty,
            index,
        } => {
            let (alloc, offset) = frame.ptr(base)?;
            let index = normalize(*index_ty, frame.int(index)?);
            frame.set(
                *dst,
                Val::Ptr {
                    alloc,
                    offset: offset.wrapping_add(index),
                },
            );
        }
        Instr::Call { dst, callee, args } => {
            let host = hosts[callee.0 as usize];
            let result = io.call(frame, host, args)?;
            if let (Some(dst), Some(result)) = (dst, result) {
                frame.set(*dst, result);
            }
        }
    }
    Ok(())
}

/// Verifies modules, binds their primitives to host I/O and runs them.
pub struct IrEngine<R, W> {
    io: Io<R, W>,
    functions: Vec<CompiledFunction>,
}

impl<R: Read, W: Write> IrEngine<R, W> {
    pub fn new(input: R, output: W) -> Self {
        IrEngine {
            io: Io { input, output },
            functions: vec![],
        }
    }

    pub fn output(&self) -> &W {
        &self.io.output
    }

    pub fn into_output(self) -> W {
        self.io.output
    }

    fn run(&mut self, function: usize) -> Result<i32, RuntimeError> {
        let compiled = &self.functions[function];
        let io = &mut self.io;
        let mut frame = Frame::new(compiled.value_count);
        let mut pc = 0;
        loop {
            match &compiled.ops[pc] {
                Op::Instr(instr) => {
                    step(io, &compiled.hosts, &mut frame, instr)?;
                    pc += 1;
                }
                Op::Jump(target) => pc = *target,
                Op::Branch {
                    cond,
                    then,
                    otherwise,
                } => {
                    pc = if frame.int(cond)? != 0 { *then } else { *otherwise };
                }
                Op::Return(value) => return Ok(frame.int(value)? as u32 as i32),
            }
        }
    }
}

impl<R: Read, W: Write> ExecutionEngine for IrEngine<R, W> {
    fn add_module(&mut self, module: Module) -> Result<(), JitError> {
        verify(&module)?;

        let hosts = module
            .externs
            .iter()
            .map(|decl| {
                Host::resolve(decl).ok_or_else(|| JitError::UnresolvedSymbol(decl.name.clone()))
            })
            .collect::<Result<Vec<Host>, JitError>>()?;

        for function in &module.functions {
            self.functions.push(lower(function, hosts.clone()));
        }
        debug!(
            "added module `{}` with {} functions",
            module.name,
            module.functions.len()
        );
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<EntryPoint> {
        // later modules shadow earlier ones
        self.functions
            .iter()
            .rposition(|function| function.name == name)
            .map(EntryPoint)
    }

    fn invoke(&mut self, entry: EntryPoint) -> Result<i32, JitError> {
        if entry.0 >= self.functions.len() {
            return Err(JitError::MissingEntry(format!("#{}", entry.0)));
        }
        let status = self.run(entry.0);
        // flush whatever was written, even if the program trapped
        let flushed = self.io.output.flush();
        let status = status?;
        flushed.map_err(RuntimeError::from)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codegen::{generate, generate_with, CodegenOptions};
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn run(source: &str, input: &[u8]) -> (i32, Vec<u8>) {
        let mut engine = IrEngine::new(Cursor::new(input.to_vec()), Vec::new());
        engine.add_module(generate(&parse(&tokenize(source)))).unwrap();
        let entry = engine.lookup("main").unwrap();
        let status = engine.invoke(entry).unwrap();
        (status, engine.into_output())
    }

    #[test]
    fn wraps_cells() {
        assert_eq!(run("-.", b"").1, vec![255]);
        assert_eq!(run(&format!("{}.", "+".repeat(256)), b"").1, vec![0]);
    }

    #[test]
    fn wraps_index_register() {
        // cell 65535 then back to cell 0
        assert_eq!(run("<+.>.", b"").1, vec![1, 0]);
    }

    #[test]
    fn end_of_input_stores_zero() {
        assert_eq!(run("+,.", b"").1, vec![0]);
        assert_eq!(run(",.,.", b"A").1, vec![b'A', 0]);
    }

    #[test]
    fn loop_with_zero_guard_is_skipped() {
        assert_eq!(run("[.]+.", b"").1, vec![1]);
    }

    #[test]
    fn returns_zero() {
        assert_eq!(run("", b""), (0, vec![]));
    }

    #[test]
    fn short_tape_traps() {
        let options = CodegenOptions {
            tape_size: 4,
            ..CodegenOptions::default()
        };
        let mut engine = IrEngine::new(io::empty(), Vec::new());
        engine
            .add_module(generate_with(&parse(&tokenize(">>>>+")), &options))
            .unwrap();
        let entry = engine.lookup("main").unwrap();
        assert!(matches!(
            engine.invoke(entry),
            Err(JitError::Runtime(RuntimeError::OutOfBounds { offset: 4, .. }))
        ));
    }

    #[test]
    fn rejects_unknown_primitives() {
        let mut module = generate(&parse(&tokenize(".")));
        module.externs[1].name = "fputc".to_string();
        let mut engine = IrEngine::new(io::empty(), Vec::new());
        assert!(matches!(
            engine.add_module(module),
            Err(JitError::UnresolvedSymbol(name)) if name == "fputc"
        ));
        assert!(engine.lookup("main").is_none());
    }

    #[test]
    fn arithmetic_wraps_per_type() {
        assert_eq!(arithmetic(Type::I8, false, 255, 1), 0);
        assert_eq!(arithmetic(Type::I8, true, 0, 1), 255);
        assert_eq!(arithmetic(Type::I16, true, 0, 1), 65535);
        assert_eq!(arithmetic(Type::I16, false, 65535, 1), 0);
        assert_eq!(normalize(Type::I32, END_OF_INPUT), u32::MAX as i64);
    }
}
