use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{Function, Instr, Module, Operand, Terminator, Type, ValueId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("entry function `{0}` is not defined")]
    UndefinedEntry(String),

    #[error("function `{0}` has no blocks")]
    EmptyFunction(String),

    #[error("block `{block}` has no terminator")]
    UnterminatedBlock { block: String },

    #[error("block `{block}` branches to missing block {target}")]
    UnknownBlock { block: String, target: u32 },

    #[error("value %{value} is defined more than once")]
    DuplicateValue { value: u32 },

    #[error("block `{block}` uses undefined value %{value}")]
    UndefinedValue { block: String, value: u32 },

    #[error("block `{block}` expected {expected} but found {found}")]
    TypeMismatch { block: String, expected: Type, found: Type },

    #[error("block `{block}` calls undeclared primitive {callee}")]
    UnknownCallee { block: String, callee: u32 },

    #[error("call to `{callee}` passes {found} arguments, expected {expected}")]
    ArgumentCount { callee: String, expected: usize, found: usize },

    #[error("value %{value} is outside of the {count} values the function declares")]
    ValueOutOfRange { value: u32, count: u32 },

    #[error("block `{block}` uses %{value} where its definition doesn't always run first")]
    UseBeforeDefinition { block: String, value: u32 },
}

/// Structural checks an engine runs before accepting a module
pub fn verify(module: &Module) -> Result<(), VerifyError> {
    if module.function(&module.entry).is_none() {
        return Err(VerifyError::UndefinedEntry(module.entry.clone()));
    }
    for function in &module.functions {
        FunctionVerifier::new(module, function)?.run()?;
    }
    Ok(())
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    function: &'a Function,
    types: HashMap<ValueId, Type>,
    /// Block and instruction index of every definition
    sites: HashMap<ValueId, (usize, usize)>,
}

impl<'a> FunctionVerifier<'a> {
    /// Collects the type of every defined value up front, blocks may be laid
    /// out in any order
    fn new(module: &'a Module, function: &'a Function) -> Result<Self, VerifyError> {
        let mut types = HashMap::new();
        let mut sites = HashMap::new();
        let instrs = function.blocks.iter().enumerate().flat_map(|(block, b)| {
            b.instrs
                .iter()
                .enumerate()
                .map(move |(index, instr)| ((block, index), instr))
        });
        for (site, instr) in instrs {
            let Some(dst) = instr.dst() else { continue };
            if dst.0 >= function.value_count {
                return Err(VerifyError::ValueOutOfRange {
                    value: dst.0,
                    count: function.value_count,
                });
            }
            sites.insert(dst, site);
            let ty = match instr {
                Instr::Alloca { .. } | Instr::Gep { .. } => Type::Ptr,
                Instr::Load { ty, .. }
                | Instr::Add { ty, .. }
                | Instr::Sub { ty, .. }
                | Instr::Select { ty, .. } => *ty,
                Instr::ICmpEq { .. } => Type::I1,
                Instr::ZExt { to, .. } | Instr::Trunc { to, .. } => *to,
                Instr::Call { callee, .. } => module
                    .extern_decl(*callee)
                    .map(|decl| decl.ret)
                    .unwrap_or(Type::Void),
                Instr::Store { .. } => continue,
            };
            if types.insert(dst, ty).is_some() {
                return Err(VerifyError::DuplicateValue { value: dst.0 });
            }
        }

        Ok(FunctionVerifier {
            module,
            function,
            types,
            sites,
        })
    }

    fn run(&self) -> Result<(), VerifyError> {
        if self.function.blocks.is_empty() {
            return Err(VerifyError::EmptyFunction(self.function.name.clone()));
        }
        for block in &self.function.blocks {
            let label = block.label.as_str();
            for instr in &block.instrs {
                self.instr(label, instr)?;
            }
            match &block.terminator {
                None => {
                    return Err(VerifyError::UnterminatedBlock {
                        block: label.to_string(),
                    })
                }
                Some(terminator) => self.terminator(label, terminator)?,
            }
        }
        self.definitions_dominate_uses()
    }

    /// Every use must be preceded by its definition on all paths from the
    /// entry block. Blocks that can't be reached are never run and skipped.
    fn definitions_dominate_uses(&self) -> Result<(), VerifyError> {
        let dominators = Dominators::new(self.function);
        for (use_block, block) in self.function.blocks.iter().enumerate() {
            if !dominators.is_reachable(use_block) {
                continue;
            }
            let uses = block
                .instrs
                .iter()
                .enumerate()
                .flat_map(|(index, instr)| operands(instr).into_iter().map(move |op| (index, op)))
                .chain(
                    block
                        .terminator
                        .iter()
                        .filter_map(|terminator| match terminator {
                            Terminator::Br(_) => None,
                            Terminator::CondBr { cond, .. } => Some(*cond),
                            Terminator::Ret(value) => Some(*value),
                        })
                        .map(|op| (block.instrs.len(), op)),
                );
            for (use_index, operand) in uses {
                let Operand::Value(value) = operand else { continue };
                let Some(&(def_block, def_index)) = self.sites.get(&value) else {
                    // already reported as undefined
                    continue;
                };
                let ordered = if def_block == use_block {
                    def_index < use_index
                } else {
                    dominators.dominates(def_block, use_block)
                };
                if !ordered {
                    return Err(VerifyError::UseBeforeDefinition {
                        block: block.label.clone(),
                        value: value.0,
                    });
                }
            }
        }
        Ok(())
    }

    fn type_of(&self, block: &str, operand: &Operand) -> Result<Type, VerifyError> {
        match operand {
            Operand::Const(ty, _) => Ok(*ty),
            Operand::Value(value) => {
                self.types
                    .get(value)
                    .copied()
                    .ok_or_else(|| VerifyError::UndefinedValue {
                        block: block.to_string(),
                        value: value.0,
                    })
            }
        }
    }

    fn expect(&self, block: &str, operand: &Operand, expected: Type) -> Result<(), VerifyError> {
        let found = self.type_of(block, operand)?;
        if found != expected {
            return Err(VerifyError::TypeMismatch {
                block: block.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn expect_integer(&self, block: &str, ty: Type) -> Result<(), VerifyError> {
        if ty.is_integer() {
            Ok(())
        } else {
            Err(VerifyError::TypeMismatch {
                block: block.to_string(),
                expected: Type::I64,
                found: ty,
            })
        }
    }

    fn instr(&self, block: &str, instr: &Instr) -> Result<(), VerifyError> {
        match instr {
            Instr::Alloca { ty, .. } => {
                self.expect_integer(block, *ty)?;
            }
            Instr::Load { ty, ptr, .. } => {
                self.expect_integer(block, *ty)?;
                self.expect(block, ptr, Type::Ptr)?;
            }
            Instr::Store { ty, value, ptr } => {
                self.expect(block, value, *ty)?;
                self.expect(block, ptr, Type::Ptr)?;
            }
            Instr::Add { ty, lhs, rhs, .. }
            | Instr::Sub { ty, lhs, rhs, .. }
            | Instr::ICmpEq { ty, lhs, rhs, .. } => {
                self.expect_integer(block, *ty)?;
                self.expect(block, lhs, *ty)?;
                self.expect(block, rhs, *ty)?;
            }
            Instr::Select {
                ty,
                cond,
                then,
                otherwise,
                ..
            } => {
                self.expect(block, cond, Type::I1)?;
                self.expect(block, then, *ty)?;
                self.expect(block, otherwise, *ty)?;
            }
            Instr::ZExt { from, to, value, .. } | Instr::Trunc { from, to, value, .. } => {
                self.expect(block, value, *from)?;
                let widens = matches!(instr, Instr::ZExt { .. });
                match (from.bits(), to.bits()) {
                    (Some(from_bits), Some(to_bits))
                        if (widens && from_bits < to_bits) || (!widens && from_bits > to_bits) => {}
                    _ => {
                        return Err(VerifyError::TypeMismatch {
                            block: block.to_string(),
                            expected: *from,
                            found: *to,
                        })
                    }
                }
            }
            Instr::Gep {
                base,
                index_ty,
                index,
                ..
            } => {
                self.expect(block, base, Type::Ptr)?;
                self.expect_integer(block, *index_ty)?;
                self.expect(block, index, *index_ty)?;
            }
            Instr::Call { dst, callee, args } => {
                let decl = self
                    .module
                    .extern_decl(*callee)
                    .ok_or_else(|| VerifyError::UnknownCallee {
                        block: block.to_string(),
                        callee: callee.0,
                    })?;
                if decl.params.len() != args.len() {
                    return Err(VerifyError::ArgumentCount {
                        callee: decl.name.clone(),
                        expected: decl.params.len(),
                        found: args.len(),
                    });
                }
                for (arg, ty) in args.iter().zip(&decl.params) {
                    self.expect(block, arg, *ty)?;
                }
                // a void call can't produce a value
                if dst.is_some() && decl.ret == Type::Void {
                    return Err(VerifyError::TypeMismatch {
                        block: block.to_string(),
                        expected: Type::Void,
                        found: Type::I32,
                    });
                }
            }
        }
        Ok(())
    }

    fn terminator(&self, block: &str, terminator: &Terminator) -> Result<(), VerifyError> {
        for target in terminator.successors() {
            if self.function.block(target).is_none() {
                return Err(VerifyError::UnknownBlock {
                    block: block.to_string(),
                    target: target.0,
                });
            }
        }
        match terminator {
            Terminator::Br(_) => Ok(()),
            Terminator::CondBr { cond, .. } => self.expect(block, cond, Type::I1),
            Terminator::Ret(value) => self.expect(block, value, self.function.ret),
        }
    }
}

fn operands(instr: &Instr) -> Vec<Operand> {
    match instr {
        Instr::Alloca { .. } => vec![],
        Instr::Load { ptr, .. } => vec![*ptr],
        Instr::Store { value, ptr, .. } => vec![*value, *ptr],
        Instr::Add { lhs, rhs, .. }
        | Instr::Sub { lhs, rhs, .. }
        | Instr::ICmpEq { lhs, rhs, .. } => vec![*lhs, *rhs],
        Instr::Select {
            cond,
            then,
            otherwise,
            ..
        } => vec![*cond, *then, *otherwise],
        Instr::ZExt { value, .. } | Instr::Trunc { value, .. } => vec![*value],
        Instr::Gep { base, index, .. } => vec![*base, *index],
        Instr::Call { args, .. } => args.clone(),
    }
}

/// Dominator tree of the blocks reachable from the entry block, built
/// without recursion since loop nesting can be arbitrarily deep.
struct Dominators {
    idom: Vec<Option<usize>>,
    /// Pre and post order numbers in the dominator tree
    enter: Vec<usize>,
    leave: Vec<usize>,
}

impl Dominators {
    fn new(function: &Function) -> Dominators {
        let count = function.blocks.len();
        let successors: Vec<Vec<usize>> = function
            .blocks
            .iter()
            .map(|block| {
                block
                    .terminator
                    .iter()
                    .flat_map(Terminator::successors)
                    .map(|target| target.0 as usize)
                    .collect()
            })
            .collect();

        // reverse postorder of the reachable blocks
        let mut order = Vec::with_capacity(count);
        let mut visited = vec![false; count];
        let mut stack = vec![(0, 0)];
        visited[0] = true;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            match successors[block].get(next) {
                Some(&successor) => {
                    top.1 += 1;
                    if !visited[successor] {
                        visited[successor] = true;
                        stack.push((successor, 0));
                    }
                }
                None => {
                    order.push(block);
                    stack.pop();
                }
            }
        }
        order.reverse();

        let mut rank = vec![usize::MAX; count];
        for (position, &block) in order.iter().enumerate() {
            rank[block] = position;
        }
        let mut predecessors = vec![vec![]; count];
        for &block in &order {
            for &successor in &successors[block] {
                predecessors[successor].push(block);
            }
        }

        // Cooper, Harvey and Kennedy's iterative algorithm
        let mut idom: Vec<Option<usize>> = vec![None; count];
        idom[0] = Some(0);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom = None;
                for &pred in &predecessors[block] {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rank, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block] != new_idom {
                    idom[block] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![vec![]; count];
        for &block in order.iter().skip(1) {
            if let Some(parent) = idom[block] {
                children[parent].push(block);
            }
        }
        let mut enter = vec![0; count];
        let mut leave = vec![0; count];
        let mut clock = 0;
        let mut stack = vec![(0, 0)];
        enter[0] = clock;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            match children[block].get(next) {
                Some(&child) => {
                    top.1 += 1;
                    clock += 1;
                    enter[child] = clock;
                    stack.push((child, 0));
                }
                None => {
                    clock += 1;
                    leave[block] = clock;
                    stack.pop();
                }
            }
        }

        Dominators { idom, enter, leave }
    }

    fn is_reachable(&self, block: usize) -> bool {
        self.idom[block].is_some()
    }

    /// Whether every path from the entry to `block` passes through `dominator`
    fn dominates(&self, dominator: usize, block: usize) -> bool {
        self.is_reachable(dominator)
            && self.is_reachable(block)
            && self.enter[dominator] <= self.enter[block]
            && self.leave[block] <= self.leave[dominator]
    }
}

fn intersect(idom: &[Option<usize>], rank: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while rank[a] > rank[b] {
            a = idom[a].unwrap_or(0);
        }
        while rank[b] > rank[a] {
            b = idom[b].unwrap_or(0);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::ir::BlockId;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn module(source: &str) -> Module {
        generate(&parse(&tokenize(source)))
    }

    #[test]
    fn generated_modules_verify() {
        for source in ["", "+-<>.,", "[-]", "+[>[-]<-]", "[["] {
            assert_eq!(verify(&module(source)), Ok(()), "{source}");
        }
    }

    #[test]
    fn rejects_missing_entry() {
        let mut module = module("+");
        module.entry = "start".to_string();
        assert_eq!(verify(&module), Err(VerifyError::UndefinedEntry("start".to_string())));
    }

    #[test]
    fn rejects_unterminated_blocks() {
        let mut module = module("+");
        module.functions[0].blocks[0].terminator = None;
        assert_eq!(
            verify(&module),
            Err(VerifyError::UnterminatedBlock {
                block: "entry".to_string()
            })
        );
    }

    #[test]
    fn rejects_unknown_branch_targets() {
        let mut module = module("[-]");
        module.functions[0].blocks[0].terminator = Some(Terminator::Br(BlockId(42)));
        assert!(matches!(
            verify(&module),
            Err(VerifyError::UnknownBlock { target: 42, .. })
        ));
    }

    #[test]
    fn rejects_type_mismatches() {
        let mut module = module("+");
        module.functions[0].blocks[0].terminator =
            Some(Terminator::Ret(Operand::int(Type::I8, 0)));
        assert!(matches!(
            verify(&module),
            Err(VerifyError::TypeMismatch {
                expected: Type::I32,
                found: Type::I8,
                ..
            })
        ));
    }

    #[test]
    fn rejects_undefined_values() {
        let mut module = module("+");
        module.functions[0].blocks[0].terminator =
            Some(Terminator::Ret(Operand::Value(ValueId(999))));
        assert!(matches!(
            verify(&module),
            Err(VerifyError::UndefinedValue { value: 999, .. })
        ));
    }

    #[test]
    fn rejects_values_outside_the_function() {
        let mut module = module("+");
        module.functions[0].value_count = 1;
        assert!(matches!(
            verify(&module),
            Err(VerifyError::ValueOutOfRange { value: 1, count: 1 })
        ));
    }

    #[test]
    fn rejects_uses_before_definition_in_a_block() {
        let mut module = module("+");
        module.functions[0].blocks[0].instrs.swap(0, 1);
        assert!(matches!(
            verify(&module),
            Err(VerifyError::UseBeforeDefinition { value: 0, .. })
        ));
    }

    #[test]
    fn rejects_uses_of_values_from_a_loop_body() {
        // loop0.body doesn't run when the guard is already zero, so the exit
        // block can't rely on anything it defines
        let mut module = module("[+]");
        let function = &mut module.functions[0];
        assert_eq!(function.blocks[2].label, "loop0.body");
        let cell = function.blocks[2]
            .instrs
            .iter()
            .find_map(|instr| match instr {
                Instr::Gep { dst, .. } => Some(*dst),
                _ => None,
            })
            .unwrap();
        function.blocks[3].instrs.push(Instr::Store {
            ty: Type::I8,
            value: Operand::int(Type::I8, 0),
            ptr: cell.into(),
        });
        assert_eq!(
            verify(&module),
            Err(VerifyError::UseBeforeDefinition {
                block: "loop0.exit".to_string(),
                value: cell.0
            })
        );
    }

    #[test]
    fn deep_nesting_verifies() {
        let depth = 20_000;
        let source = format!("{}-{}", "[".repeat(depth), "]".repeat(depth));
        let tree = crate::parser::parse_iterative(&tokenize(&source));
        let module = crate::codegen::generate_iterative(&tree);
        assert_eq!(verify(&module), Ok(()));
    }

    #[test]
    fn rejects_undeclared_primitives() {
        let mut module = module(".");
        module.externs.truncate(1);
        assert!(matches!(
            verify(&module),
            Err(VerifyError::UnknownCallee { callee: 1, .. })
        ));
    }
}
