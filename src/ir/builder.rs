use super::{BasicBlock, BlockId, ExternId, Function, Instr, Operand, Terminator, Type, ValueId};

/// Appends instructions to the block it is positioned at.
pub struct IrBuilder {
    function: Function,
    current: BlockId,
}

impl IrBuilder {
    /// Starts a function with an empty `entry` block
    pub fn new(name: impl Into<String>, ret: Type) -> IrBuilder {
        let mut builder = IrBuilder {
            function: Function {
                name: name.into(),
                ret,
                blocks: vec![],
                value_count: 0,
            },
            current: BlockId(0),
        };
        builder.current = builder.append_block("entry");
        builder
    }

    pub fn append_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(BasicBlock {
            label: label.into(),
            instrs: vec![],
            terminator: None,
        });
        id
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    fn block_mut(&mut self) -> &mut BasicBlock {
        &mut self.function.blocks[self.current.0 as usize]
    }

    fn fresh(&mut self) -> ValueId {
        let value = ValueId(self.function.value_count);
        self.function.value_count += 1;
        value
    }

    fn push(&mut self, instr: Instr) {
        let block = self.block_mut();
        debug_assert!(block.terminator.is_none(), "appending to terminated block {}", block.label);
        block.instrs.push(instr);
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = self.block_mut();
        debug_assert!(block.terminator.is_none(), "block {} terminated twice", block.label);
        block.terminator = Some(terminator);
    }

    pub fn alloca(&mut self, ty: Type, count: u32) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Alloca { dst, ty, count });
        dst
    }

    pub fn load(&mut self, ty: Type, ptr: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Load {
            dst,
            ty,
            ptr: ptr.into(),
        });
        dst
    }

    pub fn store(&mut self, ty: Type, value: impl Into<Operand>, ptr: impl Into<Operand>) {
        self.push(Instr::Store {
            ty,
            value: value.into(),
            ptr: ptr.into(),
        });
    }

    pub fn add(&mut self, ty: Type, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Add {
            dst,
            ty,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    pub fn sub(&mut self, ty: Type, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Sub {
            dst,
            ty,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    pub fn icmp_eq(
        &mut self,
        ty: Type,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::ICmpEq {
            dst,
            ty,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    pub fn select(
        &mut self,
        ty: Type,
        cond: impl Into<Operand>,
        then: impl Into<Operand>,
        otherwise: impl Into<Operand>,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Select {
            dst,
            ty,
            cond: cond.into(),
            then: then.into(),
            otherwise: otherwise.into(),
        });
        dst
    }

    pub fn zext(&mut self, from: Type, to: Type, value: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::ZExt {
            dst,
            from,
            to,
            value: value.into(),
        });
        dst
    }

    pub fn trunc(&mut self, from: Type, to: Type, value: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Trunc {
            dst,
            from,
            to,
            value: value.into(),
        });
        dst
    }

    pub fn gep(
        &mut self,
        base: impl Into<Operand>,
        index_ty: Type,
        index: impl Into<Operand>,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Gep {
            dst,
            base: base.into(),
            index_ty,
            index: index.into(),
        });
        dst
    }

    /// `ret` decides whether the call yields a value
    /// Calls a primitive that returns a value
    pub fn call(&mut self, callee: ExternId, args: Vec<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Instr::Call {
            dst: Some(dst),
            callee,
            args,
        });
        dst
    }

    pub fn call_void(&mut self, callee: ExternId, args: Vec<Operand>) {
        self.push(Instr::Call {
            dst: None,
            callee,
            args,
        });
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: impl Into<Operand>, then: BlockId, otherwise: BlockId) {
        self.terminate(Terminator::CondBr {
            cond: cond.into(),
            then,
            otherwise,
        });
    }

    pub fn ret(&mut self, value: impl Into<Operand>) {
        self.terminate(Terminator::Ret(value.into()));
    }

    pub fn finish(self) -> Function {
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_values_in_order() {
        let mut builder = IrBuilder::new("main", Type::I32);
        let slot = builder.alloca(Type::I16, 1);
        builder.store(Type::I16, Operand::int(Type::I16, 0), slot);
        let value = builder.load(Type::I16, slot);
        builder.ret(Operand::int(Type::I32, 0));

        let function = builder.finish();
        assert_eq!(slot, ValueId(0));
        assert_eq!(value, ValueId(1));
        assert_eq!(function.value_count, 2);
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].instrs.len(), 3);
    }

    #[test]
    fn void_calls_have_no_result() {
        let mut builder = IrBuilder::new("main", Type::I32);
        builder.call_void(ExternId(0), vec![]);
        assert_eq!(builder.call(ExternId(1), vec![]), ValueId(0));
        builder.ret(Operand::int(Type::I32, 0));

        let function = builder.finish();
        assert_eq!(function.value_count, 1);
        assert!(matches!(function.blocks[0].instrs[0], Instr::Call { dst: None, .. }));
    }

    #[test]
    fn positions_between_blocks() {
        let mut builder = IrBuilder::new("main", Type::I32);
        let next = builder.append_block("next");
        builder.br(next);
        builder.position_at_end(next);
        builder.ret(Operand::int(Type::I32, 0));

        let function = builder.finish();
        assert_eq!(function.blocks[0].terminator, Some(Terminator::Br(next)));
        assert_eq!(function.blocks[1].label, "next");
    }
}
