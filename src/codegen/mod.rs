//! Lowers a parsed [`Tree`] into an IR [`Module`].
//!
//! The generated entry function owns a zero filled byte tape and a 16 bit
//! index register, both allocated on entry. Loops are emitted test first:
//!
//! ```text
//!   br test
//! test:
//!   cell == 0 ? br exit : br body
//! body:
//!   ...children
//!   br test
//! exit:
//! ```

use log::{debug, warn};

use crate::ir::{BlockId, ExternDecl, ExternId, IrBuilder, Module, Operand, Type, ValueId};
use crate::parser::{NodeId, NodeKind, Tree};

/// `void bzero(ptr, i64)`
pub const ZERO_FILL: &str = "bzero";
/// `i32 putchar(i32)`
pub const WRITE_BYTE: &str = "putchar";
/// `i32 getchar()`
pub const READ_BYTE: &str = "getchar";

/// What `getchar` returns once input is exhausted
pub const END_OF_INPUT: i64 = -1;

pub const INDEX_TYPE: Type = Type::I16;
pub const CELL_TYPE: Type = Type::I8;
pub const DEFAULT_TAPE_SIZE: u32 = 1 << 16;

const ZERO_FILL_ID: ExternId = ExternId(0);
const WRITE_BYTE_ID: ExternId = ExternId(1);
const READ_BYTE_ID: ExternId = ExternId(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Bytes in the tape, the index register still wraps at 2^16
    pub tape_size: u32,
    pub entry_name: String,
    pub module_name: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            tape_size: DEFAULT_TAPE_SIZE,
            entry_name: "main".to_string(),
            module_name: "brainfc".to_string(),
        }
    }
}

/// Primitives every generated module imports, in [`ExternId`] order
pub fn primitives() -> Vec<ExternDecl> {
    vec![
        ExternDecl {
            name: ZERO_FILL.to_string(),
            ret: Type::Void,
            params: vec![Type::Ptr, Type::I64],
        },
        ExternDecl {
            name: WRITE_BYTE.to_string(),
            ret: Type::I32,
            params: vec![Type::I32],
        },
        ExternDecl {
            name: READ_BYTE.to_string(),
            ret: Type::I32,
            params: vec![],
        },
    ]
}

struct Generator<'a> {
    tree: &'a Tree,
    options: &'a CodegenOptions,
    builder: IrBuilder,
    tape: ValueId,
    index: ValueId,
    loops: usize,
}

/// Loop blocks whose test still needs its branch once the body is done
struct OpenLoop {
    test: BlockId,
    body: BlockId,
    is_zero: ValueId,
    number: usize,
}

enum Frame {
    Visit(NodeId),
    Close(OpenLoop),
}

impl<'a> Generator<'a> {
    fn new(tree: &'a Tree, options: &'a CodegenOptions) -> Generator<'a> {
        let mut builder = IrBuilder::new(options.entry_name.as_str(), Type::I32);

        let index = builder.alloca(INDEX_TYPE, 1);
        builder.store(INDEX_TYPE, Operand::int(INDEX_TYPE, 0), index);

        let tape = builder.alloca(CELL_TYPE, options.tape_size);
        builder.call_void(
            ZERO_FILL_ID,
            vec![tape.into(), Operand::int(Type::I64, options.tape_size as i64)],
        );

        Generator {
            tree,
            options,
            builder,
            tape,
            index,
            loops: 0,
        }
    }

    fn tape_location(&mut self) -> ValueId {
        let index = self.builder.load(INDEX_TYPE, self.index);
        let index = self.builder.zext(INDEX_TYPE, Type::I32, index);
        self.builder.gep(self.tape, Type::I32, index)
    }

    fn add_to_cell(&mut self, decrement: bool) {
        let location = self.tape_location();
        let value = self.builder.load(CELL_TYPE, location);
        let one = Operand::int(CELL_TYPE, 1);
        let value = if decrement {
            self.builder.sub(CELL_TYPE, value, one)
        } else {
            self.builder.add(CELL_TYPE, value, one)
        };
        self.builder.store(CELL_TYPE, value, location);
    }

    fn move_index(&mut self, left: bool) {
        let index = self.builder.load(INDEX_TYPE, self.index);
        let one = Operand::int(INDEX_TYPE, 1);
        let index = if left {
            self.builder.sub(INDEX_TYPE, index, one)
        } else {
            self.builder.add(INDEX_TYPE, index, one)
        };
        self.builder.store(INDEX_TYPE, index, self.index);
    }

    fn output(&mut self) {
        let location = self.tape_location();
        let value = self.builder.load(CELL_TYPE, location);
        let value = self.builder.zext(CELL_TYPE, Type::I32, value);
        self.builder.call(WRITE_BYTE_ID, vec![value.into()]);
    }

    fn input(&mut self) {
        let location = self.tape_location();
        let read = self.builder.call(READ_BYTE_ID, vec![]);
        let is_eof = self
            .builder
            .icmp_eq(Type::I32, read, Operand::int(Type::I32, END_OF_INPUT));
        let byte = self.builder.trunc(Type::I32, CELL_TYPE, read);
        let value = self
            .builder
            .select(CELL_TYPE, is_eof, Operand::int(CELL_TYPE, 0), byte);
        self.builder.store(CELL_TYPE, value, location);
    }

    /// Emits the test block and leaves the builder inside the body
    fn open_loop(&mut self) -> OpenLoop {
        let number = self.loops;
        self.loops += 1;

        let test = self.builder.append_block(format!("loop{number}.test"));
        self.builder.br(test);
        self.builder.position_at_end(test);
        let location = self.tape_location();
        let value = self.builder.load(CELL_TYPE, location);
        let is_zero = self
            .builder
            .icmp_eq(CELL_TYPE, value, Operand::int(CELL_TYPE, 0));

        let body = self.builder.append_block(format!("loop{number}.body"));
        self.builder.position_at_end(body);
        OpenLoop {
            test,
            body,
            is_zero,
            number,
        }
    }

    /// Jumps back to the test and continues in the exit block
    fn close_loop(&mut self, open: OpenLoop) {
        self.builder.br(open.test);
        let exit = self.builder.append_block(format!("loop{}.exit", open.number));
        self.builder.position_at_end(open.test);
        self.builder.cond_br(open.is_zero, exit, open.body);
        self.builder.position_at_end(exit);
    }

    fn leaf(&mut self, kind: NodeKind) {
        match kind {
            NodeKind::Increment => self.add_to_cell(false),
            NodeKind::Decrement => self.add_to_cell(true),
            NodeKind::MoveRight => self.move_index(false),
            NodeKind::MoveLeft => self.move_index(true),
            NodeKind::Output => self.output(),
            NodeKind::Input => self.input(),
            NodeKind::Program { .. } | NodeKind::Loop { .. } => {}
        }
    }

    fn emit(&mut self, id: NodeId) {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::Program { .. } => {
                for &child in tree.children(id) {
                    self.emit(child);
                }
            }
            NodeKind::Loop { .. } => {
                let open = self.open_loop();
                for &child in tree.children(id) {
                    self.emit(child);
                }
                self.close_loop(open);
            }
            leaf => self.leaf(leaf),
        }
    }

    fn emit_iterative(&mut self, root: NodeId) {
        let tree = self.tree;
        let mut stack = vec![Frame::Visit(root)];
        while let Some(frame) = stack.pop() {
            let id = match frame {
                Frame::Visit(id) => id,
                Frame::Close(open) => {
                    self.close_loop(open);
                    continue;
                }
            };
            match tree.kind(id) {
                NodeKind::Program { .. } => {}
                NodeKind::Loop { .. } => {
                    let open = self.open_loop();
                    stack.push(Frame::Close(open));
                }
                leaf => self.leaf(leaf),
            }
            stack.extend(tree.children(id).iter().rev().map(|&child| Frame::Visit(child)));
        }
    }

    fn finish(mut self) -> Module {
        self.builder.ret(Operand::int(Type::I32, 0));
        let function = self.builder.finish();
        debug!(
            "generated {} blocks and {} instructions for `{}`",
            function.blocks.len(),
            function.instruction_count(),
            function.name
        );
        Module {
            name: self.options.module_name.clone(),
            externs: primitives(),
            entry: function.name.clone(),
            functions: vec![function],
        }
    }
}

fn warn_unclosed(tree: &Tree) {
    if tree.has_unclosed_loop() {
        warn!("generating code for a loop without a `]`, closing it at the end of input");
    }
}

pub fn generate(tree: &Tree) -> Module {
    generate_with(tree, &CodegenOptions::default())
}

/// Recursion depth follows loop nesting, see [`generate_iterative_with`] for deep programs
pub fn generate_with(tree: &Tree, options: &CodegenOptions) -> Module {
    warn_unclosed(tree);
    let mut generator = Generator::new(tree, options);
    generator.emit(tree.root());
    generator.finish()
}

pub fn generate_iterative(tree: &Tree) -> Module {
    generate_iterative_with(tree, &CodegenOptions::default())
}

pub fn generate_iterative_with(tree: &Tree, options: &CodegenOptions) -> Module {
    warn_unclosed(tree);
    let mut generator = Generator::new(tree, options);
    generator.emit_iterative(tree.root());
    generator.finish()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::ir::{Instr, Terminator};
    use crate::lexer::tokenize;
    use crate::parser::{parse, parse_iterative};

    fn module(source: &str) -> Module {
        generate(&parse(&tokenize(source)))
    }

    #[test]
    fn declares_primitives_and_entry() {
        let module = module("");
        let names: Vec<&str> = module.externs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![ZERO_FILL, WRITE_BYTE, READ_BYTE]);
        assert_eq!(module.entry, "main");

        let main = module.function("main").unwrap();
        assert_eq!(main.blocks.len(), 1);
        assert_eq!(
            main.blocks[0].instrs[..2],
            [
                Instr::Alloca {
                    dst: ValueId(0),
                    ty: Type::I16,
                    count: 1
                },
                Instr::Store {
                    ty: Type::I16,
                    value: Operand::int(Type::I16, 0),
                    ptr: ValueId(0).into()
                },
            ]
        );
        assert!(main.blocks[0].instrs.contains(&Instr::Alloca {
            dst: ValueId(1),
            ty: Type::I8,
            count: DEFAULT_TAPE_SIZE
        }));
        assert_eq!(
            main.blocks[0].terminator,
            Some(Terminator::Ret(Operand::int(Type::I32, 0)))
        );
    }

    #[rstest]
    #[case("+-><.,", 1)]
    #[case("[-]", 4)]
    #[case("[[]]", 7)]
    #[case("[][]", 7)]
    #[case("[", 4)]
    fn block_counts(#[case] source: &str, #[case] blocks: usize) {
        assert_eq!(module(source).block_count(), blocks);
    }

    #[test]
    fn loops_test_before_body() {
        let module = module("[-]+");
        let main = module.function("main").unwrap();
        let labels: Vec<&str> = main.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["entry", "loop0.test", "loop0.body", "loop0.exit"]);

        let (test, body, exit) = (BlockId(1), BlockId(2), BlockId(3));
        assert_eq!(main.blocks[0].terminator, Some(Terminator::Br(test)));
        match &main.blocks[1].terminator {
            Some(Terminator::CondBr { then, otherwise, .. }) => {
                assert_eq!((*then, *otherwise), (exit, body));
            }
            other => panic!("unexpected terminator {:?}", other),
        }
        assert_eq!(main.blocks[2].terminator, Some(Terminator::Br(test)));
        assert!(matches!(main.blocks[3].terminator, Some(Terminator::Ret(_))));
        // the `+` after the loop lands in the exit block
        assert!(!main.blocks[3].instrs.is_empty());
    }

    #[test]
    fn reads_select_zero_at_end_of_input() {
        let module = module(",");
        let main = module.function("main").unwrap();
        assert!(main.blocks[0].instrs.iter().any(|instr| matches!(
            instr,
            Instr::ICmpEq {
                ty: Type::I32,
                rhs: Operand::Const(Type::I32, END_OF_INPUT),
                ..
            }
        )));
        assert!(main.blocks[0]
            .instrs
            .iter()
            .any(|instr| matches!(instr, Instr::Select { ty: Type::I8, .. })));
        assert!(main.blocks[0].instrs.iter().any(|instr| matches!(
            instr,
            Instr::Call {
                dst: Some(_),
                callee: READ_BYTE_ID,
                ..
            }
        )));
    }

    #[test]
    fn respects_options() {
        let options = CodegenOptions {
            tape_size: 30_000,
            entry_name: "bf_main".to_string(),
            module_name: "test".to_string(),
        };
        let module = generate_with(&parse(&tokenize("+")), &options);
        assert_eq!(module.entry, "bf_main");
        assert!(module.function("bf_main").is_some());
        assert!(module.to_string().contains("alloca i8, 30000"));
    }

    #[test]
    fn deterministic() {
        let tree = parse(&tokenize("++[>+[-]<-]>."));
        assert_eq!(generate(&tree), generate(&tree));
    }

    #[rstest]
    #[case("")]
    #[case("+[->+<]>.")]
    #[case("[[[-]>]<]")]
    #[case(",[.,]")]
    #[case("[[+")]
    fn iterative_matches_recursive(#[case] source: &str) {
        let tree = parse(&tokenize(source));
        assert_eq!(generate(&tree), generate_iterative(&tree));
    }

    #[test]
    fn iterative_handles_deep_nesting() {
        let depth = 50_000;
        let source = format!("{}-{}", "[".repeat(depth), "]".repeat(depth));
        let module = generate_iterative(&parse_iterative(&tokenize(&source)));
        assert_eq!(module.block_count(), 1 + 3 * depth);
    }

    #[test]
    fn prints_textual_ir() {
        let text = module("+[.]").to_string();
        assert!(text.contains("declare void @bzero(ptr, i64)"));
        assert!(text.contains("define i32 @main() {"));
        assert!(text.contains("loop0.test:"));
        assert!(text.contains("call i32 @putchar(i32 %"));
        assert!(text.contains("br i1 %"));
        assert!(text.ends_with("ret i32 0\n}\n"));
    }
}
