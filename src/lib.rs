//! Compiler for the eight instruction tape language.
//!
//! Source text goes through [`tokenize`], [`parse`], [`analyze`] and
//! [`generate`], producing an IR [`Module`] that an [`ExecutionEngine`]
//! runs through [`execute`].

pub mod analysis;
pub mod codegen;
pub mod dfa;
pub mod interpreter;
pub mod ir;
pub mod jit;
pub mod lexer;
pub mod parser;

use log::debug;

pub use analysis::{analyze, Analyzer, Checks, Diagnostic, Issue, Severity};
pub use codegen::{
    generate, generate_iterative, generate_iterative_with, generate_with, CodegenOptions,
};
pub use interpreter::{Runtime, TreeInterpreter};
pub use ir::Module;
pub use jit::{execute, ExecutionEngine, IrEngine, JitError};
pub use lexer::{tokenize, Location, Token, TokenKind};
pub use parser::{parse, parse_iterative, Tree};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub codegen: CodegenOptions,
    pub checks: Checks,
}

/// Everything the front end produced for one source text
#[derive(Debug)]
pub struct Compilation {
    pub tokens: Vec<Token>,
    pub tree: Tree,
    pub diagnostics: Vec<Diagnostic>,
    pub module: Module,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity() == Severity::Error)
    }
}

/// Runs every stage up to code generation. Diagnostics never stop the
/// pipeline, callers decide what to do with them. No stage recurses, so
/// nesting depth is only bounded by memory.
pub fn compile(source: &str, options: &CompileOptions) -> Compilation {
    let tokens = tokenize(source);
    let tree = parse_iterative(&tokens);
    let diagnostics = Analyzer::new(options.checks).analyze(&tree);
    let module = generate_iterative_with(&tree, &options.codegen);
    debug!(
        "compiled {} tokens into {} nodes and {} blocks with {} diagnostics",
        tokens.len(),
        tree.len(),
        module.block_count(),
        diagnostics.len()
    );
    Compilation {
        tokens,
        tree,
        diagnostics,
        module,
    }
}
