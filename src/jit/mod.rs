//! The execution boundary: an [`ExecutionEngine`] takes a generated
//! [`Module`], verifies it, resolves the entry function and runs it.

use log::debug;
use thiserror::Error;

use crate::ir::Module;

mod engine;
mod verify;

pub use engine::{IrEngine, RuntimeError};
pub use verify::{verify, VerifyError};

/// A function an engine can invoke, only valid for the engine that returned it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(pub usize);

#[derive(Error, Debug)]
pub enum JitError {
    /// The module was rejected, retrying won't help
    #[error("module failed verification: {0}")]
    Verification(#[from] VerifyError),

    #[error("unresolved external symbol `{0}`")]
    UnresolvedSymbol(String),

    #[error("entry function `{0}` not found")]
    MissingEntry(String),

    #[error("program trapped: {0}")]
    Runtime(#[from] RuntimeError),
}

pub trait ExecutionEngine {
    /// Verifies the module and makes its functions available to [`ExecutionEngine::lookup`]
    fn add_module(&mut self, module: Module) -> Result<(), JitError>;

    fn lookup(&self, name: &str) -> Option<EntryPoint>;

    /// Runs a parameterless function to completion and returns its status
    fn invoke(&mut self, entry: EntryPoint) -> Result<i32, JitError>;
}

/// Hands `module` to `engine` and runs its entry function once.
pub fn execute<E: ExecutionEngine + ?Sized>(
    engine: &mut E,
    module: Module,
) -> Result<i32, JitError> {
    let name = module.entry.clone();
    engine.add_module(module)?;
    let entry = engine
        .lookup(&name)
        .ok_or_else(|| JitError::MissingEntry(name.clone()))?;
    debug!("invoking `{}`", name);
    let status = engine.invoke(entry)?;
    debug!("`{}` returned {}", name, status);
    Ok(status)
}
