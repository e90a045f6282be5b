use crate::jit::RuntimeError;
use crate::parser::{NodeId, NodeKind, Tree};

use super::Runtime;

/// Walks the tree directly, no code generation involved
#[derive(Default)]
pub struct TreeInterpreter {}

impl TreeInterpreter {
    pub fn new() -> Self {
        Self {}
    }

    /// Loops are kept on an explicit stack so nesting depth is only bounded by memory
    pub fn interpret(&mut self, runtime: &mut Runtime, tree: &Tree) -> Result<(), RuntimeError> {
        // the block being run and the index of its next child
        let mut frames: Vec<(NodeId, usize)> = vec![(tree.root(), 0)];

        while let Some(frame) = frames.last_mut() {
            let (block, next) = *frame;
            let Some(&instruction) = tree.children(block).get(next) else {
                // end of a block: loops test their guard again, the program just ends
                frames.pop();
                if tree.kind(block).is_loop() && !runtime.value_is_zero()? {
                    frames.push((block, 0));
                }
                continue;
            };
            frame.1 += 1;

            match tree.kind(instruction) {
                NodeKind::MoveRight => runtime.shift_data_pointer(1),
                NodeKind::MoveLeft => runtime.shift_data_pointer(-1),
                NodeKind::Increment => runtime.deref_and_add_value(1)?,
                NodeKind::Decrement => runtime.deref_and_sub_value(1)?,
                NodeKind::Output => runtime.write()?,
                NodeKind::Input => runtime.read()?,
                // an unclosed loop runs as if it was closed at the end of input
                NodeKind::Loop { .. } => {
                    if !runtime.value_is_zero()? {
                        frames.push((instruction, 0));
                    }
                }
                NodeKind::Program { .. } => {}
            }
        }

        runtime.flush()
    }
}
