pub mod tree_interpreter;

use std::io::{self, Read, Write};

use crate::codegen::DEFAULT_TAPE_SIZE;
use crate::jit::RuntimeError;

pub use tree_interpreter::TreeInterpreter;

/// Machine state the same way generated code sees it: a byte tape and a
/// 16 bit data pointer that both wrap.
pub struct Runtime {
    /// Index into the tape
    data_pointer: u16,

    /// Our statically allocated tape
    tape: Vec<u8>,

    in_stream: Box<dyn Read>,
    out_stream: Box<dyn Write>,
}

impl Runtime {
    pub fn new(tape_size: usize, in_stream: Box<dyn Read>, out_stream: Box<dyn Write>) -> Self {
        Self {
            data_pointer: 0,
            tape: vec![0; tape_size],
            in_stream,
            out_stream,
        }
    }

    pub fn with_default_tape(in_stream: Box<dyn Read>, out_stream: Box<dyn Write>) -> Self {
        Runtime::new(DEFAULT_TAPE_SIZE as usize, in_stream, out_stream)
    }

    pub fn reset(&mut self) {
        self.tape.fill(0);
        self.data_pointer = 0;
    }

    pub fn data_pointer(&self) -> u16 {
        self.data_pointer
    }

    /// Read one byte into the current cell, end of input stores 0
    pub fn read(&mut self) -> Result<(), RuntimeError> {
        let cell = self.check_data_pointer()?;
        let mut byte = [0u8; 1];
        let value = loop {
            match self.in_stream.read(&mut byte) {
                Ok(0) => break 0,
                Ok(_) => break byte[0],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.tape[cell] = value;
        Ok(())
    }

    /// Write the current cell to the output stream
    pub fn write(&mut self) -> Result<(), RuntimeError> {
        let cell = self.check_data_pointer()?;
        self.out_stream.write_all(&self.tape[cell..cell + 1])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RuntimeError> {
        self.out_stream.flush()?;
        Ok(())
    }

    pub fn deref_and_add_value(&mut self, by: u8) -> Result<(), RuntimeError> {
        let cell = self.check_data_pointer()?;
        self.tape[cell] = self.tape[cell].wrapping_add(by);
        Ok(())
    }

    pub fn deref_and_sub_value(&mut self, by: u8) -> Result<(), RuntimeError> {
        let cell = self.check_data_pointer()?;
        self.tape[cell] = self.tape[cell].wrapping_sub(by);
        Ok(())
    }

    pub fn shift_data_pointer(&mut self, by: i16) {
        self.data_pointer = self.data_pointer.wrapping_add_signed(by);
        // we don't check that the data pointer is valid on shifts
        // we only check that it's valid once it's read/written to
    }

    /// is the value at the data pointer zero?
    pub fn value_is_zero(&self) -> Result<bool, RuntimeError> {
        let cell = self.check_data_pointer()?;
        Ok(self.tape[cell] == 0)
    }

    /// check if the data pointer is within bounds
    fn check_data_pointer(&self) -> Result<usize, RuntimeError> {
        let cell = self.data_pointer as usize;
        if cell >= self.tape.len() {
            return Err(RuntimeError::OutOfBounds {
                offset: cell as i64,
                len: 1,
                size: self.tape.len(),
            });
        }
        Ok(cell)
    }
}
