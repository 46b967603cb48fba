//! Hand assembly of compiled methods.
//!
//! The core receives compiled code from collaborators; the bootstrap, the
//! CLI demos, and the tests assemble theirs here instead of carrying a
//! compiler.

use bytecode::CodeBuilder;
use object::{CompiledBlock, CompiledMethod, Value};

/// Builds a [`CompiledMethod`]: counts, literal pool, nested blocks, and
/// the instruction body.
pub struct MethodBuilder {
    name: String,
    num_args: u8,
    num_temps: u8,
    max_stack: u8,
    primitive: Option<u16>,
    error_temp: Option<u16>,
    literals: Vec<Value>,
    blocks: Vec<CompiledBlock>,
}

impl MethodBuilder {
    pub fn new(name: &str, num_args: u8) -> MethodBuilder {
        MethodBuilder {
            name: name.to_string(),
            num_args,
            num_temps: 0,
            max_stack: 8,
            primitive: None,
            error_temp: None,
            literals: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn temps(mut self, num_temps: u8) -> MethodBuilder {
        self.num_temps = num_temps;
        self
    }

    pub fn max_stack(mut self, max_stack: u8) -> MethodBuilder {
        self.max_stack = max_stack;
        self
    }

    /// Bind a primitive id; the bytecode body becomes the fallback.
    pub fn primitive(mut self, index: usize) -> MethodBuilder {
        self.primitive = Some(index as u16);
        self
    }

    /// Temp slot that receives the primitive failure reason.
    pub fn error_temp(mut self, slot: u16) -> MethodBuilder {
        self.error_temp = Some(slot);
        self
    }

    /// Add a literal, returning its pool index.
    pub fn literal(&mut self, value: Value) -> u16 {
        if let Some(index) = self.literals.iter().position(|v| *v == value) {
            return index as u16;
        }
        self.literals.push(value);
        (self.literals.len() - 1) as u16
    }

    /// Add a nested block, returning its block index.
    pub fn block(&mut self, block: CompiledBlock) -> u16 {
        self.blocks.push(block);
        (self.blocks.len() - 1) as u16
    }

    /// Assemble the body and finish the method.
    pub fn body(self, build: impl FnOnce(&mut CodeBuilder)) -> CompiledMethod {
        let mut code = CodeBuilder::new();
        build(&mut code);
        CompiledMethod {
            name: self.name,
            num_args: self.num_args,
            num_temps: self.num_temps,
            max_stack: self.max_stack,
            primitive: self.primitive,
            error_temp: self.error_temp,
            literals: self.literals.into(),
            instructions: code.into_instructions(),
            blocks: self.blocks.into(),
        }
    }
}

/// Assemble a [`CompiledBlock`] body.
pub fn block(
    num_args: u8,
    num_copied: u8,
    num_temps: u8,
    max_stack: u8,
    build: impl FnOnce(&mut CodeBuilder),
) -> CompiledBlock {
    let mut code = CodeBuilder::new();
    build(&mut code);
    CompiledBlock {
        num_args,
        num_copied,
        num_temps,
        max_stack,
        instructions: code.into_instructions(),
    }
}
