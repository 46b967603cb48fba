use bytecode::Instruction;

use crate::heap::ObjectRef;
use crate::value::Value;

/// A compiled method: a fixed array of decoded instructions, the literal
/// pool shared with its blocks, static frame sizing, and the optional
/// primitive binding.
///
/// `primitive` indexes the VM's closed primitive table; when set, the
/// interpreter attempts the primitive before the bytecode body, which runs
/// only on primitive failure. `error_temp` names the temp slot that
/// receives the failure reason so the fallback body can observe it.
pub struct CompiledMethod {
    pub name: String,
    pub num_args: u8,
    pub num_temps: u8,
    pub max_stack: u8,
    pub primitive: Option<u16>,
    pub error_temp: Option<u16>,
    pub literals: Box<[Value]>,
    pub instructions: Box<[Instruction]>,
    pub blocks: Box<[CompiledBlock]>,
}

/// A block body nested in a method. Blocks share the owning method's
/// literal pool and are referenced by index from `PushClosure`.
pub struct CompiledBlock {
    pub num_args: u8,
    pub num_copied: u8,
    pub num_temps: u8,
    pub max_stack: u8,
    pub instructions: Box<[Instruction]>,
}

/// Identifies executing code: a method, or one of its blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeRef {
    pub method: ObjectRef,
    pub block: Option<u16>,
}

impl CodeRef {
    pub fn method(method: ObjectRef) -> CodeRef {
        CodeRef {
            method,
            block: None,
        }
    }

    pub fn block(method: ObjectRef, index: u16) -> CodeRef {
        CodeRef {
            method,
            block: Some(index),
        }
    }

    #[inline]
    pub fn is_block(self) -> bool {
        self.block.is_some()
    }
}
