pub mod builder;
pub mod instruction;

pub use builder::{CodeBuilder, Label};
pub use instruction::Instruction;
