use object::Value;

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::VM;

pub mod array;
pub mod block;
pub mod context;
pub mod float;
pub mod general;
pub mod large_integer;
pub mod small_integer;

pub type PrimitiveFn = fn(
    &mut VM,
    &mut InterpreterState,
    Value,
    &[Value],
) -> Result<PrimitiveOutcome, RuntimeError>;

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub name: &'static str,
    pub arity: u8,
    pub func: PrimitiveFn,
}

impl PrimitiveDesc {
    pub const fn new(name: &'static str, arity: u8, func: PrimitiveFn) -> Self {
        Self { name, arity, func }
    }
}

/// Reason code attached to a diagnosed primitive failure. Surfaced to the
/// fallback body as a symbol through the method's error temp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BadReceiver,
    BadArgument,
    BadIndex,
    BadNumArgs,
    Overflow,
    ZeroDivide,
}

impl FailureReason {
    pub fn selector(self) -> &'static str {
        match self {
            FailureReason::BadReceiver => "badReceiver",
            FailureReason::BadArgument => "badArgument",
            FailureReason::BadIndex => "badIndex",
            FailureReason::BadNumArgs => "badNumArgs",
            FailureReason::Overflow => "overflow",
            FailureReason::ZeroDivide => "zeroDivide",
        }
    }
}

/// What a primitive did.
pub enum PrimitiveOutcome {
    /// Success: the send completes with this value, short-circuiting the
    /// method's bytecode body.
    Return(Value),
    /// The primitive pushed an activation itself (block invocation,
    /// unwind-protection registration); execution continues there.
    Activated,
    /// Bare failure: fall through to the bytecode body.
    Fail,
    /// Diagnosed failure: reason and operand snapshot, paid only off the
    /// success path.
    FailWith {
        reason: FailureReason,
        operands: Vec<Value>,
    },
}

pub(crate) fn fail_with(
    reason: FailureReason,
    operands: &[Value],
) -> PrimitiveOutcome {
    PrimitiveOutcome::FailWith {
        reason,
        operands: operands.to_vec(),
    }
}

/// The closed primitive table. Methods carry indices into this; the
/// bootstrap resolves them by name.
pub fn default_primitives() -> Vec<PrimitiveDesc> {
    vec![
        PrimitiveDesc::new("small_add", 1, small_integer::small_add),
        PrimitiveDesc::new("small_sub", 1, small_integer::small_sub),
        PrimitiveDesc::new("small_mul", 1, small_integer::small_mul),
        PrimitiveDesc::new("small_div", 1, small_integer::small_div),
        PrimitiveDesc::new("small_mod", 1, small_integer::small_mod),
        PrimitiveDesc::new("small_negated", 0, small_integer::small_negated),
        PrimitiveDesc::new("small_lt", 1, small_integer::small_lt),
        PrimitiveDesc::new("small_le", 1, small_integer::small_le),
        PrimitiveDesc::new("small_gt", 1, small_integer::small_gt),
        PrimitiveDesc::new("small_ge", 1, small_integer::small_ge),
        PrimitiveDesc::new("small_eq", 1, small_integer::small_eq),
        PrimitiveDesc::new("small_ne", 1, small_integer::small_ne),
        PrimitiveDesc::new("small_as_large", 0, small_integer::small_as_large),
        PrimitiveDesc::new("small_as_float", 0, small_integer::small_as_float),
        PrimitiveDesc::new("large_add", 1, large_integer::large_add),
        PrimitiveDesc::new("large_sub", 1, large_integer::large_sub),
        PrimitiveDesc::new("large_mul", 1, large_integer::large_mul),
        PrimitiveDesc::new("large_div", 1, large_integer::large_div),
        PrimitiveDesc::new("large_mod", 1, large_integer::large_mod),
        PrimitiveDesc::new("large_negated", 0, large_integer::large_negated),
        PrimitiveDesc::new("large_lt", 1, large_integer::large_lt),
        PrimitiveDesc::new("large_le", 1, large_integer::large_le),
        PrimitiveDesc::new("large_gt", 1, large_integer::large_gt),
        PrimitiveDesc::new("large_ge", 1, large_integer::large_ge),
        PrimitiveDesc::new("large_eq", 1, large_integer::large_eq),
        PrimitiveDesc::new("large_ne", 1, large_integer::large_ne),
        PrimitiveDesc::new("large_normalized", 0, large_integer::large_normalized),
        PrimitiveDesc::new("large_as_float", 0, large_integer::large_as_float),
        PrimitiveDesc::new("float_add", 1, float::float_add),
        PrimitiveDesc::new("float_sub", 1, float::float_sub),
        PrimitiveDesc::new("float_mul", 1, float::float_mul),
        PrimitiveDesc::new("float_div", 1, float::float_div),
        PrimitiveDesc::new("float_sqrt", 0, float::float_sqrt),
        PrimitiveDesc::new("float_lt", 1, float::float_lt),
        PrimitiveDesc::new("float_le", 1, float::float_le),
        PrimitiveDesc::new("float_gt", 1, float::float_gt),
        PrimitiveDesc::new("float_ge", 1, float::float_ge),
        PrimitiveDesc::new("float_eq", 1, float::float_eq),
        PrimitiveDesc::new("float_ne", 1, float::float_ne),
        PrimitiveDesc::new("identity_eq", 1, general::identity_eq),
        PrimitiveDesc::new("identity_ne", 1, general::identity_ne),
        PrimitiveDesc::new("class_of", 0, general::class_of),
        PrimitiveDesc::new("inst_var_at", 1, general::inst_var_at),
        PrimitiveDesc::new("inst_var_at_put", 2, general::inst_var_at_put),
        PrimitiveDesc::new("primitive_failed", 1, general::primitive_failed),
        PrimitiveDesc::new("array_at", 1, array::array_at),
        PrimitiveDesc::new("array_at_put", 2, array::array_at_put),
        PrimitiveDesc::new("array_size", 0, array::array_size),
        PrimitiveDesc::new("block_value0", 0, block::block_value0),
        PrimitiveDesc::new("block_value1", 1, block::block_value1),
        PrimitiveDesc::new("block_value2", 2, block::block_value2),
        PrimitiveDesc::new("block_value3", 3, block::block_value3),
        PrimitiveDesc::new("block_ensure", 1, block::block_ensure),
        PrimitiveDesc::new("context_capture", 0, context::context_capture),
        PrimitiveDesc::new("context_is_dead", 0, context::context_is_dead),
    ]
}

pub fn primitive_index_by_name(
    prims: &[PrimitiveDesc],
    name: &str,
) -> Option<usize> {
    prims.iter().position(|p| p.name == name)
}
