use object::{HeapObject, Value};

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

fn operands(
    receiver: Value,
    args: &[Value],
) -> Result<(i64, i64), PrimitiveOutcome> {
    let Value::SmallInt(a) = receiver else {
        return Err(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let Value::SmallInt(b) = args[0] else {
        return Err(fail_with(FailureReason::BadArgument, &[args[0]]));
    };
    Ok((a, b))
}

pub fn small_add(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    Ok(match a.checked_add(b) {
        Some(sum) => PrimitiveOutcome::Return(Value::SmallInt(sum)),
        None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
    })
}

pub fn small_sub(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    Ok(match a.checked_sub(b) {
        Some(diff) => PrimitiveOutcome::Return(Value::SmallInt(diff)),
        None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
    })
}

pub fn small_mul(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    Ok(match a.checked_mul(b) {
        Some(product) => PrimitiveOutcome::Return(Value::SmallInt(product)),
        None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
    })
}

/// Floored division: the quotient rounds toward negative infinity.
pub(crate) fn floored_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

/// Floored modulo: the result takes the divisor's sign.
pub(crate) fn floored_mod(a: i64, b: i64) -> Option<i64> {
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Some(remainder + b)
    } else {
        Some(remainder)
    }
}

pub fn small_div(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    if b == 0 {
        return Ok(fail_with(FailureReason::ZeroDivide, &[receiver]));
    }
    Ok(match floored_div(a, b) {
        Some(quotient) => PrimitiveOutcome::Return(Value::SmallInt(quotient)),
        None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
    })
}

pub fn small_mod(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    if b == 0 {
        return Ok(fail_with(FailureReason::ZeroDivide, &[receiver]));
    }
    Ok(match floored_mod(a, b) {
        Some(remainder) => PrimitiveOutcome::Return(Value::SmallInt(remainder)),
        None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
    })
}

pub fn small_negated(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Value::SmallInt(a) = receiver else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(match a.checked_neg() {
        Some(negated) => PrimitiveOutcome::Return(Value::SmallInt(negated)),
        None => fail_with(FailureReason::Overflow, &[receiver]),
    })
}

macro_rules! small_compare {
    ($name:ident, $op:tt) => {
        pub fn $name(
            _vm: &mut VM,
            _st: &mut InterpreterState,
            receiver: Value,
            args: &[Value],
        ) -> Result<PrimitiveOutcome, RuntimeError> {
            let (a, b) = match operands(receiver, args) {
                Ok(pair) => pair,
                Err(outcome) => return Ok(outcome),
            };
            Ok(PrimitiveOutcome::Return(Value::Bool(a $op b)))
        }
    };
}

small_compare!(small_lt, <);
small_compare!(small_le, <=);
small_compare!(small_gt, >);
small_compare!(small_ge, >=);
small_compare!(small_eq, ==);
small_compare!(small_ne, !=);

/// Widen to a large integer without normalizing back, so the fallback
/// path of an overflowing small operation cannot loop.
pub fn small_as_large(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Value::SmallInt(a) = receiver else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let large = vm.heap.alloc(HeapObject::LargeInt(a as i128));
    Ok(PrimitiveOutcome::Return(Value::Ref(large)))
}

pub fn small_as_float(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Value::SmallInt(a) = receiver else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(PrimitiveOutcome::Return(Value::Float(a as f64)))
}
