use object::{HeapObject, Value};

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

/// Shrink to a small integer when the value fits.
pub(crate) fn value_from_i128(vm: &mut VM, value: i128) -> Value {
    match i64::try_from(value) {
        Ok(small) => Value::SmallInt(small),
        Err(_) => Value::Ref(vm.heap.alloc(HeapObject::LargeInt(value))),
    }
}

/// Accepts both integer representations; large arithmetic coerces small
/// operands rather than failing back into the small path.
fn int_operand(vm: &VM, value: Value) -> Option<i128> {
    match value {
        Value::SmallInt(n) => Some(n as i128),
        Value::Ref(r) => match vm.heap.get(r) {
            HeapObject::LargeInt(n) => Some(*n),
            _ => None,
        },
        _ => None,
    }
}

fn operands(
    vm: &VM,
    receiver: Value,
    args: &[Value],
) -> Result<(i128, i128), PrimitiveOutcome> {
    let Some(a) = int_operand(vm, receiver) else {
        return Err(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let Some(b) = int_operand(vm, args[0]) else {
        return Err(fail_with(FailureReason::BadArgument, &[args[0]]));
    };
    Ok((a, b))
}

macro_rules! large_arith {
    ($name:ident, $checked:ident) => {
        pub fn $name(
            vm: &mut VM,
            _st: &mut InterpreterState,
            receiver: Value,
            args: &[Value],
        ) -> Result<PrimitiveOutcome, RuntimeError> {
            let (a, b) = match operands(vm, receiver, args) {
                Ok(pair) => pair,
                Err(outcome) => return Ok(outcome),
            };
            Ok(match a.$checked(b) {
                Some(result) => {
                    PrimitiveOutcome::Return(value_from_i128(vm, result))
                }
                None => fail_with(FailureReason::Overflow, &[receiver, args[0]]),
            })
        }
    };
}

large_arith!(large_add, checked_add);
large_arith!(large_sub, checked_sub);
large_arith!(large_mul, checked_mul);

pub fn large_div(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(vm, receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    if b == 0 {
        return Ok(fail_with(FailureReason::ZeroDivide, &[receiver]));
    }
    let quotient = a.checked_div(b);
    let Some(mut quotient) = quotient else {
        return Ok(fail_with(FailureReason::Overflow, &[receiver, args[0]]));
    };
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        quotient -= 1;
    }
    Ok(PrimitiveOutcome::Return(value_from_i128(vm, quotient)))
}

pub fn large_mod(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(vm, receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    if b == 0 {
        return Ok(fail_with(FailureReason::ZeroDivide, &[receiver]));
    }
    let mut remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        remainder += b;
    }
    Ok(PrimitiveOutcome::Return(value_from_i128(vm, remainder)))
}

pub fn large_negated(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(a) = int_operand(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(match a.checked_neg() {
        Some(negated) => PrimitiveOutcome::Return(value_from_i128(vm, negated)),
        None => fail_with(FailureReason::Overflow, &[receiver]),
    })
}

macro_rules! large_compare {
    ($name:ident, $op:tt) => {
        pub fn $name(
            vm: &mut VM,
            _st: &mut InterpreterState,
            receiver: Value,
            args: &[Value],
        ) -> Result<PrimitiveOutcome, RuntimeError> {
            let (a, b) = match operands(vm, receiver, args) {
                Ok(pair) => pair,
                Err(outcome) => return Ok(outcome),
            };
            Ok(PrimitiveOutcome::Return(Value::Bool(a $op b)))
        }
    };
}

large_compare!(large_lt, <);
large_compare!(large_le, <=);
large_compare!(large_gt, >);
large_compare!(large_ge, >=);
large_compare!(large_eq, ==);
large_compare!(large_ne, !=);

pub fn large_normalized(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(a) = int_operand(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(PrimitiveOutcome::Return(value_from_i128(vm, a)))
}

pub fn large_as_float(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(a) = int_operand(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(PrimitiveOutcome::Return(Value::Float(a as f64)))
}
