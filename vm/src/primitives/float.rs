use object::Value;

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

/// Small integer arguments are coerced; anything else fails.
fn float_operand(value: Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(f),
        Value::SmallInt(n) => Some(n as f64),
        _ => None,
    }
}

fn operands(
    receiver: Value,
    args: &[Value],
) -> Result<(f64, f64), PrimitiveOutcome> {
    let Value::Float(a) = receiver else {
        return Err(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let Some(b) = float_operand(args[0]) else {
        return Err(fail_with(FailureReason::BadArgument, &[args[0]]));
    };
    Ok((a, b))
}

macro_rules! float_arith {
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
            Ok(PrimitiveOutcome::Return(Value::Float(a $op b)))
        }
    };
}

float_arith!(float_add, +);
float_arith!(float_sub, -);
float_arith!(float_mul, *);

pub fn float_div(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (a, b) = match operands(receiver, args) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    if b == 0.0 {
        return Ok(fail_with(FailureReason::ZeroDivide, &[receiver]));
    }
    Ok(PrimitiveOutcome::Return(Value::Float(a / b)))
}

pub fn float_sqrt(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Value::Float(a) = receiver else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(PrimitiveOutcome::Return(Value::Float(a.sqrt())))
}

macro_rules! float_compare {
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

float_compare!(float_lt, <);
float_compare!(float_le, <=);
float_compare!(float_gt, >);
float_compare!(float_ge, >=);
float_compare!(float_eq, ==);
float_compare!(float_ne, !=);
