use object::{HeapObject, Value};

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

pub fn identity_eq(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    Ok(PrimitiveOutcome::Return(Value::Bool(receiver == args[0])))
}

pub fn identity_ne(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    Ok(PrimitiveOutcome::Return(Value::Bool(receiver != args[0])))
}

pub fn class_of(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let class = vm.special.class_of(&vm.heap, receiver);
    Ok(PrimitiveOutcome::Return(Value::Ref(class)))
}

fn field_index(
    vm: &VM,
    receiver: Value,
    index: Value,
) -> Result<(object::ObjectRef, usize), PrimitiveOutcome> {
    let Some(object) = receiver.as_ref() else {
        return Err(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let HeapObject::Instance(instance) = vm.heap.get(object) else {
        return Err(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let Value::SmallInt(index) = index else {
        return Err(fail_with(FailureReason::BadArgument, &[index]));
    };
    // One-based, per the reflective protocol.
    if index < 1 || index as usize > instance.field_count() {
        return Err(fail_with(FailureReason::BadIndex, &[receiver, Value::SmallInt(index)]));
    }
    Ok((object, index as usize - 1))
}

pub fn inst_var_at(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (object, index) = match field_index(vm, receiver, args[0]) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PrimitiveOutcome::Return(vm.heap.read_field(object, index)))
}

pub fn inst_var_at_put(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let (object, index) = match field_index(vm, receiver, args[0]) {
        Ok(pair) => pair,
        Err(outcome) => return Ok(outcome),
    };
    vm.heap.write_field(object, index, args[1]);
    Ok(PrimitiveOutcome::Return(args[1]))
}

/// The end of the line for a fallback body: surface the failure reason to
/// the error machinery above this core.
pub fn primitive_failed(
    _vm: &mut VM,
    _st: &mut InterpreterState,
    _receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    Err(RuntimeError::PrimitiveFailed { reason: args[0] })
}
