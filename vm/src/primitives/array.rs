use object::{HeapObject, ObjectRef, Value};

use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

fn array_ref(vm: &VM, value: Value) -> Option<ObjectRef> {
    let r = value.as_ref()?;
    match vm.heap.get(r) {
        HeapObject::Array(_) => Some(r),
        _ => None,
    }
}

/// One-based index into `array`, bounds-checked.
fn element_index(
    vm: &VM,
    array: ObjectRef,
    index: Value,
) -> Result<usize, PrimitiveOutcome> {
    let Value::SmallInt(index) = index else {
        return Err(fail_with(FailureReason::BadArgument, &[index]));
    };
    let len = vm.heap.array(array).len();
    if index < 1 || index as usize > len {
        return Err(fail_with(
            FailureReason::BadIndex,
            &[Value::Ref(array), Value::SmallInt(index)],
        ));
    }
    Ok(index as usize - 1)
}

pub fn array_at(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(array) = array_ref(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let index = match element_index(vm, array, args[0]) {
        Ok(index) => index,
        Err(outcome) => return Ok(outcome),
    };
    Ok(PrimitiveOutcome::Return(vm.heap.array(array)[index]))
}

pub fn array_at_put(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(array) = array_ref(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let index = match element_index(vm, array, args[0]) {
        Ok(index) => index,
        Err(outcome) => return Ok(outcome),
    };
    vm.heap.array_mut(array)[index] = args[1];
    Ok(PrimitiveOutcome::Return(args[1]))
}

pub fn array_size(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(array) = array_ref(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let len = vm.heap.array(array).len() as i64;
    Ok(PrimitiveOutcome::Return(Value::SmallInt(len)))
}
