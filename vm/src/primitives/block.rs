use object::{CodeRef, HeapObject, ObjectRef, Value};

use crate::interpreter::{push_closure_frame, InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

fn closure_ref(vm: &VM, value: Value) -> Option<ObjectRef> {
    let r = value.as_ref()?;
    match vm.heap.get(r) {
        HeapObject::Closure(_) => Some(r),
        _ => None,
    }
}

fn closure_num_args(vm: &VM, closure: ObjectRef) -> usize {
    let c = vm.heap.closure(closure);
    vm.heap
        .code_info(CodeRef::block(c.method, c.block_index))
        .num_args
}

/// The `value` family: activate the receiver closure with the arguments.
fn value_n(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(closure) = closure_ref(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    if closure_num_args(vm, closure) != args.len() {
        return Ok(fail_with(FailureReason::BadNumArgs, &[receiver]));
    }
    push_closure_frame(vm, st, closure, args)?;
    Ok(PrimitiveOutcome::Activated)
}

pub fn block_value0(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    value_n(vm, st, receiver, args)
}

pub fn block_value1(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    value_n(vm, st, receiver, args)
}

pub fn block_value2(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    value_n(vm, st, receiver, args)
}

pub fn block_value3(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    value_n(vm, st, receiver, args)
}

/// `ensure:`-style protection: activate the receiver with the handler
/// registered on its activation, so the handler runs exactly once on any
/// exit, normal or unwinding.
pub fn block_ensure(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(protected) = closure_ref(vm, receiver) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    if closure_num_args(vm, protected) != 0 {
        return Ok(fail_with(FailureReason::BadNumArgs, &[receiver]));
    }
    let Some(handler) = closure_ref(vm, args[0]) else {
        return Ok(fail_with(FailureReason::BadArgument, &[args[0]]));
    };
    if closure_num_args(vm, handler) != 0 {
        return Ok(fail_with(FailureReason::BadNumArgs, &[args[0]]));
    }
    push_closure_frame(vm, st, protected, &[])?;
    let frame = st.frames.last_mut().unwrap();
    frame.state_mut(&mut vm.heap).handlers.push(args[0]);
    Ok(PrimitiveOutcome::Activated)
}
