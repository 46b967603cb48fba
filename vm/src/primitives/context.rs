use object::{HeapObject, Value};

use crate::activation::escape;
use crate::interpreter::{InterpreterState, RuntimeError};
use crate::primitives::{fail_with, FailureReason, PrimitiveOutcome};
use crate::VM;

/// Materialize the sending activation and hand back its context. The
/// sender is the top frame here: the send consumed its operands but has
/// not pushed a callee.
pub fn context_capture(
    vm: &mut VM,
    st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    if st.frames.is_empty() {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    }
    let top = st.frames.len() - 1;
    let context = escape(vm, &mut st.frames, top);
    Ok(PrimitiveOutcome::Return(Value::Ref(context)))
}

pub fn context_is_dead(
    vm: &mut VM,
    _st: &mut InterpreterState,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, RuntimeError> {
    let Some(r) = receiver.as_ref() else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    let HeapObject::Context(state) = vm.heap.get(r) else {
        return Ok(fail_with(FailureReason::BadReceiver, &[receiver]));
    };
    Ok(PrimitiveOutcome::Return(Value::Bool(state.terminated)))
}
