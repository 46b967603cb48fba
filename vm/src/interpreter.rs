use bytecode::Instruction;
use log::{debug, trace};
use object::{
    ActivationId, Closure, CodeRef, ContextState, HeapObject, ObjectRef, Value,
};

use crate::activation::{escape, resolve, Frame, Resolved};
use crate::lookup::lookup;
use crate::primitives::PrimitiveOutcome;
use crate::VM;

/// Depth limit of the virtual frame chain.
pub const MAX_FRAMES: usize = 1024;
/// Back edges between forced safepoint polls.
const INTERRUPT_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    MessageNotUnderstood { receiver: Value, selector: Value },
    /// A non-local return whose home activation already completed, or
    /// whose identity resolves to nothing.
    InvalidReturnTarget { home: ActivationId },
    /// A fallback body gave up on a failed primitive.
    PrimitiveFailed { reason: Value },
    MustBeBoolean { got: Value },
    StackOverflow,
    TypeError { expected: &'static str, got: Value },
    UndefinedPrimitive { index: u16 },
}

/// How a chain finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Normal(Value),
    /// A non-local return whose target lives on another chain; the caller
    /// owns delivery to the materialized target.
    Unwind { value: Value, target: ActivationId },
}

/// A completion travelling through the frame chain. Unwind-protection
/// handlers run while one of these is pending; a `Return` pending across a
/// handler is restored when the handler finishes, an `Unwind` keeps going
/// until its target frame is popped.
#[derive(Debug, Clone)]
pub enum PendingAction {
    Return(Value),
    Unwind { value: Value, target: ActivationId },
}

/// The virtual activation chain of one logical thread of control.
pub struct InterpreterState {
    pub frames: Vec<Frame>,
}

impl InterpreterState {
    pub fn new() -> InterpreterState {
        InterpreterState { frames: Vec::new() }
    }
}

impl Default for InterpreterState {
    fn default() -> InterpreterState {
        InterpreterState::new()
    }
}

/// Send `selector` to `receiver`: the fresh-start entry mode.
pub fn send(
    vm: &mut VM,
    selector: Value,
    receiver: Value,
    args: &[Value],
) -> Result<Completion, RuntimeError> {
    let selector = expect_selector(vm, selector)?;
    check_safepoint(vm);
    let mut st = InterpreterState::new();
    match invoke(vm, &mut st, selector, receiver, args.to_vec())? {
        Some(value) => Ok(Completion::Normal(value)),
        None => run(vm, &mut st),
    }
}

/// Re-enter a materialized activation at a saved program counter: the
/// resume entry mode. Produces the same results as a fresh start over
/// identical state.
pub fn resume(
    vm: &mut VM,
    context: ObjectRef,
    pc: usize,
) -> Result<Completion, RuntimeError> {
    let id = {
        let state = vm.heap.context_mut(context);
        assert!(!state.terminated, "resume on terminated activation");
        state.pc = pc;
        state.id
    };
    vm.materialized.insert(id, context);
    let mut st = InterpreterState::new();
    st.frames.push(Frame::for_context(id, context));
    run(vm, &mut st)
}

/// The dispatch loop: execute the decoded node at the top frame's pc,
/// which yields either the successor pc or a pending completion.
fn run(vm: &mut VM, st: &mut InterpreterState) -> Result<Completion, RuntimeError> {
    assert!(!st.frames.is_empty(), "run on an empty chain");
    loop {
        let top = st.frames.len() - 1;
        let (code, pc) = {
            let state = st.frames[top].state(&vm.heap);
            (state.code, state.pc)
        };
        let instr = vm.heap.code_instruction(code, pc);
        match instr {
            Instruction::PushReceiver => {
                let state = st.frames[top].state_mut(&mut vm.heap);
                let receiver = state.receiver;
                state.push(receiver);
                state.pc = pc + 1;
            }
            Instruction::PushLiteral { index } => {
                let value = vm.heap.code_literal(code, index as usize);
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(value);
                state.pc = pc + 1;
            }
            Instruction::PushSmallInt { value } => {
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(Value::SmallInt(value as i64));
                state.pc = pc + 1;
            }
            Instruction::PushTemp { index } => {
                let value = read_temp(vm, st, top, index as usize);
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(value);
                state.pc = pc + 1;
            }
            Instruction::StoreTemp { index } => {
                let value = {
                    let state = st.frames[top].state_mut(&mut vm.heap);
                    state.pc = pc + 1;
                    state.pop()
                };
                write_temp(vm, st, top, index as usize, value);
            }
            Instruction::PushField { index } => {
                let receiver = st.frames[top].state(&vm.heap).receiver;
                let object = expect_instance(vm, receiver)?;
                let value = vm.heap.read_field(object, index as usize);
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(value);
                state.pc = pc + 1;
            }
            Instruction::StoreField { index } => {
                let (receiver, value) = {
                    let state = st.frames[top].state_mut(&mut vm.heap);
                    state.pc = pc + 1;
                    let value = state.pop();
                    (state.receiver, value)
                };
                let object = expect_instance(vm, receiver)?;
                vm.heap.write_field(object, index as usize, value);
            }
            Instruction::Dup => {
                let state = st.frames[top].state_mut(&mut vm.heap);
                let value = state.peek();
                state.push(value);
                state.pc = pc + 1;
            }
            Instruction::Pop => {
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.pop();
                state.pc = pc + 1;
            }
            Instruction::MakeArray { count } => {
                let values = {
                    let state = st.frames[top].state_mut(&mut vm.heap);
                    state.pc = pc + 1;
                    state.pop_n(count as usize)
                };
                let array = vm.heap.alloc(HeapObject::Array(values));
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(Value::Ref(array));
            }
            Instruction::PushClosure { block } => {
                st.frames[top].state_mut(&mut vm.heap).pc = pc + 1;
                let closure = make_closure(vm, st, top, block);
                let state = st.frames[top].state_mut(&mut vm.heap);
                state.push(Value::Ref(closure));
            }
            Instruction::Send { selector, argc } => {
                check_safepoint(vm);
                let selector_value = vm.heap.code_literal(code, selector as usize);
                let selector = expect_selector(vm, selector_value)?;
                let (receiver, args) = {
                    let state = st.frames[top].state_mut(&mut vm.heap);
                    state.pc = pc + 1;
                    let args = state.pop_n(argc as usize);
                    (state.pop(), args)
                };
                if let Some(value) = invoke(vm, st, selector, receiver, args)? {
                    let frame = st.frames.last_mut().unwrap();
                    frame.state_mut(&mut vm.heap).push(value);
                }
            }
            Instruction::Jump { target } => {
                let target = target as usize;
                if target <= pc {
                    note_back_edge(vm);
                }
                st.frames[top].state_mut(&mut vm.heap).pc = target;
            }
            Instruction::JumpIfTrue { target } | Instruction::JumpIfFalse { target } => {
                let condition = st.frames[top].state_mut(&mut vm.heap).pop();
                let Value::Bool(condition) = condition else {
                    return Err(RuntimeError::MustBeBoolean { got: condition });
                };
                let on_true = matches!(instr, Instruction::JumpIfTrue { .. });
                let next = if condition == on_true {
                    let target = target as usize;
                    if target <= pc {
                        note_back_edge(vm);
                    }
                    target
                } else {
                    pc + 1
                };
                st.frames[top].state_mut(&mut vm.heap).pc = next;
            }
            Instruction::Return => {
                let value = st.frames[top].state_mut(&mut vm.heap).pop();
                if let Some(completion) =
                    finish(vm, st, PendingAction::Return(value))?
                {
                    return Ok(completion);
                }
            }
            Instruction::NonLocalReturn => {
                let home = st.frames[top]
                    .state(&vm.heap)
                    .home
                    .unwrap_or_else(|| panic!("non-local return outside a block"));
                match resolve(vm, &st.frames, home) {
                    Resolved::OnChain(_) => {}
                    Resolved::Materialized(context) => {
                        if vm.heap.context(context).terminated {
                            return Err(RuntimeError::InvalidReturnTarget { home });
                        }
                    }
                    Resolved::Unknown => {
                        return Err(RuntimeError::InvalidReturnTarget { home });
                    }
                }
                let value = st.frames[top].state_mut(&mut vm.heap).pop();
                if let Some(completion) =
                    finish(vm, st, PendingAction::Unwind { value, target: home })?
                {
                    return Ok(completion);
                }
            }
        }
    }
}

/// Drive a pending completion outward through the chain.
///
/// For each frame the completion reaches: pending unwind-protection
/// handlers run first, one activation each, exactly once, innermost first;
/// then the frame is terminated and popped. A `Return` delivers to the
/// next frame down; an `Unwind` keeps popping until its target frame has
/// been popped, then delivers to the frame below it. Returns the chain's
/// completion once no frame is left, `None` while execution continues.
fn finish(
    vm: &mut VM,
    st: &mut InterpreterState,
    action: PendingAction,
) -> Result<Option<Completion>, RuntimeError> {
    let mut action = action;
    loop {
        let top = st.frames.len() - 1;
        let handler = st.frames[top].state_mut(&mut vm.heap).handlers.pop();
        if let Some(handler) = handler {
            let Value::Ref(closure) = handler else {
                panic!("registered unwind handler is not a closure");
            };
            trace!("unwind handler on {:?}", st.frames[top].id);
            push_closure_frame(vm, st, closure, &[])?;
            st.frames.last_mut().unwrap().resume = Some(action);
            return Ok(None);
        }

        let mut frame = st.frames.pop().unwrap();
        frame.state_mut(&mut vm.heap).terminated = true;

        if let Some(saved) = frame.resume.take() {
            // A handler finished: its own value is discarded and the
            // completion it interrupted continues, unless the handler
            // itself unwound, which supersedes the saved completion.
            action = match action {
                PendingAction::Return(_) => saved,
                unwind @ PendingAction::Unwind { .. } => unwind,
            };
            continue;
        }

        match action {
            PendingAction::Return(value) => {
                return Ok(deliver(vm, st, value));
            }
            PendingAction::Unwind { value, target } => {
                if frame.id == target {
                    trace!("non-local return delivered past {target:?}");
                    return Ok(deliver(vm, st, value));
                }
                if st.frames.is_empty() {
                    return match vm.materialized.get(&target) {
                        Some(&context)
                            if !vm.heap.context(context).terminated =>
                        {
                            Ok(Some(Completion::Unwind { value, target }))
                        }
                        _ => Err(RuntimeError::InvalidReturnTarget {
                            home: target,
                        }),
                    };
                }
                action = PendingAction::Unwind { value, target };
            }
        }
    }
}

/// Push `value` as the send result of the new top frame, or finish the
/// chain when none is left.
fn deliver(
    vm: &mut VM,
    st: &mut InterpreterState,
    value: Value,
) -> Option<Completion> {
    match st.frames.last_mut() {
        None => Some(Completion::Normal(value)),
        Some(frame) => {
            frame.state_mut(&mut vm.heap).push(value);
            None
        }
    }
}

/// Resolve and invoke a method: primitive first, bytecode body on failure.
/// Returns `Some(value)` when a primitive produced the result without
/// pushing an activation.
fn invoke(
    vm: &mut VM,
    st: &mut InterpreterState,
    selector: ObjectRef,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Option<Value>, RuntimeError> {
    let class = vm.special.class_of(&vm.heap, receiver);
    let Some(hit) = lookup(&vm.heap, class, selector) else {
        return Err(RuntimeError::MessageNotUnderstood {
            receiver,
            selector: Value::Ref(selector),
        });
    };
    let (primitive, error_temp, num_args) = {
        let method = vm.heap.method(hit.method);
        (method.primitive, method.error_temp, method.num_args as usize)
    };
    if args.len() != num_args {
        return Err(RuntimeError::TypeError {
            expected: "argument count",
            got: Value::SmallInt(args.len() as i64),
        });
    }

    let mut reason = None;
    if let Some(index) = primitive {
        let desc = *vm
            .primitives
            .get(index as usize)
            .ok_or(RuntimeError::UndefinedPrimitive { index })?;
        assert!(
            desc.arity as usize == num_args,
            "primitive {} arity mismatch on {}",
            desc.name,
            vm.heap.method(hit.method).name
        );
        match (desc.func)(vm, st, receiver, &args)? {
            PrimitiveOutcome::Return(value) => return Ok(Some(value)),
            PrimitiveOutcome::Activated => return Ok(None),
            PrimitiveOutcome::Fail => {
                trace!("primitive {} failed", desc.name);
                reason = Some(Value::Nil);
            }
            PrimitiveOutcome::FailWith {
                reason: why,
                operands,
            } => {
                debug!(
                    "primitive {} failed: {:?} on {:?}",
                    desc.name, why, operands
                );
                reason = Some(vm.symbol(why.selector()));
            }
        }
    }

    push_method_frame(vm, st, hit.method, receiver, args)?;
    if let (Some(reason), Some(slot)) = (reason, error_temp) {
        let frame = st.frames.last_mut().unwrap();
        frame
            .state_mut(&mut vm.heap)
            .set_window_slot(slot as usize, reason);
    }
    Ok(None)
}

pub(crate) fn push_method_frame(
    vm: &mut VM,
    st: &mut InterpreterState,
    method: ObjectRef,
    receiver: Value,
    args: Vec<Value>,
) -> Result<(), RuntimeError> {
    if st.frames.len() >= MAX_FRAMES {
        return Err(RuntimeError::StackOverflow);
    }
    let code = CodeRef::method(method);
    let info = vm.heap.code_info(code);
    debug_assert_eq!(args.len(), info.num_args);
    let mut window = args;
    window.resize(info.num_args + info.num_temps, Value::Nil);
    let id = vm.next_activation_id();
    let mut state = ContextState::new(id, code, receiver, window, info.max_stack);
    state.sender = st.frames.last().map(|f| f.id);
    st.frames.push(Frame::new(state));
    Ok(())
}

/// Activate `closure` with `args`. The caller has already checked arity.
pub(crate) fn push_closure_frame(
    vm: &mut VM,
    st: &mut InterpreterState,
    closure: ObjectRef,
    args: &[Value],
) -> Result<(), RuntimeError> {
    if st.frames.len() >= MAX_FRAMES {
        return Err(RuntimeError::StackOverflow);
    }
    let (code, receiver, copied, home) = {
        let c = vm.heap.closure(closure);
        (
            CodeRef::block(c.method, c.block_index),
            c.receiver,
            c.copied.clone(),
            c.home,
        )
    };
    let info = vm.heap.code_info(code);
    assert_eq!(args.len(), info.num_args, "closure arity checked by caller");
    let mut window =
        Vec::with_capacity(info.num_args + info.num_copied + info.num_temps);
    window.extend_from_slice(args);
    window.extend_from_slice(&copied);
    window.resize(info.num_args + info.num_copied + info.num_temps, Value::Nil);
    let id = vm.next_activation_id();
    let mut state = ContextState::new(id, code, receiver, window, info.max_stack);
    state.closure = Some(closure);
    state.home = Some(home);
    state.sender = st.frames.last().map(|f| f.id);
    st.frames.push(Frame::new(state));
    Ok(())
}

/// Close over block `block_index` of the running method. Copied values are
/// popped from the operand stack; the home method activation is
/// materialized so the closure's back references survive frame death.
fn make_closure(
    vm: &mut VM,
    st: &mut InterpreterState,
    top: usize,
    block_index: u16,
) -> ObjectRef {
    let (method, receiver, current_home) = {
        let state = st.frames[top].state(&vm.heap);
        (state.code.method, state.receiver, state.home)
    };
    let code = CodeRef::block(method, block_index);
    let info = vm.heap.code_info(code);
    let copied = st.frames[top]
        .state_mut(&mut vm.heap)
        .pop_n(info.num_copied);
    let home = match current_home {
        // A block making a block: the shared home is already materialized.
        Some(home) => home,
        None => {
            escape(vm, &mut st.frames, top);
            st.frames[top].id
        }
    };
    vm.heap.alloc(HeapObject::Closure(Closure {
        method,
        block_index,
        receiver,
        copied,
        home,
    }))
}

/// Where a temp index of a frame resolves to.
enum TempSlot {
    Local(usize),
    HomeOnChain(usize, usize),
    HomeContext(ObjectRef, usize),
}

/// Block activations address the home method's arguments below its
/// argument count; their own window (arguments, copied values, temps)
/// starts above it. Method activations address their window directly.
fn temp_slot(
    vm: &VM,
    st: &InterpreterState,
    frame: usize,
    index: usize,
) -> TempSlot {
    let Some(home) = st.frames[frame].state(&vm.heap).home else {
        return TempSlot::Local(index);
    };
    match resolve(vm, &st.frames, home) {
        Resolved::OnChain(home_frame) => {
            let home_state = st.frames[home_frame].state(&vm.heap);
            let home_args = vm.heap.code_info(home_state.code).num_args;
            if index < home_args {
                TempSlot::HomeOnChain(home_frame, index)
            } else {
                TempSlot::Local(index - home_args)
            }
        }
        Resolved::Materialized(context) => {
            let home_state = vm.heap.context(context);
            let home_args = vm.heap.code_info(home_state.code).num_args;
            if index < home_args {
                TempSlot::HomeContext(context, index)
            } else {
                TempSlot::Local(index - home_args)
            }
        }
        Resolved::Unknown => panic!("home activation of a running block vanished"),
    }
}

fn read_temp(
    vm: &mut VM,
    st: &mut InterpreterState,
    frame: usize,
    index: usize,
) -> Value {
    match temp_slot(vm, st, frame, index) {
        TempSlot::Local(slot) => st.frames[frame].state(&vm.heap).window_slot(slot),
        TempSlot::HomeOnChain(home, slot) => {
            st.frames[home].state(&vm.heap).window_slot(slot)
        }
        TempSlot::HomeContext(context, slot) => {
            vm.heap.context(context).window_slot(slot)
        }
    }
}

fn write_temp(
    vm: &mut VM,
    st: &mut InterpreterState,
    frame: usize,
    index: usize,
    value: Value,
) {
    match temp_slot(vm, st, frame, index) {
        TempSlot::Local(slot) => st.frames[frame]
            .state_mut(&mut vm.heap)
            .set_window_slot(slot, value),
        TempSlot::HomeOnChain(home, slot) => st.frames[home]
            .state_mut(&mut vm.heap)
            .set_window_slot(slot, value),
        TempSlot::HomeContext(context, slot) => {
            vm.heap.context_mut(context).set_window_slot(slot, value)
        }
    }
}

fn note_back_edge(vm: &mut VM) {
    vm.back_edges += 1;
    if vm.back_edges % INTERRUPT_CHECK_INTERVAL == 0 || vm.safepoint.has_pending()
    {
        check_safepoint(vm);
    }
}

/// The cooperative safepoint: drain pending interrupts into the hook.
pub(crate) fn check_safepoint(vm: &mut VM) {
    if !vm.safepoint.has_pending() {
        return;
    }
    let interrupts = vm.safepoint.drain();
    match vm.interrupt_hook.as_mut() {
        Some(hook) => {
            for interrupt in interrupts {
                hook(interrupt);
            }
        }
        None => debug!("dropped {} interrupt(s), no hook installed", interrupts.len()),
    }
}

fn expect_selector(vm: &VM, value: Value) -> Result<ObjectRef, RuntimeError> {
    match value {
        Value::Ref(r) if matches!(vm.heap.get(r), HeapObject::Symbol(_)) => Ok(r),
        other => Err(RuntimeError::TypeError {
            expected: "selector symbol",
            got: other,
        }),
    }
}

fn expect_instance(vm: &VM, value: Value) -> Result<ObjectRef, RuntimeError> {
    match value {
        Value::Ref(r) if matches!(vm.heap.get(r), HeapObject::Instance(_)) => Ok(r),
        other => Err(RuntimeError::TypeError {
            expected: "instance with fields",
            got: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{block, MethodBuilder};
    use crate::primitives::PrimitiveDesc;
    use crate::safepoint::Interrupt;
    use crate::special::bootstrap;
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    fn normal(completion: Completion) -> Value {
        match completion {
            Completion::Normal(value) => value,
            other => panic!("expected a normal completion, got {other:?}"),
        }
    }

    fn probe_class(vm: &mut VM) -> ObjectRef {
        vm.create_class("Probe", Some(vm.special.object_class), 0)
    }

    fn probe_instance(vm: &mut VM, class: ObjectRef) -> Value {
        Value::Ref(vm.heap.instantiate(class))
    }

    fn symbol_text(vm: &VM, value: Value) -> String {
        match value {
            Value::Ref(r) => vm.heap.symbol(r).to_string(),
            other => panic!("expected a symbol, got {other:?}"),
        }
    }

    /// A one-field counter class: `value`, `bump`, and a `whileTrue:`
    /// driven `countTo:`.
    fn install_cell(vm: &mut VM) -> ObjectRef {
        let cell = vm.create_class("Cell", Some(vm.special.object_class), 1);

        let m = MethodBuilder::new("value", 0).body(|c| {
            c.push_field(0);
            c.return_();
        });
        vm.install_method(cell, "value", m);

        let plus = vm.symbol("+");
        let mut b = MethodBuilder::new("bump", 0).max_stack(3);
        let plus = b.literal(plus);
        let m = b.body(|c| {
            c.push_field(0);
            c.push_small_int(1);
            c.send(plus, 1);
            c.dup();
            c.store_field(0);
            c.return_();
        });
        vm.install_method(cell, "bump", m);

        let value_sym = vm.symbol("value");
        let lt = vm.symbol("<");
        let bump = vm.symbol("bump");
        let while_true = vm.symbol("whileTrue:");
        let mut b = MethodBuilder::new("countTo:", 1).max_stack(3);
        let l_value = b.literal(value_sym);
        let l_lt = b.literal(lt);
        let l_bump = b.literal(bump);
        let l_while = b.literal(while_true);
        let cond = b.block(block(0, 0, 0, 2, |c| {
            c.push_receiver();
            c.send(l_value, 0);
            c.push_temp(0);
            c.send(l_lt, 1);
            c.return_();
        }));
        let step = b.block(block(0, 0, 0, 1, |c| {
            c.push_receiver();
            c.send(l_bump, 0);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_closure(cond);
            c.push_closure(step);
            c.send(l_while, 1);
            c.pop();
            c.push_receiver();
            c.send(l_value, 0);
            c.return_();
        });
        vm.install_method(cell, "countTo:", m);
        cell
    }

    fn new_cell(vm: &mut VM, class: ObjectRef) -> Value {
        let cell = vm.heap.instantiate(class);
        vm.heap.write_field(cell, 0, Value::SmallInt(0));
        Value::Ref(cell)
    }

    fn cell_count(vm: &VM, cell: Value) -> i64 {
        let Value::Ref(r) = cell else { panic!() };
        match vm.heap.instance(r).read_field(0) {
            Value::SmallInt(n) => n,
            other => panic!("cell holds {other:?}"),
        }
    }

    // ── arithmetic and primitive dispatch ──────────────────────────

    #[test]
    fn small_integer_addition() {
        let mut vm = bootstrap();
        let result = vm
            .send("+", Value::SmallInt(1), &[Value::SmallInt(2)])
            .unwrap();
        assert_eq!(result, Completion::Normal(Value::SmallInt(3)));
    }

    #[test]
    fn overflow_widens_to_a_large_integer() {
        let mut vm = bootstrap();
        let result = normal(
            vm.send("+", Value::SmallInt(i64::MAX), &[Value::SmallInt(1)])
                .unwrap(),
        );
        let Value::Ref(r) = result else {
            panic!("expected a large integer, got {result:?}");
        };
        assert_eq!(vm.heap.large_int(r), i64::MAX as i128 + 1);
    }

    #[test]
    fn large_results_normalize_back_to_small() {
        let mut vm = bootstrap();
        let big = normal(
            vm.send("+", Value::SmallInt(i64::MAX), &[Value::SmallInt(1)])
                .unwrap(),
        );
        let result =
            normal(vm.send("-", big, &[Value::SmallInt(1)]).unwrap());
        assert_eq!(result, Value::SmallInt(i64::MAX));
    }

    #[test]
    fn comparison_coerces_across_representations() {
        let mut vm = bootstrap();
        let big = normal(
            vm.send("+", Value::SmallInt(i64::MAX), &[Value::SmallInt(1)])
                .unwrap(),
        );
        let result = normal(vm.send("<", Value::SmallInt(5), &[big]).unwrap());
        assert_eq!(result, Value::Bool(true));
        let result = normal(vm.send(">", big, &[Value::SmallInt(5)]).unwrap());
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn division_by_zero_surfaces_primitive_failed() {
        let mut vm = bootstrap();
        let err = vm
            .send("//", Value::SmallInt(10), &[Value::SmallInt(0)])
            .unwrap_err();
        let RuntimeError::PrimitiveFailed { reason } = err else {
            panic!("expected PrimitiveFailed, got {err:?}");
        };
        assert_eq!(symbol_text(&vm, reason), "zeroDivide");
    }

    #[test]
    fn float_arithmetic_and_coercion() {
        let mut vm = bootstrap();
        let result = normal(
            vm.send("*", Value::Float(2.5), &[Value::SmallInt(2)]).unwrap(),
        );
        assert_eq!(result, Value::Float(5.0));
        let err = vm
            .send("/", Value::Float(1.0), &[Value::Float(0.0)])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::PrimitiveFailed { .. }));
    }

    #[test]
    fn message_not_understood_carries_the_selector() {
        let mut vm = bootstrap();
        let err = vm
            .send("frobnicate", Value::SmallInt(1), &[])
            .unwrap_err();
        let RuntimeError::MessageNotUnderstood { receiver, selector } = err
        else {
            panic!("expected MessageNotUnderstood");
        };
        assert_eq!(receiver, Value::SmallInt(1));
        assert_eq!(symbol_text(&vm, selector), "frobnicate");
    }

    #[test]
    fn failure_reason_is_observable_to_the_fallback_body() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let index = crate::primitives::primitive_index_by_name(
            &vm.primitives,
            "small_add",
        )
        .unwrap();
        let m = MethodBuilder::new("probeAdd:", 1)
            .temps(1)
            .primitive(index)
            .error_temp(1)
            .body(|c| {
                c.push_temp(1);
                c.return_();
            });
        vm.install_method(probe, "probeAdd:", m);
        let receiver = probe_instance(&mut vm, probe);
        let reason = normal(
            vm.send("probeAdd:", receiver, &[Value::SmallInt(2)]).unwrap(),
        );
        assert_eq!(symbol_text(&vm, reason), "badReceiver");
    }

    #[test]
    fn successful_primitive_never_runs_the_body() {
        let mut vm = bootstrap();
        let index = crate::primitives::primitive_index_by_name(
            &vm.primitives,
            "small_add",
        )
        .unwrap();
        // Same fallback body as above, installed where the primitive
        // succeeds: the body's symbol answer must never appear.
        let m = MethodBuilder::new("probeAdd:", 1)
            .temps(1)
            .primitive(index)
            .error_temp(1)
            .body(|c| {
                c.push_temp(1);
                c.return_();
            });
        vm.install_method(vm.special.small_integer_class, "probeAdd:", m);
        let result = normal(
            vm.send("probeAdd:", Value::SmallInt(1), &[Value::SmallInt(2)])
                .unwrap(),
        );
        assert_eq!(result, Value::SmallInt(3));
    }

    #[test]
    fn bare_failure_reaches_the_body_with_nil_reason() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        vm.primitives.push(PrimitiveDesc::new("test_bare_fail", 0, |_, _, _, _| {
            Ok(crate::primitives::PrimitiveOutcome::Fail)
        }));
        let index = vm.primitives.len() - 1;
        let m = MethodBuilder::new("bare", 0)
            .temps(1)
            .primitive(index)
            .error_temp(0)
            .body(|c| {
                c.push_temp(0);
                c.return_();
            });
        vm.install_method(probe, "bare", m);
        let receiver = probe_instance(&mut vm, probe);
        let result = normal(vm.send("bare", receiver, &[]).unwrap());
        assert_eq!(result, Value::Nil);
    }

    // ── control flow, blocks, closures ─────────────────────────────

    #[test]
    fn conditional_evaluates_the_taken_branch_only() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let if_sym = vm.symbol("ifTrue:ifFalse:");
        let mut b = MethodBuilder::new("choose:", 1).max_stack(4);
        let l_if = b.literal(if_sym);
        let then_b = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(1);
            c.return_();
        }));
        let else_b = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(2);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_temp(0);
            c.push_closure(then_b);
            c.push_closure(else_b);
            c.send(l_if, 2);
            c.return_();
        });
        vm.install_method(probe, "choose:", m);
        let receiver = probe_instance(&mut vm, probe);
        let picked =
            normal(vm.send("choose:", receiver, &[Value::Bool(true)]).unwrap());
        assert_eq!(picked, Value::SmallInt(1));
        let picked =
            normal(vm.send("choose:", receiver, &[Value::Bool(false)]).unwrap());
        assert_eq!(picked, Value::SmallInt(2));
    }

    #[test]
    fn blocks_read_and_write_home_arguments() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let value_sym = vm.symbol("value");
        let plus = vm.symbol("+");
        let mut b = MethodBuilder::new("bump:", 1).max_stack(3);
        let l_value = b.literal(value_sym);
        let l_plus = b.literal(plus);
        let w = b.block(block(0, 0, 0, 3, |c| {
            c.push_temp(0);
            c.push_small_int(5);
            c.send(l_plus, 1);
            c.store_temp(0);
            c.push_temp(0);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_closure(w);
            c.send(l_value, 0);
            c.pop();
            c.push_temp(0);
            c.return_();
        });
        vm.install_method(probe, "bump:", m);
        let receiver = probe_instance(&mut vm, probe);
        let result =
            normal(vm.send("bump:", receiver, &[Value::SmallInt(37)]).unwrap());
        assert_eq!(result, Value::SmallInt(42));
    }

    #[test]
    fn closures_carry_copied_values() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let value_sym = vm.symbol("value");
        let mut b = MethodBuilder::new("capture", 0).max_stack(2);
        let l_value = b.literal(value_sym);
        let inner = b.block(block(0, 1, 0, 1, |c| {
            c.push_temp(0);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_small_int(7);
            c.push_closure(inner);
            c.send(l_value, 0);
            c.return_();
        });
        vm.install_method(probe, "capture", m);
        let receiver = probe_instance(&mut vm, probe);
        let result = normal(vm.send("capture", receiver, &[]).unwrap());
        assert_eq!(result, Value::SmallInt(7));
    }

    #[test]
    fn nested_blocks_share_the_home_activation() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let value_sym = vm.symbol("value");
        let mut b = MethodBuilder::new("nested", 0).max_stack(2);
        let l_value = b.literal(value_sym);
        let inner = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(42);
            c.return_();
        }));
        let outer = b.block(block(0, 0, 0, 2, |c| {
            c.push_closure(inner);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_closure(outer);
            c.send(l_value, 0);
            c.send(l_value, 0);
            c.return_();
        });
        vm.install_method(probe, "nested", m);
        let receiver = probe_instance(&mut vm, probe);
        let result = normal(vm.send("nested", receiver, &[]).unwrap());
        assert_eq!(result, Value::SmallInt(42));
    }

    #[test]
    fn while_true_loops_and_counts_back_edges() {
        let mut vm = bootstrap();
        let cell_class = install_cell(&mut vm);
        let cell = new_cell(&mut vm, cell_class);
        let result =
            normal(vm.send("countTo:", cell, &[Value::SmallInt(5)]).unwrap());
        assert_eq!(result, Value::SmallInt(5));
        assert_eq!(cell_count(&vm, cell), 5);
        assert!(vm.back_edges >= 5, "no back edges counted");
    }

    #[test]
    fn wrong_block_arity_fails_into_the_fallback() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let value_sym = vm.symbol("value:");
        let mut b = MethodBuilder::new("misapply", 0).max_stack(3);
        let l_value = b.literal(value_sym);
        let zero_arg = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(1);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_closure(zero_arg);
            c.push_small_int(9);
            c.send(l_value, 1);
            c.return_();
        });
        vm.install_method(probe, "misapply", m);
        let receiver = probe_instance(&mut vm, probe);
        let err = vm.send("misapply", receiver, &[]).unwrap_err();
        let RuntimeError::PrimitiveFailed { reason } = err else {
            panic!("expected PrimitiveFailed, got {err:?}");
        };
        assert_eq!(symbol_text(&vm, reason), "badNumArgs");
    }

    #[test]
    fn non_boolean_jump_condition_is_an_error() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let mut b = MethodBuilder::new("badJump", 0);
        let nil = b.literal(Value::Nil);
        let m = b.body(|c| {
            c.push_small_int(3);
            let skip = c.jump_if_true();
            c.bind(skip);
            c.push_literal(nil);
            c.return_();
        });
        vm.install_method(probe, "badJump", m);
        let receiver = probe_instance(&mut vm, probe);
        let err = vm.send("badJump", receiver, &[]).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MustBeBoolean {
                got: Value::SmallInt(3)
            }
        );
    }

    #[test]
    fn runaway_recursion_overflows_the_chain() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let spin = vm.symbol("spin");
        let mut b = MethodBuilder::new("spin", 0).max_stack(2);
        let l_spin = b.literal(spin);
        let m = b.body(|c| {
            c.push_receiver();
            c.send(l_spin, 0);
            c.return_();
        });
        vm.install_method(probe, "spin", m);
        let receiver = probe_instance(&mut vm, probe);
        let err = vm.send("spin", receiver, &[]).unwrap_err();
        assert_eq!(err, RuntimeError::StackOverflow);
    }

    #[test]
    fn make_array_preserves_push_order() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let m = MethodBuilder::new("triple", 0).max_stack(3).body(|c| {
            c.push_small_int(1);
            c.push_small_int(2);
            c.push_small_int(3);
            c.make_array(3);
            c.return_();
        });
        vm.install_method(probe, "triple", m);
        let receiver = probe_instance(&mut vm, probe);
        let array = normal(vm.send("triple", receiver, &[]).unwrap());
        let Value::Ref(r) = array else { panic!() };
        assert_eq!(
            vm.heap.array(r),
            &vec![Value::SmallInt(1), Value::SmallInt(2), Value::SmallInt(3)]
        );
        let second = normal(vm.send("at:", array, &[Value::SmallInt(2)]).unwrap());
        assert_eq!(second, Value::SmallInt(2));
        let err = vm.send("at:", array, &[Value::SmallInt(9)]).unwrap_err();
        let RuntimeError::PrimitiveFailed { reason } = err else {
            panic!("expected PrimitiveFailed");
        };
        assert_eq!(symbol_text(&vm, reason), "badIndex");
    }

    // ── fields and layout evolution through bytecode ───────────────

    #[test]
    fn field_instructions_drive_layout_evolution() {
        let mut vm = bootstrap();
        let pair = vm.create_class("Pair", Some(vm.special.object_class), 2);
        let b = MethodBuilder::new("first:second:", 2).max_stack(2);
        let m = b.body(|c| {
            c.push_temp(0);
            c.store_field(0);
            c.push_temp(1);
            c.store_field(1);
            c.push_receiver();
            c.return_();
        });
        vm.install_method(pair, "first:second:", m);
        let m = MethodBuilder::new("first", 0).body(|c| {
            c.push_field(0);
            c.return_();
        });
        vm.install_method(pair, "first", m);

        let receiver = probe_instance(&mut vm, pair);
        vm.send(
            "first:second:",
            receiver,
            &[Value::Bool(true), Value::SmallInt(9)],
        )
        .unwrap();
        assert_eq!(
            normal(vm.send("first", receiver, &[]).unwrap()),
            Value::Bool(true)
        );
        let Value::Ref(obj) = receiver else { panic!() };
        let generation = vm.heap.instance(obj).layout().generation();

        // A category change sends field 0 to the object pool.
        vm.send(
            "first:second:",
            receiver,
            &[Value::Char('x'), Value::SmallInt(10)],
        )
        .unwrap();
        assert_eq!(
            normal(vm.send("first", receiver, &[]).unwrap()),
            Value::Char('x')
        );
        assert!(vm.heap.instance(obj).layout().generation() > generation);
    }

    #[test]
    fn inst_var_reflection_round_trips() {
        let mut vm = bootstrap();
        let pair = vm.create_class("Pair", Some(vm.special.object_class), 2);
        let receiver = probe_instance(&mut vm, pair);
        let stored = normal(
            vm.send(
                "instVarAt:put:",
                receiver,
                &[Value::SmallInt(1), Value::Float(0.5)],
            )
            .unwrap(),
        );
        assert_eq!(stored, Value::Float(0.5));
        let read = normal(
            vm.send("instVarAt:", receiver, &[Value::SmallInt(1)]).unwrap(),
        );
        assert_eq!(read, Value::Float(0.5));
        let err = vm
            .send("instVarAt:", receiver, &[Value::SmallInt(0)])
            .unwrap_err();
        let RuntimeError::PrimitiveFailed { reason } = err else {
            panic!("expected PrimitiveFailed");
        };
        assert_eq!(symbol_text(&vm, reason), "badIndex");
    }

    // ── escape and materialization ─────────────────────────────────

    #[test]
    fn escape_is_idempotent_with_one_identity() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let active = vm.symbol("activeContext");
        let eq = vm.symbol("==");
        let mut b = MethodBuilder::new("captureTwice", 0).max_stack(3);
        let l_active = b.literal(active);
        let l_eq = b.literal(eq);
        let m = b.body(|c| {
            c.push_receiver();
            c.send(l_active, 0);
            c.push_receiver();
            c.send(l_active, 0);
            c.send(l_eq, 1);
            c.return_();
        });
        vm.install_method(probe, "captureTwice", m);
        let receiver = probe_instance(&mut vm, probe);
        let result = normal(vm.send("captureTwice", receiver, &[]).unwrap());
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn captured_context_keeps_identity_after_return() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let active = vm.symbol("activeContext");
        let mut b = MethodBuilder::new("capture", 0).max_stack(2);
        let l_active = b.literal(active);
        let m = b.body(|c| {
            c.push_receiver();
            c.send(l_active, 0);
            c.return_();
        });
        vm.install_method(probe, "capture", m);
        let receiver = probe_instance(&mut vm, probe);
        let context = normal(vm.send("capture", receiver, &[]).unwrap());
        let Value::Ref(context) = context else { panic!() };
        let state = vm.heap.context(context);
        assert!(state.escaped);
        assert!(state.terminated);
        assert_eq!(vm.materialized.get(&state.id), Some(&context));
        let dead =
            normal(vm.send("isDead", Value::Ref(context), &[]).unwrap());
        assert_eq!(dead, Value::Bool(true));
    }

    // ── entry modes ────────────────────────────────────────────────

    #[test]
    fn fresh_start_and_resume_produce_identical_results() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let times = vm.symbol("*");
        let mut b = MethodBuilder::new("answer", 0).max_stack(2);
        let l_times = b.literal(times);
        let m = b.body(|c| {
            c.push_small_int(6);
            c.push_small_int(7);
            c.send(l_times, 1);
            c.return_();
        });
        vm.install_method(probe, "answer", m);
        let receiver = probe_instance(&mut vm, probe);
        let fresh = normal(vm.send("answer", receiver, &[]).unwrap());

        let selector = vm.intern("answer");
        let method = crate::lookup::lookup(&vm.heap, probe, selector)
            .unwrap()
            .method;
        let id = vm.next_activation_id();
        let mut state = ContextState::new(
            id,
            CodeRef::method(method),
            receiver,
            vec![],
            8,
        );
        state.escaped = true;
        let context = vm.heap.alloc(HeapObject::Context(state));
        let resumed = normal(resume(&mut vm, context, 0).unwrap());
        assert_eq!(fresh, resumed);
        assert_eq!(fresh, Value::SmallInt(42));
    }

    #[test]
    fn resume_honors_the_saved_window_and_pc() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let m = MethodBuilder::new("stored", 0).temps(1).max_stack(2).body(|c| {
            c.push_small_int(1);
            c.pop();
            c.push_temp(0);
            c.return_();
        });
        let method = vm.install_method(probe, "stored", m);
        let id = vm.next_activation_id();
        let mut state = ContextState::new(
            id,
            CodeRef::method(method),
            Value::Nil,
            vec![Value::SmallInt(123)],
            2,
        );
        state.escaped = true;
        let context = vm.heap.alloc(HeapObject::Context(state));
        // Resume past the first two instructions: the saved temp comes out.
        let resumed = normal(resume(&mut vm, context, 2).unwrap());
        assert_eq!(resumed, Value::SmallInt(123));
    }

    // ── non-local return and unwind protection ─────────────────────

    /// Home method whose block unwinds through `n` protected frames.
    fn install_nlr_protocol(vm: &mut VM, probe: ObjectRef) {
        let eq = vm.symbol("=");
        let minus = vm.symbol("-");
        let value_sym = vm.symbol("value");
        let ensure = vm.symbol("ensure:");
        let dive = vm.symbol("dive:block:log:cell:");
        let bump = vm.symbol("bump");
        let at_put = vm.symbol("at:put:");

        let mut b = MethodBuilder::new("dive:block:log:cell:", 4).max_stack(4);
        let l_eq = b.literal(eq);
        let l_minus = b.literal(minus);
        let l_value = b.literal(value_sym);
        let l_ensure = b.literal(ensure);
        let l_dive = b.literal(dive);
        let l_bump = b.literal(bump);
        let l_at_put = b.literal(at_put);
        let recurse = b.block(block(0, 0, 0, 6, |c| {
            c.push_receiver();
            c.push_temp(0);
            c.push_small_int(1);
            c.send(l_minus, 1);
            c.push_temp(1);
            c.push_temp(2);
            c.push_temp(3);
            c.send(l_dive, 4);
            c.return_();
        }));
        let handler = b.block(block(0, 0, 0, 4, |c| {
            c.push_temp(2);
            c.push_temp(3);
            c.send(l_bump, 0);
            c.push_temp(0);
            c.send(l_at_put, 2);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_temp(0);
            c.push_small_int(0);
            c.send(l_eq, 1);
            let bottom = c.jump_if_true();
            c.push_closure(recurse);
            c.push_closure(handler);
            c.send(l_ensure, 1);
            c.return_();
            c.bind(bottom);
            c.push_temp(1);
            c.send(l_value, 0);
            c.return_();
        });
        vm.install_method(probe, "dive:block:log:cell:", m);

        let dive = vm.symbol("dive:block:log:cell:");
        let mut b = MethodBuilder::new("launch:log:cell:", 3).max_stack(6);
        let l_dive = b.literal(dive);
        let escaper = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(777);
            c.non_local_return();
        }));
        let m = b.body(|c| {
            c.push_receiver();
            c.push_temp(0);
            c.push_closure(escaper);
            c.push_temp(1);
            c.push_temp(2);
            c.send(l_dive, 4);
            c.pop();
            c.push_small_int(999);
            c.return_();
        });
        vm.install_method(probe, "launch:log:cell:", m);
    }

    #[test]
    fn non_local_return_unwinds_protected_frames_innermost_first() {
        for n in [0usize, 1, 2, 5] {
            let mut vm = bootstrap();
            let probe = probe_class(&mut vm);
            install_nlr_protocol(&mut vm, probe);
            let cell_class = install_cell(&mut vm);
            let receiver = probe_instance(&mut vm, probe);
            let cell = new_cell(&mut vm, cell_class);
            let log = vm
                .heap
                .alloc(HeapObject::Array(vec![Value::Nil; n]));

            let result = vm
                .send(
                    "launch:log:cell:",
                    receiver,
                    &[
                        Value::SmallInt(n as i64),
                        Value::Ref(log),
                        cell,
                    ],
                )
                .unwrap();
            // The value lands at the home method's sender, skipping the
            // rest of launch's body.
            assert_eq!(result, Completion::Normal(Value::SmallInt(777)), "n={n}");
            // Each intervening protection ran exactly once...
            assert_eq!(cell_count(&vm, cell), n as i64, "n={n}");
            // ...in innermost-to-outermost order.
            let recorded: Vec<Value> = vm.heap.array(log).clone();
            let expected: Vec<Value> =
                (1..=n as i64).map(Value::SmallInt).collect();
            assert_eq!(recorded, expected, "n={n}");
        }
    }

    #[test]
    fn protection_runs_once_on_normal_return_too() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let cell_class = install_cell(&mut vm);
        let ensure = vm.symbol("ensure:");
        let bump = vm.symbol("bump");
        let mut b = MethodBuilder::new("protected:", 1).max_stack(3);
        let l_ensure = b.literal(ensure);
        let l_bump = b.literal(bump);
        let main = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(42);
            c.return_();
        }));
        let handler = b.block(block(0, 0, 0, 2, |c| {
            c.push_temp(0);
            c.send(l_bump, 0);
            c.return_();
        }));
        let m = b.body(|c| {
            c.push_closure(main);
            c.push_closure(handler);
            c.send(l_ensure, 1);
            c.return_();
        });
        vm.install_method(probe, "protected:", m);
        let receiver = probe_instance(&mut vm, probe);
        let cell = new_cell(&mut vm, cell_class);
        let result =
            normal(vm.send("protected:", receiver, &[cell]).unwrap());
        assert_eq!(result, Value::SmallInt(42));
        assert_eq!(cell_count(&vm, cell), 1);
    }

    #[test]
    fn late_non_local_return_is_an_invalid_target() {
        let mut vm = bootstrap();
        let probe = probe_class(&mut vm);
        let mut b = MethodBuilder::new("maker", 0).max_stack(2);
        let escaper = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(5);
            c.non_local_return();
        }));
        let m = b.body(|c| {
            c.push_closure(escaper);
            c.return_();
        });
        vm.install_method(probe, "maker", m);
        let receiver = probe_instance(&mut vm, probe);
        let closure = normal(vm.send("maker", receiver, &[]).unwrap());
        // The home method has returned; firing the block now must be the
        // designated error, not a crash and not a value.
        let err = vm.send("value", closure, &[]).unwrap_err();
        assert!(
            matches!(err, RuntimeError::InvalidReturnTarget { .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn unwind_to_a_live_foreign_chain_is_reported_upward() {
        let mut vm = bootstrap();
        let mut b = MethodBuilder::new("foreignHome", 0).max_stack(2);
        let escaper = b.block(block(0, 0, 0, 1, |c| {
            c.push_small_int(9);
            c.non_local_return();
        }));
        let m = b.body(|c| {
            c.push_small_int(0);
            c.return_();
        });
        let method = vm.heap.alloc(HeapObject::Method(m));

        // A live activation of that method, owned by some other chain.
        let id = vm.next_activation_id();
        let mut state =
            ContextState::new(id, CodeRef::method(method), Value::Nil, vec![], 2);
        state.escaped = true;
        let context = vm.heap.alloc(HeapObject::Context(state));
        vm.materialized.insert(id, context);

        let closure = vm.heap.alloc(HeapObject::Closure(Closure {
            method,
            block_index: escaper,
            receiver: Value::Nil,
            copied: vec![],
            home: id,
        }));
        let completion = vm.send("value", Value::Ref(closure), &[]).unwrap();
        assert_eq!(
            completion,
            Completion::Unwind {
                value: Value::SmallInt(9),
                target: id
            }
        );
    }

    // ── safepoints ─────────────────────────────────────────────────

    #[test]
    fn pending_interrupts_drain_at_the_next_send() {
        let mut vm = bootstrap();
        let seen = Rc::new(StdCell::new(0usize));
        let observed = seen.clone();
        vm.interrupt_hook = Some(Box::new(move |_| {
            observed.set(observed.get() + 1);
        }));
        vm.safepoint.request(Interrupt::UserBreak);
        vm.safepoint.request(Interrupt::TimerExpired);
        vm.send("+", Value::SmallInt(1), &[Value::SmallInt(1)]).unwrap();
        assert_eq!(seen.get(), 2);
        assert!(!vm.safepoint.has_pending());
    }

    #[test]
    fn interrupts_raised_mid_run_are_seen_at_a_later_safepoint() {
        let mut vm = bootstrap();
        let cell_class = install_cell(&mut vm);
        let seen = Rc::new(StdCell::new(0usize));
        let observed = seen.clone();
        let safepoint = vm.safepoint.clone();
        // Re-arm from inside the hook: the second delivery can only come
        // from a later safepoint inside the running loop.
        vm.interrupt_hook = Some(Box::new(move |_| {
            if observed.get() == 0 {
                safepoint.request(Interrupt::ProcessSwitch);
            }
            observed.set(observed.get() + 1);
        }));
        vm.safepoint.request(Interrupt::UserBreak);
        let cell = new_cell(&mut vm, cell_class);
        vm.send("countTo:", cell, &[Value::SmallInt(10)]).unwrap();
        assert!(seen.get() >= 2, "only {} interrupts observed", seen.get());
    }
}
