use crate::code::CodeRef;
use crate::heap::ObjectRef;
use crate::value::Value;

/// Identity of one activation, stable across materialization.
///
/// Virtual frames and their materialized counterparts share the same id;
/// closures and unwind signals refer to activations only through it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ActivationId(pub u64);

/// The logical state of one activation record.
///
/// The same record backs both representations: owned inline by the
/// interpreter's frame stack while virtual, and held in a heap `Context`
/// object once escaped. `slots` holds the static window (arguments,
/// copied values, temporaries, in that order for blocks) followed by the
/// dynamic operand region; `base` is the window size and `sp` the operand
/// top. Stack discipline violations are programmer errors and fail fast.
pub struct ContextState {
    pub id: ActivationId,
    pub code: CodeRef,
    pub receiver: Value,
    /// The closure being run, for block activations.
    pub closure: Option<ObjectRef>,
    /// Home method activation, for block activations; `None` means this
    /// activation is itself a method activation.
    pub home: Option<ActivationId>,
    pub sender: Option<ActivationId>,
    pub pc: usize,
    pub sp: usize,
    pub base: usize,
    pub slots: Vec<Value>,
    /// Unwind-protection blocks registered on this activation, in
    /// registration order; each runs exactly once when the activation is
    /// completed, innermost (latest) first.
    pub handlers: Vec<Value>,
    pub escaped: bool,
    pub terminated: bool,
}

impl ContextState {
    /// A fresh activation for `code` with the given static window already
    /// laid out in `window`.
    pub fn new(
        id: ActivationId,
        code: CodeRef,
        receiver: Value,
        window: Vec<Value>,
        max_stack: usize,
    ) -> ContextState {
        let base = window.len();
        let mut slots = window;
        slots.resize(base + max_stack, Value::Nil);
        ContextState {
            id,
            code,
            receiver,
            closure: None,
            home: None,
            sender: None,
            pc: 0,
            sp: base,
            base,
            slots,
            handlers: Vec::new(),
            escaped: false,
            terminated: false,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        assert!(!self.terminated, "push on terminated activation");
        assert!(self.sp < self.slots.len(), "operand stack overflow");
        self.slots[self.sp] = value;
        self.sp += 1;
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        assert!(!self.terminated, "pop on terminated activation");
        assert!(self.sp > self.base, "operand stack underflow");
        self.sp -= 1;
        self.slots[self.sp]
    }

    /// Pop `n` values, returned in their original bottom-to-top order.
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        assert!(!self.terminated, "pop on terminated activation");
        assert!(self.sp - self.base >= n, "operand stack underflow");
        let start = self.sp - n;
        let values = self.slots[start..self.sp].to_vec();
        self.sp = start;
        values
    }

    #[inline]
    pub fn peek(&self) -> Value {
        assert!(self.sp > self.base, "peek on empty operand stack");
        self.slots[self.sp - 1]
    }

    /// Depth of the dynamic operand region.
    #[inline]
    pub fn stack_depth(&self) -> usize {
        self.sp - self.base
    }

    /// Read a slot in the static window.
    #[inline]
    pub fn window_slot(&self, index: usize) -> Value {
        assert!(index < self.base, "slot {index} outside the window");
        self.slots[index]
    }

    /// Write a slot in the static window.
    #[inline]
    pub fn set_window_slot(&mut self, index: usize, value: Value) {
        assert!(!self.terminated, "store on terminated activation");
        assert!(index < self.base, "slot {index} outside the window");
        self.slots[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(window: usize, max_stack: usize) -> ContextState {
        ContextState::new(
            ActivationId(0),
            CodeRef::method(ObjectRef::for_tests(0)),
            Value::Nil,
            vec![Value::Nil; window],
            max_stack,
        )
    }

    #[test]
    fn pop_n_preserves_original_order() {
        let mut ctx = state(0, 4);
        ctx.push(Value::SmallInt(1));
        ctx.push(Value::SmallInt(2));
        ctx.push(Value::SmallInt(3));
        let values = ctx.pop_n(2);
        assert_eq!(values, vec![Value::SmallInt(2), Value::SmallInt(3)]);
        assert_eq!(ctx.pop(), Value::SmallInt(1));
    }

    #[test]
    fn pop_n_then_repush_restores_state() {
        let mut ctx = state(1, 4);
        ctx.push(Value::SmallInt(10));
        ctx.push(Value::Bool(true));
        ctx.push(Value::Char('k'));
        let before_sp = ctx.sp;
        let values = ctx.pop_n(3);
        for value in values {
            ctx.push(value);
        }
        assert_eq!(ctx.sp, before_sp);
        assert_eq!(ctx.peek(), Value::Char('k'));
        assert_eq!(ctx.pop(), Value::Char('k'));
        assert_eq!(ctx.pop(), Value::Bool(true));
        assert_eq!(ctx.pop(), Value::SmallInt(10));
    }

    #[test]
    #[should_panic(expected = "operand stack overflow")]
    fn push_past_capacity_panics() {
        let mut ctx = state(0, 1);
        ctx.push(Value::Nil);
        ctx.push(Value::Nil);
    }

    #[test]
    #[should_panic(expected = "operand stack underflow")]
    fn pop_below_window_panics() {
        let mut ctx = state(2, 2);
        ctx.pop();
    }

    #[test]
    #[should_panic(expected = "terminated activation")]
    fn terminated_activation_rejects_access() {
        let mut ctx = state(0, 2);
        ctx.terminated = true;
        ctx.push(Value::Nil);
    }
}
