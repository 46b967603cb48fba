use log::debug;

use object::{Class, Heap, HeapObject, ObjectRef, SpecialObjects, Value};

use crate::assemble::MethodBuilder;
use crate::primitives::{default_primitives, primitive_index_by_name};
use crate::VM;

/// Build the kernel universe: the well-known classes, the primitive
/// table, and the kernel methods every chain depends on.
pub fn bootstrap() -> VM {
    let mut heap = Heap::new();

    let object_class = class(&mut heap, "Object", None, 0);
    let undefined_object_class =
        class(&mut heap, "UndefinedObject", Some(object_class), 0);
    let boolean_class = class(&mut heap, "Boolean", Some(object_class), 0);
    let true_class = class(&mut heap, "True", Some(boolean_class), 0);
    let false_class = class(&mut heap, "False", Some(boolean_class), 0);
    let small_integer_class =
        class(&mut heap, "SmallInteger", Some(object_class), 0);
    let large_integer_class =
        class(&mut heap, "LargeInteger", Some(object_class), 0);
    let float_class = class(&mut heap, "Float", Some(object_class), 0);
    let character_class = class(&mut heap, "Character", Some(object_class), 0);
    let symbol_class = class(&mut heap, "Symbol", Some(object_class), 0);
    let array_class = class(&mut heap, "Array", Some(object_class), 0);
    let block_class = class(&mut heap, "BlockClosure", Some(object_class), 0);
    let context_class = class(&mut heap, "Context", Some(object_class), 0);
    let method_class = class(&mut heap, "CompiledMethod", Some(object_class), 0);
    let class_class = class(&mut heap, "Class", Some(object_class), 0);

    let special = SpecialObjects {
        object_class,
        undefined_object_class,
        boolean_class,
        true_class,
        false_class,
        small_integer_class,
        large_integer_class,
        float_class,
        character_class,
        symbol_class,
        array_class,
        block_class,
        context_class,
        method_class,
        class_class,
    };

    let mut vm = VM::with_special(heap, special);
    vm.primitives = default_primitives();
    install_kernel_methods(&mut vm);
    debug!(
        "bootstrap complete: {} primitives, {} interned selectors",
        vm.primitives.len(),
        vm.intern_table.len()
    );
    vm
}

fn class(
    heap: &mut Heap,
    name: &str,
    superclass: Option<ObjectRef>,
    field_count: u16,
) -> ObjectRef {
    heap.alloc(HeapObject::Class(Class::new(
        name.to_string(),
        superclass,
        field_count,
    )))
}

fn prim(vm: &VM, name: &str) -> usize {
    primitive_index_by_name(&vm.primitives, name)
        .unwrap_or_else(|| panic!("unknown primitive {name}"))
}

/// A method whose primitive cannot fail for receivers this class routes
/// to it; the body is the conventional dead fallback.
fn primitive_stub(
    vm: &mut VM,
    class: ObjectRef,
    selector: &str,
    num_args: u8,
    primitive_name: &str,
) {
    let index = prim(vm, primitive_name);
    let method = MethodBuilder::new(selector, num_args)
        .primitive(index)
        .body(|code| {
            code.push_receiver();
            code.return_();
        });
    vm.install_method(class, selector, method);
}

/// A method whose fallback surfaces the failure reason through
/// `primitiveFailed:`.
fn primitive_or_error(
    vm: &mut VM,
    class: ObjectRef,
    selector: &str,
    num_args: u8,
    primitive_name: &str,
) {
    let index = prim(vm, primitive_name);
    let error_slot = num_args as u16;
    let failed = vm.symbol("primitiveFailed:");
    let mut m = MethodBuilder::new(selector, num_args)
        .temps(1)
        .primitive(index)
        .error_temp(error_slot);
    let failed = m.literal(failed);
    let method = m.body(|code| {
        code.push_receiver();
        code.push_temp(error_slot);
        code.send(failed, 1);
        code.return_();
    });
    vm.install_method(class, selector, method);
}

/// A small-integer operation that retries through the large-integer
/// representation when the primitive fails (overflow, large argument).
fn small_with_large_fallback(vm: &mut VM, selector: &str, primitive_name: &str) {
    let index = prim(vm, primitive_name);
    let as_large = vm.symbol("asLargeInteger");
    let retry = vm.symbol(selector);
    let mut m = MethodBuilder::new(selector, 1).primitive(index).max_stack(4);
    let as_large = m.literal(as_large);
    let retry = m.literal(retry);
    let method = m.body(|code| {
        code.push_receiver();
        code.send(as_large, 0);
        code.push_temp(0);
        code.send(retry, 1);
        code.return_();
    });
    vm.install_method(vm.special.small_integer_class, selector, method);
}

fn constant_method(vm: &mut VM, class: ObjectRef, selector: &str, value: Value) {
    constant_method_with_args(vm, class, selector, 0, value);
}

/// Ignore the arguments and answer a constant (the untaken conditional
/// branches).
fn constant_method_with_args(
    vm: &mut VM,
    class: ObjectRef,
    selector: &str,
    num_args: u8,
    value: Value,
) {
    let mut m = MethodBuilder::new(selector, num_args);
    let literal = m.literal(value);
    let method = m.body(|code| {
        code.push_literal(literal);
        code.return_();
    });
    vm.install_method(class, selector, method);
}

fn install_kernel_methods(vm: &mut VM) {
    install_object_protocol(vm);
    install_boolean_protocol(vm);
    install_integer_protocol(vm);
    install_float_protocol(vm);
    install_collection_protocol(vm);
    install_block_protocol(vm);
    install_context_protocol(vm);
}

fn install_object_protocol(vm: &mut VM) {
    let object = vm.special.object_class;
    primitive_stub(vm, object, "==", 1, "identity_eq");
    primitive_stub(vm, object, "~~", 1, "identity_ne");
    primitive_stub(vm, object, "=", 1, "identity_eq");
    primitive_stub(vm, object, "~=", 1, "identity_ne");
    primitive_stub(vm, object, "class", 0, "class_of");
    primitive_stub(vm, object, "primitiveFailed:", 1, "primitive_failed");
    primitive_or_error(vm, object, "instVarAt:", 1, "inst_var_at");
    primitive_or_error(vm, object, "instVarAt:put:", 2, "inst_var_at_put");
    primitive_or_error(vm, object, "activeContext", 0, "context_capture");

    let method = MethodBuilder::new("yourself", 0).body(|code| {
        code.push_receiver();
        code.return_();
    });
    vm.install_method(object, "yourself", method);

    constant_method(vm, object, "isNil", Value::Bool(false));
    let undefined = vm.special.undefined_object_class;
    constant_method(vm, undefined, "isNil", Value::Bool(true));
}

fn install_boolean_protocol(vm: &mut VM) {
    let true_class = vm.special.true_class;
    let false_class = vm.special.false_class;

    constant_method(vm, true_class, "not", Value::Bool(false));
    constant_method(vm, false_class, "not", Value::Bool(true));

    // The conditional protocol evaluates one of the argument blocks; the
    // untaken branch is never touched.
    let value = vm.symbol("value");

    let mut m = MethodBuilder::new("ifTrue:ifFalse:", 2);
    let l = m.literal(value);
    let method = m.body(|code| {
        code.push_temp(0);
        code.send(l, 0);
        code.return_();
    });
    vm.install_method(true_class, "ifTrue:ifFalse:", method);

    let mut m = MethodBuilder::new("ifTrue:ifFalse:", 2);
    let l = m.literal(value);
    let method = m.body(|code| {
        code.push_temp(1);
        code.send(l, 0);
        code.return_();
    });
    vm.install_method(false_class, "ifTrue:ifFalse:", method);

    let mut m = MethodBuilder::new("ifTrue:", 1);
    let l = m.literal(value);
    let method = m.body(|code| {
        code.push_temp(0);
        code.send(l, 0);
        code.return_();
    });
    vm.install_method(true_class, "ifTrue:", method);
    constant_method_with_args(vm, false_class, "ifTrue:", 1, Value::Nil);

    let mut m = MethodBuilder::new("ifFalse:", 1);
    let l = m.literal(value);
    let method = m.body(|code| {
        code.push_temp(0);
        code.send(l, 0);
        code.return_();
    });
    vm.install_method(false_class, "ifFalse:", method);
    constant_method_with_args(vm, true_class, "ifFalse:", 1, Value::Nil);
}

fn install_integer_protocol(vm: &mut VM) {
    small_with_large_fallback(vm, "+", "small_add");
    small_with_large_fallback(vm, "-", "small_sub");
    small_with_large_fallback(vm, "*", "small_mul");
    small_with_large_fallback(vm, "//", "small_div");
    small_with_large_fallback(vm, "\\\\", "small_mod");
    small_with_large_fallback(vm, "<", "small_lt");
    small_with_large_fallback(vm, "<=", "small_le");
    small_with_large_fallback(vm, ">", "small_gt");
    small_with_large_fallback(vm, ">=", "small_ge");
    small_with_large_fallback(vm, "=", "small_eq");
    small_with_large_fallback(vm, "~=", "small_ne");

    let small = vm.special.small_integer_class;
    primitive_stub(vm, small, "asLargeInteger", 0, "small_as_large");
    primitive_stub(vm, small, "asFloat", 0, "small_as_float");

    // negated has no argument to coerce, so the fallback widens directly.
    let index = prim(vm, "small_negated");
    let as_large = vm.symbol("asLargeInteger");
    let negated = vm.symbol("negated");
    let mut m = MethodBuilder::new("negated", 0).primitive(index);
    let as_large = m.literal(as_large);
    let negated = m.literal(negated);
    let method = m.body(|code| {
        code.push_receiver();
        code.send(as_large, 0);
        code.send(negated, 0);
        code.return_();
    });
    vm.install_method(small, "negated", method);

    let large = vm.special.large_integer_class;
    primitive_or_error(vm, large, "+", 1, "large_add");
    primitive_or_error(vm, large, "-", 1, "large_sub");
    primitive_or_error(vm, large, "*", 1, "large_mul");
    primitive_or_error(vm, large, "//", 1, "large_div");
    primitive_or_error(vm, large, "\\\\", 1, "large_mod");
    primitive_or_error(vm, large, "negated", 0, "large_negated");
    primitive_or_error(vm, large, "<", 1, "large_lt");
    primitive_or_error(vm, large, "<=", 1, "large_le");
    primitive_or_error(vm, large, ">", 1, "large_gt");
    primitive_or_error(vm, large, ">=", 1, "large_ge");
    primitive_or_error(vm, large, "=", 1, "large_eq");
    primitive_or_error(vm, large, "~=", 1, "large_ne");
    primitive_stub(vm, large, "normalized", 0, "large_normalized");
    primitive_stub(vm, large, "asFloat", 0, "large_as_float");
}

fn install_float_protocol(vm: &mut VM) {
    let float = vm.special.float_class;
    primitive_or_error(vm, float, "+", 1, "float_add");
    primitive_or_error(vm, float, "-", 1, "float_sub");
    primitive_or_error(vm, float, "*", 1, "float_mul");
    primitive_or_error(vm, float, "/", 1, "float_div");
    primitive_or_error(vm, float, "sqrt", 0, "float_sqrt");
    primitive_or_error(vm, float, "<", 1, "float_lt");
    primitive_or_error(vm, float, "<=", 1, "float_le");
    primitive_or_error(vm, float, ">", 1, "float_gt");
    primitive_or_error(vm, float, ">=", 1, "float_ge");
    primitive_or_error(vm, float, "=", 1, "float_eq");
    primitive_or_error(vm, float, "~=", 1, "float_ne");
}

fn install_collection_protocol(vm: &mut VM) {
    let array = vm.special.array_class;
    primitive_or_error(vm, array, "at:", 1, "array_at");
    primitive_or_error(vm, array, "at:put:", 2, "array_at_put");
    primitive_or_error(vm, array, "size", 0, "array_size");
}

fn install_block_protocol(vm: &mut VM) {
    let block = vm.special.block_class;
    primitive_or_error(vm, block, "value", 0, "block_value0");
    primitive_or_error(vm, block, "value:", 1, "block_value1");
    primitive_or_error(vm, block, "value:value:", 2, "block_value2");
    primitive_or_error(vm, block, "value:value:value:", 3, "block_value3");
    primitive_or_error(vm, block, "ensure:", 1, "block_ensure");

    // whileTrue: is plain bytecode: the jump back to the condition send is
    // the interpreter's canonical back edge.
    let value = vm.symbol("value");
    let mut m = MethodBuilder::new("whileTrue:", 1).max_stack(2);
    let value = m.literal(value);
    let nil = m.literal(Value::Nil);
    let method = m.body(|code| {
        let head = code.current_pc();
        code.push_receiver();
        code.send(value, 0);
        let exit = code.jump_if_false();
        code.push_temp(0);
        code.send(value, 0);
        code.pop();
        code.jump_back(head);
        code.bind(exit);
        code.push_literal(nil);
        code.return_();
    });
    vm.install_method(block, "whileTrue:", method);
}

fn install_context_protocol(vm: &mut VM) {
    let context = vm.special.context_class;
    primitive_stub(vm, context, "isDead", 0, "context_is_dead");
}
