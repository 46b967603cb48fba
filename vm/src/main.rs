use clap::Parser as ClapParser;
use std::process;

use object::{HeapObject, Value};
use vm::assemble::{block, MethodBuilder};
use vm::interpreter::Completion;
use vm::safepoint::Interrupt;
use vm::{special, VM};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Demos to run in order: factorial, layouts, loop (all when empty)
    #[arg(required = false, help = "Demos to run (factorial, layouts, loop)")]
    demos: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut vm = special::bootstrap();

    let demos: Vec<String> = if cli.demos.is_empty() {
        vec!["factorial".into(), "layouts".into(), "loop".into()]
    } else {
        cli.demos
    };

    for demo in &demos {
        match demo.as_str() {
            "factorial" => run_factorial(&mut vm),
            "layouts" => run_layouts(&mut vm),
            "loop" => run_loop(&mut vm),
            other => {
                eprintln!("unknown demo '{other}'");
                process::exit(1);
            }
        }
    }
}

/// Recursive factorial through closures; large enough inputs overflow the
/// small-integer representation and come back as large integers.
fn run_factorial(vm: &mut VM) {
    let arith = vm.create_class("Arith", Some(vm.special.object_class), 0);

    let le = vm.symbol("<=");
    let minus = vm.symbol("-");
    let times = vm.symbol("*");
    let fact = vm.symbol("fact:");
    let if_true_false = vm.symbol("ifTrue:ifFalse:");

    let mut b = MethodBuilder::new("fact:", 1).max_stack(4);
    let l_le = b.literal(le);
    let l_minus = b.literal(minus);
    let l_times = b.literal(times);
    let l_fact = b.literal(fact);
    let l_if = b.literal(if_true_false);
    let base = b.block(block(0, 0, 0, 1, |c| {
        c.push_small_int(1);
        c.return_();
    }));
    let recurse = b.block(block(0, 0, 0, 4, |c| {
        c.push_temp(0);
        c.push_receiver();
        c.push_temp(0);
        c.push_small_int(1);
        c.send(l_minus, 1);
        c.send(l_fact, 1);
        c.send(l_times, 1);
        c.return_();
    }));
    let method = b.body(|c| {
        c.push_temp(0);
        c.push_small_int(1);
        c.send(l_le, 1);
        c.push_closure(base);
        c.push_closure(recurse);
        c.send(l_if, 2);
        c.return_();
    });
    vm.install_method(arith, "fact:", method);

    let receiver = Value::Ref(vm.heap.instantiate(arith));
    println!("== factorial ==");
    for n in [10i64, 25] {
        match vm.send("fact:", receiver, &[Value::SmallInt(n)]) {
            Ok(Completion::Normal(value)) => {
                println!("{n}! = {}", render(vm, value));
            }
            Ok(other) => println!("{n}! -> {other:?}"),
            Err(err) => {
                eprintln!("factorial failed: {err:?}");
                process::exit(1);
            }
        }
    }
}

/// Walk a class through layout evolution: typed slots, a category change,
/// and the migration of a stale sibling.
fn run_layouts(vm: &mut VM) {
    println!("== layouts ==");
    let point = vm.create_class("Point3", Some(vm.special.object_class), 3);
    let a = vm.heap.instantiate(point);
    let b = vm.heap.instantiate(point);

    vm.heap.write_field(a, 0, Value::Bool(true));
    vm.heap.write_field(a, 1, Value::SmallInt(7));
    vm.heap.write_field(a, 2, Value::Char('q'));
    print_layout(vm, point);

    // Category change: field 1 leaves the primitive pool.
    let tag = vm.symbol("tag");
    vm.heap.write_field(a, 1, tag);
    print_layout(vm, point);

    // The sibling never wrote anything; it migrates on first access.
    let sibling_field = vm.heap.read_field(b, 1);
    println!("sibling field 1 = {}", render(vm, sibling_field));
}

fn print_layout(vm: &VM, class: object::ObjectRef) {
    let class = vm.heap.class(class);
    let layout = class.current_layout().expect("class has no layout yet");
    println!(
        "{} generation {} (bools {}, primitives {}, objects {}):",
        class.name,
        layout.generation(),
        layout.num_bools(),
        layout.num_primitives(),
        layout.num_objects(),
    );
    for field in 0..layout.field_count() {
        println!("  field {field}: {:?}", layout.location(field));
    }
}

/// A cooperative loop: `whileTrue:` back edges polling the safepoint.
fn run_loop(vm: &mut VM) {
    println!("== loop ==");
    let cell = vm.create_class("Counter", Some(vm.special.object_class), 1);

    let m = MethodBuilder::new("value", 0).body(|c| {
        c.push_field(0);
        c.return_();
    });
    vm.install_method(cell, "value", m);

    let plus = vm.symbol("+");
    let mut b = MethodBuilder::new("bump", 0).max_stack(3);
    let l_plus = b.literal(plus);
    let m = b.body(|c| {
        c.push_field(0);
        c.push_small_int(1);
        c.send(l_plus, 1);
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

    vm.interrupt_hook = Some(Box::new(|interrupt| {
        println!("safepoint observed {interrupt:?}");
    }));
    vm.safepoint.request(Interrupt::UserBreak);

    let counter = vm.heap.instantiate(cell);
    vm.heap.write_field(counter, 0, Value::SmallInt(0));
    match vm.send("countTo:", Value::Ref(counter), &[Value::SmallInt(100_000)]) {
        Ok(Completion::Normal(value)) => {
            println!(
                "counted to {} over {} back edges",
                render(vm, value),
                vm.back_edges
            );
        }
        Ok(other) => println!("loop -> {other:?}"),
        Err(err) => {
            eprintln!("loop failed: {err:?}");
            process::exit(1);
        }
    }
}

fn render(vm: &VM, value: Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Char(c) => format!("${c}"),
        Value::SmallInt(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Ref(r) => match vm.heap.get(r) {
            HeapObject::LargeInt(n) => format!("{n}"),
            HeapObject::Symbol(s) => format!("#{s}"),
            HeapObject::Array(elements) => {
                let parts: Vec<String> =
                    elements.iter().map(|e| render(vm, *e)).collect();
                format!("({})", parts.join(" "))
            }
            HeapObject::Instance(instance) => {
                format!("a {}", vm.heap.class(instance.class).name)
            }
            HeapObject::Class(class) => class.name.clone(),
            HeapObject::Closure(_) => "a BlockClosure".to_string(),
            HeapObject::Context(_) => "a Context".to_string(),
            HeapObject::Method(method) => {
                format!("a CompiledMethod({})", method.name)
            }
        },
    }
}
