//! Engine-level behavior: front-ends, output, classes, exit handlers.

mod common;

use std::sync::Arc;

use common::{def, engine, run, run_inspect};
use garnet_macros::{assert_matches, assert_raises};
use garnet_vm::compiler::{
    CallInfo, ClassDefKind, CompileError, Instruction, Iseq, IseqBuilder,
};
use garnet_vm::runtime::Symbol;
use garnet_vm::{Engine, Error, Value, VmConfig};

#[test]
fn test_evaluate_through_frontend() {
    let (mut engine, _) = engine();
    engine.set_frontend(Arc::new(|source: &str, path: &str, line: u32| {
        let mut b = IseqBuilder::top().with_path(path).at_line(line);
        b.put_str(source);
        b.send("size", 0);
        b.leave();
        b.build()
    }));
    assert_eq!(engine.evaluate("hello", "(eval)", 1).unwrap(), Value::Integer(5));
}

#[test]
fn test_frontend_errors_surface_as_compile_errors() {
    let (mut engine, _) = engine();
    engine.set_frontend(Arc::new(|_: &str, path: &str, line: u32| -> Result<Iseq, CompileError> {
        Err(CompileError::Syntax {
            path: path.to_string(),
            line,
            message: "unexpected end-of-input".to_string(),
        })
    }));
    let err = engine.evaluate("def", "broken.rb", 3).unwrap_err();
    assert_matches!(err, Error::Compile(CompileError::Syntax { line: 3, .. }));
    assert_eq!(err.to_string(), "broken.rb:3: unexpected end-of-input");
}

#[test]
fn test_unclosed_region_rejected_by_builder() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    b.begin();
    b.put_nil();
    assert_matches!(
        run(&mut engine, b),
        Err(Error::Compile(CompileError::Region { .. }))
    );
}

#[test]
fn test_output_is_captured() {
    let (mut engine, output) = engine();
    let mut b = IseqBuilder::top();
    b.put_self();
    b.put_int(1);
    b.put_str("two");
    b.fcall("puts", 2);
    b.emit(Instruction::Pop);
    b.put_self();
    b.put_str("three");
    b.put_sym("four");
    b.fcall("p", 2);
    b.leave();
    run(&mut engine, b).unwrap();
    assert_eq!(output.text(), "1\ntwo\n\"three\"\n:four\n");
}

#[test]
fn test_class_with_instance_state() {
    let (mut engine, _) = engine();
    let mut class = IseqBuilder::class_body("Counter");

    let mut init = IseqBuilder::method("initialize");
    init.put_int(0);
    init.emit(Instruction::SetIvar(Symbol::intern("@n")));
    init.put_nil();
    init.leave();
    def(&mut class, "initialize", init);

    let mut bump = IseqBuilder::method("bump");
    bump.emit(Instruction::GetIvar(Symbol::intern("@n")));
    bump.put_int(1);
    bump.send("+", 1);
    bump.emit(Instruction::Dup);
    bump.emit(Instruction::SetIvar(Symbol::intern("@n")));
    bump.leave();
    def(&mut class, "bump", bump);
    class.put_nil();
    class.leave();

    let mut b = IseqBuilder::top();
    let c = b.local("c");
    b.define_class(
        "Counter",
        ClassDefKind::Class { superclass: false },
        class.build().unwrap(),
    );
    b.emit(Instruction::Pop);
    b.get_const("Counter");
    b.send("new", 0);
    b.set_local(c);
    b.get_local(c);
    b.send("bump", 0);
    b.emit(Instruction::Pop);
    b.get_local(c);
    b.send("bump", 0);
    b.leave();
    assert_eq!(run(&mut engine, b).unwrap(), Value::Integer(2));
}

#[test]
fn test_zsuper_passes_current_arguments() {
    let (mut engine, _) = engine();
    let mut base = IseqBuilder::class_body("Base");
    let mut greet = IseqBuilder::method("greet");
    let name = greet.required("name");
    greet.put_str("hello ");
    greet.get_local(name);
    greet.send("+", 1);
    greet.leave();
    def(&mut base, "greet", greet);
    base.put_nil();
    base.leave();

    let mut child = IseqBuilder::class_body("Child");
    let mut greet = IseqBuilder::method("greet");
    greet.required("name");
    greet.emit(Instruction::ZSuper);
    greet.put_str("!");
    greet.send("+", 1);
    greet.leave();
    def(&mut child, "greet", greet);
    child.put_nil();
    child.leave();

    let mut b = IseqBuilder::top();
    b.define_class("Base", ClassDefKind::Class { superclass: false }, base.build().unwrap());
    b.emit(Instruction::Pop);
    b.get_const("Base");
    b.define_class("Child", ClassDefKind::Class { superclass: true }, child.build().unwrap());
    b.emit(Instruction::Pop);
    b.get_const("Child");
    b.send("new", 0);
    b.put_str("garnet");
    b.send("greet", 1);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "\"hello garnet!\"");
}

#[test]
fn test_deep_recursion_raises_system_stack_error() {
    let mut engine = Engine::with_config(
        VmConfig::default()
            .with_report_unhandled(false)
            .with_max_frame_depth(64),
    );
    let mut b = IseqBuilder::top();
    let mut down = IseqBuilder::method("down");
    down.put_self();
    down.fcall("down", 0);
    down.leave();
    def(&mut b, "down", down);
    b.put_self();
    b.fcall("down", 0);
    b.leave();
    assert_raises!(
        engine.run_iseq(b.build().unwrap()),
        "SystemStackError",
        "stack level too deep"
    );
}

#[test]
fn test_exit_handlers_run_in_order_and_report_failures() {
    let (mut engine, _) = engine();

    let mut record = IseqBuilder::block();
    record.get_global("$order");
    record.put_sym("first");
    record.send("<<", 1);
    record.leave();

    let mut fail = IseqBuilder::block();
    fail.get_global("$order");
    fail.put_sym("second");
    fail.send("<<", 1);
    fail.emit(Instruction::Pop);
    fail.put_self();
    fail.put_str("handler failed");
    fail.fcall("raise", 1);
    fail.leave();

    let mut b = IseqBuilder::top();
    b.emit(Instruction::NewArray(0));
    b.set_global("$order");
    b.put_self();
    b.call_with_block(CallInfo::positional("at_exit", 0).fcall(), record.build().unwrap());
    b.emit(Instruction::Pop);
    b.put_self();
    b.call_with_block(CallInfo::positional("at_exit", 0).fcall(), fail.build().unwrap());
    b.leave();
    run(&mut engine, b).unwrap();

    let failures = engine.shutdown();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].class, "RuntimeError");
    assert_eq!(failures[0].message, "handler failed");

    let order = engine.context().global_get(Symbol::intern("$order"));
    assert_eq!(engine.inspect(order).unwrap(), "[:first, :second]");
}

#[test]
fn test_host_can_register_native_exit_handler() {
    let (mut engine, _) = engine();
    engine.context_mut().register_exit_handler(|ctx| {
        let name = Symbol::intern("$cleaned");
        ctx.global_set(name, Value::TRUE)
    });
    assert!(engine.shutdown().is_empty());
    assert_eq!(
        engine.context().global_get(Symbol::intern("$cleaned")),
        Value::TRUE
    );
}
