//! Exceptions, protected regions and non-local exits.

mod common;

use common::{def, engine, get_outer, run, run_inspect, set_outer};
use garnet_macros::assert_raises;
use garnet_vm::compiler::{CallInfo, Instruction, IseqBuilder};
use garnet_vm::runtime::Symbol;
use garnet_vm::{Engine, Error};

fn log(b: &mut IseqBuilder, entry: &str) {
    b.get_global("$log");
    b.put_sym(entry);
    b.send("<<", 1);
    b.emit(Instruction::Pop);
}

fn with_log() -> IseqBuilder {
    let mut b = IseqBuilder::top().with_path("regions.rb");
    b.emit(Instruction::NewArray(0));
    b.set_global("$log");
    b
}

fn logged(engine: &mut Engine) -> String {
    let entries = engine.context().global_get(Symbol::intern("$log"));
    engine.inspect(entries).unwrap()
}

fn raise(b: &mut IseqBuilder, class: &str, message: &str) {
    b.put_self();
    b.get_const(class);
    b.put_str(message);
    b.fcall("raise", 2);
}

#[test]
fn test_first_matching_clause_binds_exception() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let e = b.local("e");
    let region = b.begin();
    raise(&mut b, "ArgumentError", "bad");
    b.rescue(region, Some(e), |b| {
        b.get_const("TypeError");
        1
    });
    b.put_str("type");
    b.rescue(region, Some(e), |b| {
        b.get_const("KeyError");
        b.get_const("ArgumentError");
        2
    });
    b.get_local(e);
    b.send("message", 0);
    b.end(region);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "\"bad\"");
}

#[test]
fn test_else_and_ensure_order() {
    let (mut engine, _) = engine();
    let mut b = with_log();
    let region = b.begin();
    log(&mut b, "body");
    b.put_int(1);
    b.rescue(region, None, |_| 0);
    log(&mut b, "rescue");
    b.put_int(2);
    b.else_body(region);
    log(&mut b, "else");
    b.put_int(3);
    b.ensure(region);
    log(&mut b, "ensure");
    b.put_int(4);
    b.end(region);
    b.leave();

    assert_eq!(run_inspect(&mut engine, b).unwrap(), "3");
    assert_eq!(logged(&mut engine), "[:body, :else, :ensure]");
}

#[test]
fn test_ensure_runs_while_exception_propagates() {
    let (mut engine, _) = engine();
    let mut b = with_log();
    let region = b.begin();
    raise(&mut b, "RuntimeError", "escaping");
    b.rescue(region, None, |b| {
        b.get_const("TypeError");
        1
    });
    log(&mut b, "rescue");
    b.put_nil();
    b.ensure(region);
    log(&mut b, "ensure");
    b.put_nil();
    b.end(region);
    b.leave();

    assert_raises!(run(&mut engine, b), "RuntimeError", "escaping");
    assert_eq!(logged(&mut engine), "[:ensure]");
}

#[test]
fn test_bare_rescue_skips_non_standard_errors() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "Exception", "low level");
    b.rescue(region, None, |_| 0);
    b.put_str("rescued");
    b.end(region);
    b.leave();
    assert_raises!(run(&mut engine, b), "Exception", "low level");
}

#[test]
fn test_bare_rescue_skips_script_errors() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "LoadError", "cannot load such file -- missing");
    b.rescue(region, None, |_| 0);
    b.put_str("rescued");
    b.end(region);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "LoadError",
        "cannot load such file -- missing"
    );
}

#[test]
fn test_bare_rescue_catches_standard_error_subclasses() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "ArgumentError", "bad");
    b.rescue(region, None, |_| 0);
    b.get_global("$!");
    b.send("class", 0);
    b.end(region);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "ArgumentError");
}

/// Emits `$ensured = ($ensured || 0) + 1`.
fn count_ensure(b: &mut IseqBuilder) {
    let add = b.label();
    b.get_global("$ensured");
    b.emit(Instruction::Dup);
    b.branch_if(add);
    b.emit(Instruction::Pop);
    b.put_int(0);
    b.place(add);
    b.put_int(1);
    b.send("+", 1);
    b.set_global("$ensured");
}

#[test]
fn test_ensure_runs_once_after_handled_raise() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "RuntimeError", "handled");
    b.rescue(region, None, |b| {
        b.get_const("RuntimeError");
        1
    });
    b.put_sym("rescued");
    b.ensure(region);
    count_ensure(&mut b);
    b.put_nil();
    b.end(region);
    b.get_global("$ensured");
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[:rescued, 1]");
}

#[test]
fn test_failing_rescue_class_expression_replaces_exception() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "RuntimeError", "original");
    b.rescue(region, None, |b| {
        b.get_const("NoSuchConst");
        1
    });
    b.put_sym("rescued");
    b.ensure(region);
    count_ensure(&mut b);
    b.put_nil();
    b.end(region);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "NameError",
        "uninitialized constant NoSuchConst"
    );
    let ensured = engine.context().global_get(Symbol::intern("$ensured"));
    assert_eq!(engine.inspect(ensured).unwrap(), "1");
}

#[test]
fn test_unhandled_exception_does_not_leak_into_next_run() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "RuntimeError", "first run");
    b.rescue(region, None, |b| {
        b.get_const("TypeError");
        1
    });
    b.put_nil();
    b.end(region);
    b.leave();
    assert_raises!(run(&mut engine, b), "RuntimeError", "first run");

    let mut b = IseqBuilder::top();
    b.get_global("$!");
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "nil");

    // A bare raise has nothing to re-raise, and new exceptions get no cause.
    let mut b = IseqBuilder::top();
    let e = b.local("e");
    let region = b.begin();
    b.put_self();
    b.fcall("raise", 0);
    b.rescue(region, Some(e), |b| {
        b.get_const("RuntimeError");
        1
    });
    b.get_local(e);
    b.send("message", 0);
    b.get_local(e);
    b.send("cause", 0);
    b.emit(Instruction::NewArray(2));
    b.end(region);
    b.leave();
    assert_eq!(
        run_inspect(&mut engine, b).unwrap(),
        "[\"unhandled exception\", nil]"
    );
}

#[test]
fn test_rescue_requires_class() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let region = b.begin();
    raise(&mut b, "RuntimeError", "x");
    b.rescue(region, None, |b| {
        b.put_int(1);
        1
    });
    b.put_nil();
    b.end(region);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "TypeError",
        "class or module required for rescue clause"
    );
}

#[test]
fn test_retry_restarts_body() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let attempts = b.local("attempts");
    b.put_int(0);
    b.set_local(attempts);

    let region = b.begin();
    let done = b.label();
    b.get_local(attempts);
    b.put_int(1);
    b.send("+", 1);
    b.set_local(attempts);
    b.get_local(attempts);
    b.put_int(3);
    b.send("<", 1);
    b.branch_unless(done);
    b.put_self();
    b.put_str("flaky");
    b.fcall("raise", 1);
    b.place(done);
    b.get_local(attempts);
    b.rescue(region, None, |_| 0);
    b.retry(region);
    b.end(region);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "3");
}

#[test]
fn test_cause_and_error_info() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let e = b.local("e");
    let outer = b.begin();
    let inner = b.begin();
    b.put_self();
    b.put_str("first");
    b.fcall("raise", 1);
    b.rescue(inner, None, |_| 0);
    raise(&mut b, "ArgumentError", "second");
    b.end(inner);
    b.rescue(outer, Some(e), |b| {
        b.get_const("StandardError");
        1
    });
    b.get_local(e);
    b.send("cause", 0);
    b.send("message", 0);
    b.get_global("$!");
    b.send("message", 0);
    b.emit(Instruction::NewArray(2));
    b.end(outer);
    b.get_global("$!");
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(
        run_inspect(&mut engine, b).unwrap(),
        "[[\"first\", \"second\"], nil]"
    );
}

#[test]
fn test_backtrace_lists_frames_innermost_first() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top().with_path("bt.rb");

    let mut inner = IseqBuilder::method("inner").with_path("bt.rb").at_line(1);
    inner.line(2);
    inner.put_self();
    inner.put_str("deep");
    inner.fcall("raise", 1);
    inner.leave();
    def(&mut b, "inner", inner);

    let mut outer = IseqBuilder::method("outer").with_path("bt.rb").at_line(4);
    outer.line(5);
    outer.put_self();
    outer.fcall("inner", 0);
    outer.leave();
    b.line(4);
    def(&mut b, "outer", outer);

    b.line(7);
    b.put_self();
    b.fcall("outer", 0);
    b.leave();

    let Err(Error::Unhandled { backtrace, .. }) = run(&mut engine, b) else {
        panic!("expected an unhandled exception");
    };
    assert_eq!(
        backtrace,
        [
            "bt.rb:2:in 'inner'",
            "bt.rb:5:in 'outer'",
            "bt.rb:7:in '<main>'"
        ]
    );
}

/// `def find = ([1, 2, 3].each { |x| return x * 10 if x == 2 }; nil)`
fn find_method(ensure_log: bool) -> IseqBuilder {
    let mut block = IseqBuilder::block();
    let x = block.required("x");
    let skip = block.label();
    block.get_local(x);
    block.put_int(2);
    block.send("==", 1);
    block.branch_unless(skip);
    block.get_local(x);
    block.put_int(10);
    block.send("*", 1);
    block.emit(Instruction::Return);
    block.place(skip);
    block.put_nil();
    block.leave();

    let mut find = IseqBuilder::method("find");
    let region = ensure_log.then(|| find.begin());
    for n in 1..=3 {
        find.put_int(n);
    }
    find.emit(Instruction::NewArray(3));
    find.call_with_block(CallInfo::positional("each", 0), block.build().unwrap());
    find.emit(Instruction::Pop);
    find.put_nil();
    if let Some(region) = region {
        find.ensure(region);
        log(&mut find, "ensure");
        find.put_nil();
        find.end(region);
    }
    find.leave();
    find
}

#[test]
fn test_return_from_block_leaves_method() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    def(&mut b, "find", find_method(false));
    b.put_self();
    b.fcall("find", 0);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "20");
}

#[test]
fn test_return_from_block_runs_ensure() {
    let (mut engine, _) = engine();
    let mut b = with_log();
    def(&mut b, "find", find_method(true));
    b.put_self();
    b.fcall("find", 0);
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "20");
    assert_eq!(logged(&mut engine), "[:ensure]");
}

#[test]
fn test_break_returns_from_yielding_call() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let seen = b.local("seen");
    b.put_int(0);
    b.set_local(seen);

    let mut block = IseqBuilder::block();
    let x = block.required("x");
    let skip = block.label();
    get_outer(&mut block, seen, 1);
    block.put_int(1);
    block.send("+", 1);
    set_outer(&mut block, seen, 1);
    block.get_local(x);
    block.put_int(2);
    block.send("==", 1);
    block.branch_unless(skip);
    block.get_local(x);
    block.put_int(5);
    block.send("*", 1);
    block.emit(Instruction::Break);
    block.place(skip);
    block.put_nil();
    block.leave();

    for n in 1..=3 {
        b.put_int(n);
    }
    b.emit(Instruction::NewArray(3));
    b.call_with_block(CallInfo::positional("each", 0), block.build().unwrap());
    b.get_local(seen);
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[10, 2]");
}

#[test]
fn test_catch_and_throw() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let mut block = IseqBuilder::block();
    block.put_self();
    block.put_sym("done");
    block.put_int(7);
    block.fcall("throw", 2);
    block.emit(Instruction::Pop);
    block.put_int(0);
    block.leave();

    b.put_self();
    b.put_sym("done");
    b.call_with_block(CallInfo::positional("catch", 1).fcall(), block.build().unwrap());
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "7");
}

#[test]
fn test_uncaught_throw() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    b.put_self();
    b.put_sym("nope");
    b.fcall("throw", 1);
    b.leave();
    assert_raises!(run(&mut engine, b), "UncaughtThrowError", "uncaught throw :nope");
}

#[test]
fn test_undefined_method_messages() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    b.put_nil();
    b.send("frobnicate", 0);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "NoMethodError",
        "undefined method 'frobnicate' for nil"
    );

    let mut b = IseqBuilder::top();
    b.put_self();
    b.fcall("frobnicate", 0);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "NameError",
        "undefined local variable or method 'frobnicate' for main:Object"
    );
}

#[test]
fn test_failing_ensure_replaces_exception_after_inner_ensure() {
    let (mut engine, _) = engine();
    let mut b = with_log();
    let outer = b.begin();
    let inner = b.begin();
    raise(&mut b, "RuntimeError", "first");
    b.ensure(inner);
    log(&mut b, "inner");
    b.put_nil();
    b.end(inner);
    b.ensure(outer);
    log(&mut b, "outer");
    raise(&mut b, "ArgumentError", "from ensure");
    b.end(outer);
    b.leave();

    assert_raises!(run(&mut engine, b), "ArgumentError", "from ensure");
    assert_eq!(logged(&mut engine), "[:inner, :outer]");
}

#[test]
fn test_else_failure_skips_own_rescue() {
    let (mut engine, _) = engine();
    let mut b = with_log();
    let region = b.begin();
    b.put_int(1);
    b.rescue(region, None, |_| 0);
    log(&mut b, "rescue");
    b.put_nil();
    b.else_body(region);
    raise(&mut b, "RuntimeError", "from else");
    b.ensure(region);
    log(&mut b, "ensure");
    b.put_nil();
    b.end(region);
    b.leave();

    assert_raises!(run(&mut engine, b), "RuntimeError", "from else");
    assert_eq!(logged(&mut engine), "[:ensure]");
}
