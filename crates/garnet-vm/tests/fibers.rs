//! Fibers, `Fiber.yield` and fiber-local storage.

mod common;

use common::{engine, get_outer, run, run_inspect};
use garnet_macros::assert_raises;
use garnet_vm::compiler::{CallInfo, Instruction, IseqBuilder};

/// `f = Fiber.new { ... }` into a fresh local, returning its slot.
fn new_fiber(b: &mut IseqBuilder, body: IseqBuilder) -> u32 {
    let f = b.local("f");
    b.get_const("Fiber");
    b.call_with_block(CallInfo::positional("new", 0), body.build().unwrap());
    b.set_local(f);
    f
}

fn fiber_yield(b: &mut IseqBuilder, argc: usize) {
    b.get_const("Fiber");
    b.send("yield", argc);
}

fn resume(b: &mut IseqBuilder, f: u32, arg: Option<i64>) {
    b.get_local(f);
    match arg {
        Some(n) => {
            b.put_int(n);
            b.send("resume", 1);
        }
        None => b.send("resume", 0),
    }
}

fn thread_local_get(b: &mut IseqBuilder, key: &str) {
    b.get_const("Thread");
    b.send("current", 0);
    b.put_sym(key);
    b.send("[]", 1);
}

fn thread_local_set(b: &mut IseqBuilder, key: &str, value: i64) {
    b.get_const("Thread");
    b.send("current", 0);
    b.put_sym(key);
    b.put_int(value);
    b.send("[]=", 2);
    b.emit(Instruction::Pop);
}

#[test]
fn test_resume_and_yield_exchange_values() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    let x = body.required("x");
    let y = body.local("y");
    body.get_const("Fiber");
    body.get_local(x);
    body.put_int(1);
    body.send("+", 1);
    body.send("yield", 1);
    body.set_local(y);
    body.get_const("Fiber");
    body.get_local(y);
    body.put_int(2);
    body.send("*", 1);
    body.send("yield", 1);
    body.emit(Instruction::Pop);
    body.put_sym("done");
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, Some(1));
    resume(&mut b, f, Some(10));
    resume(&mut b, f, None);
    b.get_local(f);
    b.send("alive?", 0);
    b.emit(Instruction::NewArray(4));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[2, 20, :done, false]");
}

#[test]
fn test_yield_with_several_values_returns_array() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    fiber_yield(&mut body, 0);
    body.emit(Instruction::Pop);
    body.get_const("Fiber");
    body.put_int(1);
    body.put_int(2);
    body.send("yield", 2);
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, None);
    resume(&mut b, f, None);
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[nil, [1, 2]]");
}

#[test]
fn test_yield_inside_each_block() {
    let (mut engine, _) = engine();
    let mut each_block = IseqBuilder::block();
    let x = each_block.required("x");
    each_block.get_const("Fiber");
    each_block.get_local(x);
    each_block.send("yield", 1);
    each_block.leave();

    let mut body = IseqBuilder::block();
    for n in 1..=3 {
        body.put_int(n);
    }
    body.emit(Instruction::NewArray(3));
    body.call_with_block(CallInfo::positional("each", 0), each_block.build().unwrap());
    body.emit(Instruction::Pop);
    body.put_nil();
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    for _ in 0..4 {
        resume(&mut b, f, None);
    }
    b.emit(Instruction::NewArray(4));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[1, 2, 3, nil]");
}

#[test]
fn test_resume_terminated_fiber() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    body.put_int(1);
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, None);
    b.emit(Instruction::Pop);
    resume(&mut b, f, None);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "FiberError",
        "attempt to resume a terminated fiber"
    );
}

#[test]
fn test_resume_current_fiber() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    body.get_const("Fiber");
    body.send("current", 0);
    body.send("resume", 0);
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, None);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "FiberError",
        "attempt to resume the current fiber"
    );
}

#[test]
fn test_yield_from_root() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    fiber_yield(&mut b, 0);
    b.leave();
    assert_raises!(run(&mut engine, b), "FiberError", "can't yield from root fiber");
}

#[test]
fn test_yield_across_native_block_call() {
    let (mut engine, _) = engine();
    let mut inner = IseqBuilder::block();
    fiber_yield(&mut inner, 0);
    inner.leave();

    let mut body = IseqBuilder::block();
    body.put_int(1);
    body.call_with_block(CallInfo::positional("tap", 0), inner.build().unwrap());
    body.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, None);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "FiberError",
        "can't yield from a fiber across a native method frame"
    );
}

#[test]
fn test_exception_in_fiber_reaches_resumer() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    body.put_self();
    body.put_str("inside");
    body.fcall("raise", 1);
    body.leave();

    let mut b = IseqBuilder::top();
    let e = b.local("e");
    let f = new_fiber(&mut b, body);
    let region = b.begin();
    resume(&mut b, f, None);
    b.rescue(region, Some(e), |_| 0);
    b.get_local(e);
    b.send("message", 0);
    b.end(region);
    b.get_local(f);
    b.send("alive?", 0);
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[\"inside\", false]");
}

#[test]
fn test_fiber_locals_are_per_fiber() {
    let (mut engine, _) = engine();
    let mut body = IseqBuilder::block();
    thread_local_get(&mut body, "request");
    thread_local_set(&mut body, "request", 2);
    body.leave();

    let mut b = IseqBuilder::top();
    thread_local_set(&mut b, "request", 1);
    let f = new_fiber(&mut b, body);
    resume(&mut b, f, None);
    thread_local_get(&mut b, "request");
    b.emit(Instruction::NewArray(2));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[nil, 1]");
}

#[test]
fn test_fiber_block_sees_enclosing_locals() {
    let (mut engine, _) = engine();
    let mut b = IseqBuilder::top();
    let base = b.local("base");
    b.put_int(100);
    b.set_local(base);

    let mut body = IseqBuilder::block();
    let n = body.required("n");
    get_outer(&mut body, base, 1);
    body.get_local(n);
    body.send("+", 1);
    body.leave();

    let f = new_fiber(&mut b, body);
    resume(&mut b, f, Some(5));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "105");
}

#[test]
fn test_finished_fibers_are_released() {
    let (mut engine, _) = engine();

    // 50.times { Fiber.new { Thread.current[:k] = 1; 1 }.resume }
    let mut body = IseqBuilder::block();
    thread_local_set(&mut body, "k", 1);
    body.put_int(1);
    body.leave();
    let mut each = IseqBuilder::block();
    each.get_const("Fiber");
    each.call_with_block(CallInfo::positional("new", 0), body.build().unwrap());
    each.send("resume", 0);
    each.leave();

    let mut b = IseqBuilder::top();
    b.put_int(50);
    b.call_with_block(CallInfo::positional("times", 0), each.build().unwrap());
    b.leave();
    run(&mut engine, b).unwrap();
    assert_eq!(engine.context().fibers().len(), 1);
}

#[test]
fn test_stale_handle_stays_terminated_after_slot_reuse() {
    let (mut engine, _) = engine();
    let mut first = IseqBuilder::block();
    first.put_int(1);
    first.leave();
    let mut second = IseqBuilder::block();
    second.put_int(2);
    second.leave();

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, first);
    resume(&mut b, f, None);
    b.emit(Instruction::Pop);
    let g = b.local("g");
    b.get_const("Fiber");
    b.call_with_block(CallInfo::positional("new", 0), second.build().unwrap());
    b.set_local(g);
    b.get_local(f);
    b.send("alive?", 0);
    b.get_local(g);
    b.send("alive?", 0);
    b.get_local(g);
    b.send("resume", 0);
    b.emit(Instruction::NewArray(3));
    b.leave();
    assert_eq!(run_inspect(&mut engine, b).unwrap(), "[false, true, 2]");

    let mut b = IseqBuilder::top();
    let f = new_fiber(&mut b, IseqBuilder::block());
    resume(&mut b, f, None);
    b.emit(Instruction::Pop);
    b.get_const("Fiber");
    b.call_with_block(CallInfo::positional("new", 0), IseqBuilder::block().build().unwrap());
    b.emit(Instruction::Pop);
    resume(&mut b, f, None);
    b.leave();
    assert_raises!(
        run(&mut engine, b),
        "FiberError",
        "attempt to resume a terminated fiber"
    );
}
