//! Iterators written as instruction sequences.
//!
//! A native that calls a block has to start a nested run loop, and a fiber
//! cannot be suspended across one. Writing the common iterators against the
//! instruction set keeps every `yield` in the fiber's own loop, so
//! `Fiber.yield` works inside `loop`, `times` and `each` blocks.

use std::sync::Arc;

use tracing::error;

use crate::compiler::{CompileError, Instruction, Iseq, IseqBuilder};
use crate::runtime::context::ExecutionContext;
use crate::runtime::symbol::Symbol;
use crate::runtime::value::ClassId;

const PATH: &str = "<internal:prelude>";

type Build = fn() -> Result<Iseq, CompileError>;

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    let methods: [(ClassId, &str, Build); 8] = [
        (core.kernel, "loop", kernel_loop),
        (core.integer, "times", integer_times),
        (core.array, "each", array_each),
        (core.array, "each_with_index", array_each_with_index),
        (core.array, "map", array_map),
        (core.array, "select", array_select),
        (core.hash, "each", hash_each),
        (core.hash, "each_pair", hash_each),
    ];
    for (owner, name, build) in methods {
        match build() {
            Ok(iseq) => ctx.define_iseq_method(owner, Symbol::intern(name), Arc::new(iseq), owner),
            Err(err) => error!(method = name, error = %err, "prelude method failed to build"),
        }
    }
}

fn method(name: &str) -> IseqBuilder {
    IseqBuilder::method(name).with_path(PATH)
}

/// Yields until the block raises `StopIteration`, returning its `result`.
fn kernel_loop() -> Result<Iseq, CompileError> {
    let mut b = method("loop");
    let e = b.local("e");
    let region = b.begin();
    let top = b.label();
    b.place(top);
    b.invoke_block(0);
    b.emit(Instruction::Pop);
    b.jump(top);
    b.rescue(region, Some(e), |b| {
        b.get_const("StopIteration");
        1
    });
    b.get_local(e);
    b.send("result", 0);
    b.end(region);
    b.leave();
    b.build()
}

/// Emits `i = 0; while i < limit; body(i); i += 1; end`, where `limit`
/// pushes the bound.
fn counting(b: &mut IseqBuilder, limit: impl Fn(&mut IseqBuilder), body: impl Fn(&mut IseqBuilder, u32)) {
    let i = b.local("i");
    let (top, done) = (b.label(), b.label());
    b.put_int(0);
    b.set_local(i);
    b.place(top);
    b.get_local(i);
    limit(b);
    b.send("<", 1);
    b.branch_unless(done);
    body(b, i);
    b.get_local(i);
    b.put_int(1);
    b.send("+", 1);
    b.set_local(i);
    b.jump(top);
    b.place(done);
}

fn own_size(b: &mut IseqBuilder) {
    b.put_self();
    b.send("size", 0);
}

/// Pushes `self[i]`.
fn element(b: &mut IseqBuilder, i: u32) {
    b.put_self();
    b.get_local(i);
    b.send("[]", 1);
}

fn integer_times() -> Result<Iseq, CompileError> {
    let mut b = method("times");
    counting(
        &mut b,
        |b| b.put_self(),
        |b, i| {
            b.get_local(i);
            b.invoke_block(1);
            b.emit(Instruction::Pop);
        },
    );
    b.put_self();
    b.leave();
    b.build()
}

fn array_each() -> Result<Iseq, CompileError> {
    let mut b = method("each");
    counting(&mut b, own_size, |b, i| {
        element(b, i);
        b.invoke_block(1);
        b.emit(Instruction::Pop);
    });
    b.put_self();
    b.leave();
    b.build()
}

fn array_each_with_index() -> Result<Iseq, CompileError> {
    let mut b = method("each_with_index");
    counting(&mut b, own_size, |b, i| {
        element(b, i);
        b.get_local(i);
        b.invoke_block(2);
        b.emit(Instruction::Pop);
    });
    b.put_self();
    b.leave();
    b.build()
}

fn array_map() -> Result<Iseq, CompileError> {
    let mut b = method("map");
    let result = b.local("result");
    b.emit(Instruction::NewArray(0));
    b.set_local(result);
    counting(&mut b, own_size, |b, i| {
        b.get_local(result);
        element(b, i);
        b.invoke_block(1);
        b.send("<<", 1);
        b.emit(Instruction::Pop);
    });
    b.get_local(result);
    b.leave();
    b.build()
}

fn array_select() -> Result<Iseq, CompileError> {
    let mut b = method("select");
    let result = b.local("result");
    let item = b.local("item");
    b.emit(Instruction::NewArray(0));
    b.set_local(result);
    counting(&mut b, own_size, |b, i| {
        let skip = b.label();
        element(b, i);
        b.set_local(item);
        b.get_local(item);
        b.invoke_block(1);
        b.branch_unless(skip);
        b.get_local(result);
        b.get_local(item);
        b.send("<<", 1);
        b.emit(Instruction::Pop);
        b.place(skip);
    });
    b.get_local(result);
    b.leave();
    b.build()
}

/// Yields `[key, value]` pairs; a block taking two parameters gets them
/// spread.
fn hash_each() -> Result<Iseq, CompileError> {
    let mut b = method("each");
    let pairs = b.local("pairs");
    b.put_self();
    b.send("to_a", 0);
    b.set_local(pairs);
    counting(
        &mut b,
        |b| {
            b.get_local(pairs);
            b.send("size", 0);
        },
        |b, i| {
            b.get_local(pairs);
            b.get_local(i);
            b.send("[]", 1);
            b.invoke_block(1);
            b.emit(Instruction::Pop);
        },
    );
    b.put_self();
    b.leave();
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_prelude_method_builds() {
        let builds: [Build; 7] = [
            kernel_loop,
            integer_times,
            array_each,
            array_each_with_index,
            array_map,
            array_select,
            hash_each,
        ];
        for build in builds {
            let iseq = build().unwrap();
            assert_eq!(&*iseq.path, PATH);
        }
    }

    #[test]
    fn test_loop_rescues_stop_iteration() {
        let iseq = kernel_loop().unwrap();
        assert_eq!(iseq.regions.len(), 1);
        assert_eq!(iseq.regions[0].clauses.len(), 1);
        assert!(iseq.regions[0].clauses[0].binding.is_some());
    }
}
