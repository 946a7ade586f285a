//! Proc.

use garnet_macros::native_methods;

use super::{define_methods, forward};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::value::Value;
use crate::vm::VmResult;

const PROC_METHODS: &[NativeMethod] = native_methods! {
    "call" => call, Arity::any().with_keywords();
    "()" => call, Arity::any().with_keywords();
    "yield" => call, Arity::any().with_keywords();
    "[]" => call, Arity::any().with_keywords();
    "===" => call, Arity::any().with_keywords();
    "arity" => arity, Arity::exact(0);
    "lambda?" => is_lambda, Arity::exact(0);
    "to_proc" => to_proc, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.proc, PROC_METHODS);
}

/// Runs the block in a nested loop, so `Fiber.yield` cannot cross it.
fn call(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let (args, block) = forward(args);
    ctx.call_block_with(recv, args, block)
}

fn arity(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let arity = ctx.heap.proc_data(recv).map_or(0, |d| d.iseq.params.arity());
    Ok(Value::Integer(arity))
}

fn is_lambda(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(ctx.heap.proc_data(recv).is_some_and(|d| d.lambda)))
}

fn to_proc(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}
