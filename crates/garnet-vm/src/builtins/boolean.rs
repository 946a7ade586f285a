//! nil, true and false.

use garnet_macros::native_methods;

use super::define_methods;
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::value::Value;
use crate::vm::VmResult;

const NIL_METHODS: &[NativeMethod] = native_methods! {
    "to_s" => nil_to_s, Arity::exact(0);
    "to_a" => nil_to_a, Arity::exact(0);
    "inspect" => inspect, Arity::exact(0);
    "nil?" => nil_p, Arity::exact(0);
    "&" => and, Arity::exact(1);
    "|" => or, Arity::exact(1);
};

const BOOLEAN_METHODS: &[NativeMethod] = native_methods! {
    "to_s" => inspect, Arity::exact(0);
    "inspect" => inspect, Arity::exact(0);
    "&" => and, Arity::exact(1);
    "|" => or, Arity::exact(1);
    "^" => xor, Arity::exact(1);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.nil_class, NIL_METHODS);
    define_methods(ctx, core.true_class, BOOLEAN_METHODS);
    define_methods(ctx, core.false_class, BOOLEAN_METHODS);
}

fn nil_to_s(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.new_string(""))
}

fn nil_to_a(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.new_array(Vec::new()))
}

fn nil_p(_ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(true))
}

/// `nil`, `true` or `false`.
fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.new_string(recv.to_string()))
}

fn and(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(recv.truthy() && args.arg(0).truthy()))
}

fn or(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(recv.truthy() || args.arg(0).truthy()))
}

fn xor(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(recv.truthy() != args.arg(0).truthy()))
}
