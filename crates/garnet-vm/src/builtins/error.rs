//! Exception and its subclasses.

use garnet_macros::native_methods;

use super::define_methods;
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::{ExceptionDetail, ObjectKind};
use crate::runtime::value::Value;
use crate::vm::VmResult;

const EXCEPTION_METHODS: &[NativeMethod] = native_methods! {
    "initialize" => initialize, Arity::range(0, 1);
    "message" => message, Arity::exact(0);
    "to_s" => to_s, Arity::exact(0);
    "inspect" => inspect, Arity::exact(0);
    "backtrace" => backtrace, Arity::exact(0);
    "full_message" => full_message, Arity::exact(0).with_keywords();
    "cause" => cause, Arity::exact(0);
    "==" => equal, Arity::exact(1);
    "exception" => exception, Arity::range(0, 1);
};

const UNCAUGHT_THROW_METHODS: &[NativeMethod] = native_methods! {
    "tag" => throw_tag, Arity::exact(0);
    "value" => throw_value, Arity::exact(0);
};

const STOP_ITERATION_METHODS: &[NativeMethod] = native_methods! {
    "result" => stop_result, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.exception, EXCEPTION_METHODS);
    define_methods(ctx, core.uncaught_throw_error, UNCAUGHT_THROW_METHODS);
    define_methods(ctx, core.stop_iteration, STOP_ITERATION_METHODS);
}

fn initialize(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    if let Some(data) = ctx.heap.exception_mut(recv) {
        data.message = args.arg(0);
    }
    Ok(Value::Nil)
}

/// The message, or the class name when none was given.
fn to_s(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let message = ctx.heap.exception(recv).map(|d| d.message).unwrap_or_default();
    if message.is_nil() {
        let class = ctx.class_name(ctx.real_class(ctx.class_of(recv)));
        return Ok(ctx.new_string(class));
    }
    if ctx.heap.str(message).is_some() {
        return Ok(message);
    }
    let text = ctx.to_s(message)?;
    Ok(ctx.new_string(text))
}

fn message(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    ctx.funcall(recv, "to_s", &[])
}

/// `#<RuntimeError: boom>`, or the bare class name for an empty message.
fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = ctx.class_name(ctx.real_class(ctx.class_of(recv)));
    let text = ctx.to_s(recv)?;
    if text.is_empty() {
        return Ok(ctx.new_string(class));
    }
    Ok(ctx.new_string(format!("#<{class}: {text}>")))
}

fn backtrace(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let lines = ctx.heap.exception(recv).and_then(|d| d.backtrace.clone());
    let Some(lines) = lines else {
        return Ok(Value::Nil);
    };
    let items = lines.into_iter().map(|line| ctx.new_string(line)).collect();
    Ok(ctx.new_array(items))
}

fn full_message(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let mut report = ctx.exception_report(recv);
    let message = ctx.funcall(recv, "message", &[])?;
    report.message = ctx.to_s(message)?;
    Ok(ctx.new_string(report.render()))
}

fn cause(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.heap.exception(recv).map(|d| d.cause).unwrap_or_default())
}

/// Same class, message and backtrace.
fn equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let other = args.arg(0);
    if recv == other {
        return Ok(Value::TRUE);
    }
    if ctx.heap.exception(other).is_none()
        || ctx.real_class(ctx.class_of(recv)) != ctx.real_class(ctx.class_of(other))
    {
        return Ok(Value::FALSE);
    }
    let trace = |ctx: &ExecutionContext, v: Value| ctx.heap.exception(v).and_then(|d| d.backtrace.clone());
    if trace(ctx, recv) != trace(ctx, other) {
        return Ok(Value::FALSE);
    }
    let mine = ctx.funcall(recv, "message", &[])?;
    let theirs = ctx.funcall(other, "message", &[])?;
    Ok(Value::Bool(ctx.values_eq(mine, theirs)?))
}

/// With no argument, the receiver; with a message, a copy carrying it.
fn exception(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let Some(message) = args.get(0) else {
        return Ok(recv);
    };
    if message == recv {
        return Ok(recv);
    }
    let Value::Object(obj) = recv else {
        return Ok(recv);
    };
    let Some(mut copy) = ctx.heap.get(obj).cloned() else {
        return Ok(recv);
    };
    if let ObjectKind::Exception(data) = &mut copy.kind {
        data.message = message;
        data.backtrace = None;
    }
    let duplicate = ctx.heap.alloc(copy.class, copy.kind);
    if let Some(object) = ctx.heap.get_mut(duplicate) {
        object.ivars = copy.ivars;
    }
    Ok(Value::Object(duplicate))
}

fn throw_tag(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(match ctx.heap.exception(recv).map(|d| &d.detail) {
        Some(ExceptionDetail::UncaughtThrow { tag, .. }) => *tag,
        _ => Value::Nil,
    })
}

fn throw_value(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(match ctx.heap.exception(recv).map(|d| &d.detail) {
        Some(ExceptionDetail::UncaughtThrow { value, .. }) => *value,
        _ => Value::Nil,
    })
}

fn stop_result(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(match ctx.heap.exception(recv).map(|d| &d.detail) {
        Some(ExceptionDetail::StopIteration(result)) => *result,
        _ => Value::Nil,
    })
}
