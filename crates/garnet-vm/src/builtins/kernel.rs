//! Kernel: raising, catch/throw, closures and exit handlers.

use garnet_macros::native_methods;

use super::define_methods;
use crate::runtime::context::{ExecutionContext, ExitHandler};
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::{ExceptionDetail, ObjectKind};
use crate::runtime::value::Value;
use crate::vm::{Unwind, VmResult};

const KERNEL_METHODS: &[NativeMethod] = native_methods! {
    "raise" => raise, Arity::range(0, 2).with_keywords();
    "fail" => raise, Arity::range(0, 2).with_keywords();
    "catch" => catch, Arity::range(0, 1);
    "throw" => throw, Arity::range(1, 2);
    "at_exit" => at_exit, Arity::exact(0);
    "block_given?" => block_given, Arity::exact(0);
    "proc" => proc, Arity::exact(0);
    "lambda" => lambda, Arity::exact(0);
    "global_variables" => global_variables, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.kernel, KERNEL_METHODS);
}

// ============================================================================
// Raising
// ============================================================================

/// `raise`, `raise "msg"`, `raise Class`, `raise Class, "msg"`,
/// `raise exception`, each accepting `cause:`.
fn raise(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let exception = match (args.get(0), args.get(1)) {
        (None, _) => {
            let current = ctx.current_exception();
            if current.is_nil() {
                ctx.new_exception(ctx.core.runtime_error, "unhandled exception")
            } else {
                current
            }
        }
        (Some(message), None) if ctx.heap.str(message).is_some() => {
            let text = ctx.heap.str(message).unwrap_or_default().to_owned();
            ctx.new_exception(ctx.core.runtime_error, &text)
        }
        (Some(class @ Value::Class(_)), message) => {
            let new_args: Vec<Value> = message.into_iter().collect();
            ctx.funcall(class, "new", &new_args)?
        }
        (Some(instance), None) => instance,
        (Some(instance), Some(message)) if ctx.heap.exception(instance).is_some() => {
            ctx.funcall(instance, "exception", &[message])?
        }
        (Some(_), Some(_)) => return Err(ctx.type_error("exception class/object expected")),
    };

    if ctx.heap.exception(exception).is_none() {
        return Err(ctx.type_error("exception class/object expected"));
    }
    if let Some(cause) = args.keyword("cause") {
        if let Some(data) = ctx.heap.exception_mut(exception) {
            data.cause = cause;
        }
    }
    ctx.prepare_raise(exception);
    Err(Unwind::Raise(exception))
}

// ============================================================================
// catch / throw
// ============================================================================

fn catch(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let tag = match args.get(0) {
        Some(tag) => tag,
        None => Value::Object(ctx.heap.alloc(ctx.core.object, ObjectKind::Plain)),
    };
    let Some(block) = args.block else {
        return Err(ctx.error(ctx.core.local_jump_error, "no block given"));
    };

    ctx.fibers.current_mut().catch_tags.push(tag);
    let result = ctx.call_block(block, vec![tag], None);
    ctx.fibers.current_mut().catch_tags.pop();

    match result {
        Err(Unwind::Throw { tag: thrown, value }) if thrown == tag => Ok(value),
        other => other,
    }
}

fn throw(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let tag = args.arg(0);
    let value = args.arg(1);
    if ctx.fibers.current().catch_tags.contains(&tag) {
        return Err(Unwind::Throw { tag, value });
    }

    let shown = ctx.inspect(tag)?;
    let exception = ctx.new_exception(
        ctx.core.uncaught_throw_error,
        &format!("uncaught throw {shown}"),
    );
    if let Some(data) = ctx.heap.exception_mut(exception) {
        data.detail = ExceptionDetail::UncaughtThrow { tag, value };
    }
    ctx.prepare_raise(exception);
    Err(Unwind::Raise(exception))
}

// ============================================================================
// Closures and the calling frame
// ============================================================================

fn at_exit(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let Some(block) = args.block else {
        return Err(ctx.argument_error("called without a block"));
    };
    ctx.exit_handlers.register(ExitHandler::Proc(block));
    Ok(block)
}

fn block_given(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let frame = ctx.frame()?;
    Ok(Value::Bool(frame.block.is_some()))
}

fn proc(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    match args.block {
        Some(block) => Ok(block),
        None => Err(ctx.argument_error("tried to create Proc object without a block")),
    }
}

fn lambda(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let data = args.block.and_then(|b| ctx.heap.proc_data(b)).cloned();
    let Some(mut data) = data else {
        return Err(ctx.argument_error("tried to create Proc object without a block"));
    };
    data.lambda = true;
    Ok(ctx.new_proc(data))
}

fn global_variables(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let names = ctx.globals.names().map(Value::Symbol).collect();
    Ok(ctx.new_array(names))
}
