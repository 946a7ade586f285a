//! Fiber, and the `Thread.current` proxy onto fiber-local storage.
//!
//! `resume` and `Fiber.yield` do not switch fibers themselves. They record
//! a [`FiberSwitch`] that the interpreted call site carries out once the
//! native has returned, so the switch never happens inside a Rust frame.

use garnet_macros::native_methods;
use tracing::debug;

use super::{define_methods, define_singleton_methods, expect_name};
use crate::runtime::context::{ExecutionContext, FiberSwitch};
use crate::runtime::fiber::{FiberId, FiberState};
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::ObjectKind;
use crate::runtime::value::Value;
use crate::vm::VmResult;

const FIBER_SINGLETON_METHODS: &[NativeMethod] = native_methods! {
    "new" => fiber_new, Arity::exact(0);
    "yield" => fiber_yield, Arity::any();
    "current" => fiber_current, Arity::exact(0);
};

const FIBER_METHODS: &[NativeMethod] = native_methods! {
    "resume" => resume, Arity::any();
    "alive?" => alive, Arity::exact(0);
};

const THREAD_SINGLETON_METHODS: &[NativeMethod] = native_methods! {
    "current" => thread_current, Arity::exact(0);
};

const THREAD_METHODS: &[NativeMethod] = native_methods! {
    "[]" => local_get, Arity::exact(1);
    "[]=" => local_set, Arity::exact(2);
    "key?" => local_key, Arity::exact(1);
    "keys" => local_keys, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_singleton_methods(ctx, core.fiber, FIBER_SINGLETON_METHODS);
    define_methods(ctx, core.fiber, FIBER_METHODS);
    define_singleton_methods(ctx, core.thread, THREAD_SINGLETON_METHODS);
    define_methods(ctx, core.thread, THREAD_METHODS);
}

/// The `Fiber` object for `id`, created on first request.
fn handle(ctx: &mut ExecutionContext, id: FiberId) -> Value {
    if let Some(handle) = ctx.fibers[id].handle {
        return handle;
    }
    let handle = Value::Object(ctx.heap.alloc(ctx.core.fiber, ObjectKind::Fiber(id)));
    ctx.fibers[id].handle = Some(handle);
    handle
}

fn fiber_new(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let Some(body) = args.block else {
        return Err(ctx.argument_error("tried to create Proc object without a block"));
    };
    let id = ctx.fibers.spawn(body);
    debug!(fiber = %id, "fiber created");
    Ok(handle(ctx, id))
}

/// Arguments become the block's parameters on first resume, and the value
/// of the pending `Fiber.yield` afterwards.
fn resume(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let Some(target) = ctx.heap.fiber_id(recv) else {
        return Err(ctx.type_error("not a fiber"));
    };
    let state = ctx.fibers.get(target).map_or(FiberState::Terminated, |f| f.state);
    let message = match state {
        FiberState::Terminated => Some("attempt to resume a terminated fiber"),
        _ if target == ctx.fibers.current_id() => Some("attempt to resume the current fiber"),
        FiberState::Resumed => Some("attempt to resume a resumed fiber (double resume)"),
        FiberState::Created | FiberState::Suspended => None,
    };
    if let Some(message) = message {
        return Err(ctx.error(ctx.core.fiber_error, message));
    }
    ctx.pending_switch = Some(FiberSwitch::Resume {
        target,
        args: args.positional,
    });
    Ok(Value::Nil)
}

fn fiber_yield(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let (id, loops) = (ctx.fibers.current_id(), ctx.fibers.current().loops);
    if id == FiberId::ROOT {
        return Err(ctx.error(ctx.core.fiber_error, "can't yield from root fiber"));
    }
    if loops > 0 {
        return Err(ctx.error(
            ctx.core.fiber_error,
            "can't yield from a fiber across a native method frame",
        ));
    }
    let value = ctx.collapse(args.positional);
    ctx.pending_switch = Some(FiberSwitch::Yield { value });
    Ok(Value::Nil)
}

fn fiber_current(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let id = ctx.fibers.current_id();
    Ok(handle(ctx, id))
}

fn alive(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let alive = ctx
        .heap
        .fiber_id(recv)
        .and_then(|id| ctx.fibers.get(id))
        .is_some_and(|f| f.is_alive());
    Ok(Value::Bool(alive))
}

// ============================================================================
// Thread.current
// ============================================================================

fn thread_current(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.thread)
}

fn local_get(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let key = expect_name(ctx, args.arg(0))?;
    Ok(ctx.fiber_local(key))
}

fn local_set(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let key = expect_name(ctx, args.arg(0))?;
    let value = args.arg(1);
    ctx.set_fiber_local(key, value);
    Ok(value)
}

fn local_key(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let key = expect_name(ctx, args.arg(0))?;
    let present = ctx
        .fibers
        .current()
        .locals()
        .is_some_and(|locals| locals.contains_key(&key));
    Ok(Value::Bool(present))
}

fn local_keys(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let keys = ctx
        .fibers
        .current()
        .locals()
        .map(|locals| locals.keys().copied().map(Value::Symbol).collect())
        .unwrap_or_default();
    Ok(ctx.new_array(keys))
}
