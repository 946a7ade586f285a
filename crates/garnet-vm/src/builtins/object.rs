//! BasicObject and the Kernel instance methods every object has.

use garnet_macros::native_methods;
use tracing::error;

use super::{define_methods, expect_class, expect_name, forward};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::Value;
use crate::vm::VmResult;

const BASIC_OBJECT_METHODS: &[NativeMethod] = native_methods! {
    "initialize" => initialize, Arity::exact(0);
    "==" => equal, Arity::exact(1);
    "equal?" => equal, Arity::exact(1);
    "!=" => not_equal, Arity::exact(1);
    "!" => not, Arity::exact(0);
    "__send__" => send, Arity::at_least(1).with_keywords();
    "instance_eval" => instance_eval, Arity::exact(0);
    "instance_exec" => instance_exec, Arity::any().with_keywords();
};

const KERNEL_METHODS: &[NativeMethod] = native_methods! {
    "class" => class, Arity::exact(0);
    "singleton_class" => singleton_class, Arity::exact(0);
    "inspect" => inspect, Arity::exact(0);
    "to_s" => to_s, Arity::exact(0);
    "is_a?" => is_a, Arity::exact(1);
    "kind_of?" => is_a, Arity::exact(1);
    "instance_of?" => instance_of, Arity::exact(1);
    "nil?" => nil_p, Arity::exact(0);
    "respond_to?" => respond_to, Arity::range(1, 2);
    "send" => send, Arity::at_least(1).with_keywords();
    "public_send" => send, Arity::at_least(1).with_keywords();
    "instance_variable_get" => instance_variable_get, Arity::exact(1);
    "instance_variable_set" => instance_variable_set, Arity::exact(2);
    "instance_variable_defined?" => instance_variable_defined, Arity::exact(1);
    "instance_variables" => instance_variables, Arity::exact(0);
    "freeze" => freeze, Arity::exact(0);
    "frozen?" => frozen, Arity::exact(0);
    "===" => case_equal, Arity::exact(1);
    "eql?" => equal, Arity::exact(1);
    "itself" => itself, Arity::exact(0);
    "tap" => tap, Arity::exact(0);
};

const MAIN_METHODS: &[NativeMethod] = native_methods! {
    "to_s" => main_to_s, Arity::exact(0);
    "inspect" => main_to_s, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.basic_object, BASIC_OBJECT_METHODS);
    define_methods(ctx, core.kernel, KERNEL_METHODS);

    match ctx.singleton_class_of(ctx.main) {
        Ok(meta) => define_methods(ctx, meta, MAIN_METHODS),
        Err(_) => error!("could not create the singleton class of main"),
    }
}

// ============================================================================
// BasicObject
// ============================================================================

fn initialize(_ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Nil)
}

fn equal(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(recv == args.arg(0)))
}

fn not_equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let equal = ctx.values_eq(recv, args.arg(0))?;
    Ok(Value::Bool(!equal))
}

fn not(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(!recv.truthy()))
}

/// `send(name, *args, **kw, &blk)`
fn send(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let name = expect_name(ctx, args.arg(0))?;
    let (mut forwarded, block) = forward(args);
    forwarded.remove(0);
    ctx.relay_call(recv, name, forwarded, block)
}

fn instance_eval(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let block = rebind_block(ctx, recv, args.block)?;
    ctx.call_block(block, vec![recv], None)
}

fn instance_exec(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let block = rebind_block(ctx, recv, args.block)?;
    let (forwarded, _) = forward(NativeArgs { block: None, ..args });
    ctx.call_block_with(block, forwarded, None)
}

/// A copy of `block` whose `self` is `recv` and whose `def`s land on the
/// singleton class of `recv`.
fn rebind_block(ctx: &mut ExecutionContext, recv: Value, block: Option<Value>) -> VmResult<Value> {
    let data = block.and_then(|b| ctx.heap.proc_data(b)).cloned();
    let Some(mut data) = data else {
        return Err(ctx.argument_error("wrong number of arguments (given 0, expected 1..3)"));
    };
    data.self_value = recv;
    data.cref = match recv {
        Value::Object(_) | Value::Class(_) => ctx.singleton_class_of(recv)?,
        _ => ctx.class_of(recv),
    };
    Ok(ctx.new_proc(data))
}

// ============================================================================
// Identity and class membership
// ============================================================================

fn class(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Class(ctx.real_class(ctx.class_of(recv))))
}

fn singleton_class(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Class(ctx.singleton_class_of(recv)?))
}

fn is_a(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = expect_class(ctx, args.arg(0))?;
    Ok(Value::Bool(ctx.is_a(recv, class)))
}

fn instance_of(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = expect_class(ctx, args.arg(0))?;
    Ok(Value::Bool(ctx.real_class(ctx.class_of(recv)) == class))
}

fn nil_p(_ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(false))
}

fn respond_to(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let name = expect_name(ctx, args.arg(0))?;
    Ok(Value::Bool(ctx.respond_to(recv, name)))
}

fn case_equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(ctx.values_eq(recv, args.arg(0))?))
}

fn itself(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}

fn tap(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let Some(block) = args.block else {
        return Err(ctx.error(ctx.core.local_jump_error, "no block given (yield)"));
    };
    ctx.call_block(block, vec![recv], None)?;
    Ok(recv)
}

// ============================================================================
// Printing
// ============================================================================

/// `#<Foo>`, or `#<Foo @a=1, @b=2>` when instance variables are set.
fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let ivars: Vec<(Symbol, Value)> = match recv {
        Value::Object(obj) => ctx
            .heap
            .get(obj)
            .map(|o| o.ivars.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    let name = ctx.class_name(ctx.real_class(ctx.class_of(recv)));
    if ivars.is_empty() {
        return Ok(ctx.new_string(format!("#<{name}>")));
    }
    let mut parts = Vec::with_capacity(ivars.len());
    for (ivar, value) in ivars {
        parts.push(format!("{ivar}={}", ctx.inspect(value)?));
    }
    Ok(ctx.new_string(format!("#<{name} {}>", parts.join(", "))))
}

fn to_s(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let text = ctx.any_to_s(recv);
    Ok(ctx.new_string(text))
}

fn main_to_s(ctx: &mut ExecutionContext, _recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.new_string("main"))
}

// ============================================================================
// Instance variables and freezing
// ============================================================================

fn ivar_name(ctx: &mut ExecutionContext, value: Value) -> VmResult<Symbol> {
    let name = expect_name(ctx, value)?;
    if !name.as_str().starts_with('@') || name.as_str().starts_with("@@") {
        return Err(ctx.error(
            ctx.core.name_error,
            format!("'{name}' is not allowed as an instance variable name"),
        ));
    }
    Ok(name)
}

fn instance_variable_get(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let name = ivar_name(ctx, args.arg(0))?;
    Ok(ctx.ivar_get(recv, name))
}

fn instance_variable_set(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let name = ivar_name(ctx, args.arg(0))?;
    let value = args.arg(1);
    ctx.ivar_set(recv, name, value)?;
    Ok(value)
}

fn instance_variable_defined(
    ctx: &mut ExecutionContext,
    recv: Value,
    args: NativeArgs,
) -> VmResult<Value> {
    let name = ivar_name(ctx, args.arg(0))?;
    let defined = match recv {
        Value::Object(obj) => ctx.heap.get(obj).is_some_and(|o| o.ivars.contains_key(&name)),
        Value::Class(class) => ctx.classes[class].ivars.contains_key(&name),
        _ => false,
    };
    Ok(Value::Bool(defined))
}

fn instance_variables(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let names: Vec<Value> = match recv {
        Value::Object(obj) => ctx
            .heap
            .get(obj)
            .map(|o| o.ivars.keys().copied().map(Value::Symbol).collect())
            .unwrap_or_default(),
        Value::Class(class) => ctx.classes[class]
            .ivars
            .keys()
            .copied()
            .map(Value::Symbol)
            .collect(),
        _ => Vec::new(),
    };
    Ok(ctx.new_array(names))
}

fn freeze(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    if let Value::Object(obj) = recv {
        if let Some(object) = ctx.heap.get_mut(obj) {
            object.frozen = true;
        }
    }
    Ok(recv)
}

fn frozen(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let frozen = match recv {
        Value::Object(obj) => ctx.heap.get(obj).is_some_and(|o| o.frozen),
        Value::Class(_) => false,
        _ => true,
    };
    Ok(Value::Bool(frozen))
}
