//! Output: `puts`, `print` and `p`.

use garnet_macros::native_methods;

use super::define_methods;
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::value::Value;
use crate::vm::VmResult;

const OUTPUT_METHODS: &[NativeMethod] = native_methods! {
    "puts" => puts, Arity::any();
    "print" => print, Arity::any();
    "p" => p, Arity::any();
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.kernel, OUTPUT_METHODS);
}

/// Writes each argument on its own line; arrays are written element by
/// element.
fn puts(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    if args.is_empty() {
        ctx.write_output("\n");
        return Ok(Value::Nil);
    }
    let mut out = String::new();
    for arg in args.positional {
        puts_line(ctx, arg, &mut out)?;
    }
    ctx.write_output(&out);
    Ok(Value::Nil)
}

fn puts_line(ctx: &mut ExecutionContext, value: Value, out: &mut String) -> VmResult<()> {
    if let Some(items) = ctx.heap.array(value).cloned() {
        for item in items {
            puts_line(ctx, item, out)?;
        }
        return Ok(());
    }
    let text = ctx.to_s(value)?;
    out.push_str(&text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    Ok(())
}

fn print(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut out = String::new();
    for arg in args.positional {
        out.push_str(&ctx.to_s(arg)?);
    }
    ctx.write_output(&out);
    Ok(Value::Nil)
}

/// Writes `inspect` of each argument and returns them.
fn p(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut out = String::new();
    for &arg in &args.positional {
        out.push_str(&ctx.inspect(arg)?);
        out.push('\n');
    }
    ctx.write_output(&out);
    Ok(ctx.collapse(args.positional))
}
