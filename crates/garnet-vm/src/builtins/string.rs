//! String and Symbol.

use garnet_macros::native_methods;

use super::{define_methods, expect_integer, expect_string};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::ObjectKind;
use crate::runtime::symbol::Symbol;
use crate::runtime::value::Value;
use crate::vm::VmResult;

// ============================================================================
// String
// ============================================================================

const STRING_METHODS: &[NativeMethod] = native_methods! {
    "initialize" => initialize, Arity::range(0, 1);
    "+" => concat, Arity::exact(1);
    "*" => repeat, Arity::exact(1);
    "<<" => append, Arity::exact(1);
    "==" => equal, Arity::exact(1);
    "eql?" => equal, Arity::exact(1);
    "===" => equal, Arity::exact(1);
    "to_s" => to_s, Arity::exact(0);
    "to_str" => to_s, Arity::exact(0);
    "inspect" => inspect, Arity::exact(0);
    "size" => size, Arity::exact(0);
    "length" => size, Arity::exact(0);
    "empty?" => empty, Arity::exact(0);
    "to_sym" => to_sym, Arity::exact(0);
    "intern" => to_sym, Arity::exact(0);
    "to_i" => to_i, Arity::exact(0);
    "upcase" => upcase, Arity::exact(0);
    "downcase" => downcase, Arity::exact(0);
    "start_with?" => start_with, Arity::any();
    "end_with?" => end_with, Arity::any();
    "include?" => include, Arity::exact(1);
};

const SYMBOL_METHODS: &[NativeMethod] = native_methods! {
    "to_s" => symbol_to_s, Arity::exact(0);
    "name" => symbol_to_s, Arity::exact(0);
    "to_sym" => symbol_to_sym, Arity::exact(0);
    "inspect" => symbol_inspect, Arity::exact(0);
    "size" => symbol_size, Arity::exact(0);
    "length" => symbol_size, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.string, STRING_METHODS);
    define_methods(ctx, core.symbol, SYMBOL_METHODS);
}

fn contents(ctx: &ExecutionContext, value: Value) -> String {
    ctx.heap.str(value).unwrap_or_default().to_owned()
}

fn initialize(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    if let Some(source) = args.get(0) {
        let text = expect_string(ctx, source)?;
        replace(ctx, recv, text)?;
    }
    Ok(Value::Nil)
}

fn replace(ctx: &mut ExecutionContext, recv: Value, text: String) -> VmResult<()> {
    ctx.check_frozen(recv)?;
    if let Value::Object(obj) = recv {
        if let Some(object) = ctx.heap.get_mut(obj) {
            object.kind = ObjectKind::String(text);
        }
    }
    Ok(())
}

fn concat(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let other = expect_string(ctx, args.arg(0))?;
    let text = contents(ctx, recv) + &other;
    Ok(ctx.new_string(text))
}

fn repeat(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let count = expect_integer(ctx, args.arg(0))?;
    let Ok(count) = usize::try_from(count) else {
        return Err(ctx.argument_error("negative argument"));
    };
    let text = contents(ctx, recv).repeat(count);
    Ok(ctx.new_string(text))
}

/// Appends in place.
fn append(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let other = match args.arg(0) {
        Value::Integer(code) => u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| ctx.error(ctx.core.range_error, format!("{code} out of char range")))?,
        value => expect_string(ctx, value)?,
    };
    let text = contents(ctx, recv) + &other;
    replace(ctx, recv, text)?;
    Ok(recv)
}

fn equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let same = match (ctx.heap.str(recv), ctx.heap.str(args.arg(0))) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    Ok(Value::Bool(same))
}

fn to_s(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}

fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let text = inspect_str(&contents(ctx, recv));
    Ok(ctx.new_string(text))
}

/// Double-quoted with Ruby's escapes.
pub(crate) fn inspect_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            '#' if matches!(chars.peek(), Some('{' | '$' | '@')) => out.push_str("\\#"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn size(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let count = ctx.heap.str(recv).map_or(0, |s| s.chars().count());
    Ok(Value::Integer(count as i64))
}

fn empty(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(ctx.heap.str(recv).is_none_or(str::is_empty)))
}

fn to_sym(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Symbol(Symbol::intern(&contents(ctx, recv))))
}

/// Leading decimal digits, underscores allowed between them; 0 if none.
fn to_i(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Integer(parse_leading_integer(&contents(ctx, recv))))
}

fn parse_leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    let mut previous_underscore = false;
    for (i, c) in digits.chars().enumerate() {
        match c {
            '0'..='9' => {
                let digit = i64::from(c as u8 - b'0');
                value = value.saturating_mul(10).saturating_add(digit);
                previous_underscore = false;
            }
            '_' if i > 0 && !previous_underscore => previous_underscore = true,
            _ => break,
        }
    }
    if negative { -value } else { value }
}

fn upcase(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let text = contents(ctx, recv).to_uppercase();
    Ok(ctx.new_string(text))
}

fn downcase(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let text = contents(ctx, recv).to_lowercase();
    Ok(ctx.new_string(text))
}

fn start_with(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let text = contents(ctx, recv);
    for &prefix in &args.positional {
        if text.starts_with(expect_string(ctx, prefix)?.as_str()) {
            return Ok(Value::TRUE);
        }
    }
    Ok(Value::FALSE)
}

fn end_with(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let text = contents(ctx, recv);
    for &suffix in &args.positional {
        if text.ends_with(expect_string(ctx, suffix)?.as_str()) {
            return Ok(Value::TRUE);
        }
    }
    Ok(Value::FALSE)
}

fn include(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let needle = expect_string(ctx, args.arg(0))?;
    Ok(Value::Bool(contents(ctx, recv).contains(needle.as_str())))
}

// ============================================================================
// Symbol
// ============================================================================

fn symbol_to_s(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let name = recv.as_symbol().map(Symbol::as_str).unwrap_or_default();
    Ok(ctx.new_string(name))
}

fn symbol_to_sym(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}

fn symbol_inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let shown = recv.as_symbol().map(Symbol::inspect).unwrap_or_default();
    Ok(ctx.new_string(shown))
}

fn symbol_size(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let count = recv.as_symbol().map_or(0, |s| s.as_str().chars().count());
    Ok(Value::Integer(count as i64))
}
