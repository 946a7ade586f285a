//! Array.
//!
//! Iterating methods (`each`, `map`, `select`, `each_with_index`) live in
//! the prelude so blocks passed to them may switch fibers.

use garnet_macros::native_methods;

use super::{define_methods, expect_integer, expect_string};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::value::Value;
use crate::vm::VmResult;

const ARRAY_METHODS: &[NativeMethod] = native_methods! {
    "initialize" => initialize, Arity::range(0, 2);
    "[]" => element, Arity::range(1, 2);
    "at" => at, Arity::exact(1);
    "[]=" => set_element, Arity::exact(2);
    "size" => size, Arity::exact(0);
    "length" => size, Arity::exact(0);
    "empty?" => empty, Arity::exact(0);
    "push" => push, Arity::any();
    "append" => push, Arity::any();
    "<<" => push, Arity::exact(1);
    "pop" => pop, Arity::exact(0);
    "shift" => shift, Arity::exact(0);
    "unshift" => unshift, Arity::any();
    "first" => first, Arity::range(0, 1);
    "last" => last, Arity::range(0, 1);
    "==" => equal, Arity::exact(1);
    "inspect" => inspect, Arity::exact(0);
    "to_s" => inspect, Arity::exact(0);
    "to_a" => to_a, Arity::exact(0);
    "include?" => include, Arity::exact(1);
    "index" => index, Arity::exact(1);
    "join" => join, Arity::range(0, 1);
    "+" => plus, Arity::exact(1);
    "concat" => concat, Arity::any();
    "reverse" => reverse, Arity::exact(0);
    "compact" => compact, Arity::exact(0);
    "sum" => sum, Arity::range(0, 1);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.array, ARRAY_METHODS);
}

fn items(ctx: &ExecutionContext, value: Value) -> Vec<Value> {
    ctx.heap.array(value).cloned().unwrap_or_default()
}

/// Applies `f` to the elements of a mutable array.
fn mutate<T>(
    ctx: &mut ExecutionContext,
    recv: Value,
    f: impl FnOnce(&mut Vec<Value>) -> T,
) -> VmResult<T> {
    ctx.check_frozen(recv)?;
    match ctx.heap.array_mut(recv) {
        Some(items) => Ok(f(items)),
        None => Err(ctx.type_error("not an array")),
    }
}

fn expect_array(ctx: &mut ExecutionContext, value: Value) -> VmResult<Vec<Value>> {
    match ctx.heap.array(value) {
        Some(items) => Ok(items.clone()),
        None => {
            let given = ctx.type_name(value);
            Err(ctx.type_error(format!("no implicit conversion of {given} into Array")))
        }
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

// ============================================================================
// Construction and element access
// ============================================================================

/// `Array.new(size = 0, default = nil)`
fn initialize(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let size = match args.get(0) {
        Some(value) => expect_integer(ctx, value)?,
        None => 0,
    };
    let Ok(size) = usize::try_from(size) else {
        return Err(ctx.argument_error("negative array size"));
    };
    let fill = args.arg(1);
    mutate(ctx, recv, |items| *items = vec![fill; size])?;
    Ok(Value::Nil)
}

/// `a[i]` or `a[start, length]`.
fn element(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let list = items(ctx, recv);
    let start = expect_integer(ctx, args.arg(0))?;
    let Some(length) = args.get(1) else {
        return Ok(normalize(start, list.len()).map_or(Value::Nil, |i| list[i]));
    };
    let length = expect_integer(ctx, length)?;
    let len = list.len() as i64;
    let start = if start < 0 { start + len } else { start };
    if start < 0 || start > len || length < 0 {
        return Ok(Value::Nil);
    }
    let end = start.saturating_add(length).min(len);
    let slice = list[start as usize..end as usize].to_vec();
    Ok(ctx.new_array(slice))
}

fn at(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let list = items(ctx, recv);
    let index = expect_integer(ctx, args.arg(0))?;
    Ok(normalize(index, list.len()).map_or(Value::Nil, |i| list[i]))
}

/// Assigning past the end pads with nil.
fn set_element(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let index = expect_integer(ctx, args.arg(0))?;
    let value = args.arg(1);
    let len = items(ctx, recv).len() as i64;
    let position = if index < 0 { index + len } else { index };
    if position < 0 {
        return Err(ctx.error(
            ctx.core.index_error,
            format!("index {index} too small for array; minimum: -{len}"),
        ));
    }
    let position = position as usize;
    mutate(ctx, recv, |items| {
        if position >= items.len() {
            items.resize(position + 1, Value::Nil);
        }
        items[position] = value;
    })?;
    Ok(value)
}

fn size(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let len = ctx.heap.array(recv).map_or(0, Vec::len);
    Ok(Value::Integer(len as i64))
}

fn empty(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(ctx.heap.array(recv).is_none_or(Vec::is_empty)))
}

fn first(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let list = items(ctx, recv);
    match args.get(0) {
        None => Ok(list.first().copied().unwrap_or_default()),
        Some(n) => {
            let n = count_argument(ctx, n)?;
            let taken = list.into_iter().take(n).collect();
            Ok(ctx.new_array(taken))
        }
    }
}

fn last(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let list = items(ctx, recv);
    match args.get(0) {
        None => Ok(list.last().copied().unwrap_or_default()),
        Some(n) => {
            let n = count_argument(ctx, n)?;
            let skip = list.len().saturating_sub(n);
            let taken = list.into_iter().skip(skip).collect();
            Ok(ctx.new_array(taken))
        }
    }
}

fn count_argument(ctx: &mut ExecutionContext, value: Value) -> VmResult<usize> {
    let n = expect_integer(ctx, value)?;
    usize::try_from(n).map_err(|_| ctx.argument_error("negative array size"))
}

// ============================================================================
// Mutation
// ============================================================================

fn push(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    mutate(ctx, recv, |items| items.extend(args.positional))?;
    Ok(recv)
}

fn pop(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(mutate(ctx, recv, Vec::pop)?.unwrap_or_default())
}

fn shift(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let shifted = mutate(ctx, recv, |items| {
        (!items.is_empty()).then(|| items.remove(0))
    })?;
    Ok(shifted.unwrap_or_default())
}

fn unshift(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    mutate(ctx, recv, |items| {
        items.splice(0..0, args.positional);
    })?;
    Ok(recv)
}

fn concat(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut appended = Vec::new();
    for &other in &args.positional {
        appended.extend(expect_array(ctx, other)?);
    }
    mutate(ctx, recv, |items| items.extend(appended))?;
    Ok(recv)
}

// ============================================================================
// Queries and copies
// ============================================================================

/// Element-wise `==`.
fn equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let other = args.arg(0);
    if recv == other {
        return Ok(Value::TRUE);
    }
    let Some(theirs) = ctx.heap.array(other).cloned() else {
        return Ok(Value::FALSE);
    };
    let mine = items(ctx, recv);
    if mine.len() != theirs.len() {
        return Ok(Value::FALSE);
    }
    for (a, b) in mine.into_iter().zip(theirs) {
        if !ctx.values_eq(a, b)? {
            return Ok(Value::FALSE);
        }
    }
    Ok(Value::TRUE)
}

fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let mut parts = Vec::new();
    for item in items(ctx, recv) {
        parts.push(ctx.inspect(item)?);
    }
    Ok(ctx.new_string(format!("[{}]", parts.join(", "))))
}

fn to_a(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}

fn include(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(position(ctx, recv, args.arg(0))?.is_some()))
}

fn index(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(position(ctx, recv, args.arg(0))?.map_or(Value::Nil, |i| Value::Integer(i as i64)))
}

fn position(ctx: &mut ExecutionContext, recv: Value, needle: Value) -> VmResult<Option<usize>> {
    for (i, item) in items(ctx, recv).into_iter().enumerate() {
        if ctx.values_eq(item, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Nested arrays are joined recursively.
fn join(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let separator = match args.get(0) {
        None | Some(Value::Nil) => String::new(),
        Some(value) => expect_string(ctx, value)?,
    };
    let mut parts = Vec::new();
    join_into(ctx, recv, &separator, &mut parts)?;
    Ok(ctx.new_string(parts.join(&separator)))
}

fn join_into(
    ctx: &mut ExecutionContext,
    array: Value,
    separator: &str,
    parts: &mut Vec<String>,
) -> VmResult<()> {
    for item in items(ctx, array) {
        if ctx.heap.array(item).is_some() {
            join_into(ctx, item, separator, parts)?;
        } else {
            parts.push(ctx.to_s(item)?);
        }
    }
    Ok(())
}

fn plus(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut combined = items(ctx, recv);
    combined.extend(expect_array(ctx, args.arg(0))?);
    Ok(ctx.new_array(combined))
}

fn reverse(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let mut list = items(ctx, recv);
    list.reverse();
    Ok(ctx.new_array(list))
}

fn compact(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let list = items(ctx, recv).into_iter().filter(|v| !v.is_nil()).collect();
    Ok(ctx.new_array(list))
}

/// Folds with `+`, starting from `init` (0 by default).
fn sum(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut total = args.get(0).unwrap_or(Value::Integer(0));
    for item in items(ctx, recv) {
        total = ctx.funcall(total, "+", &[item])?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(ctx: &mut ExecutionContext, values: &[i64]) -> Value {
        let items = values.iter().copied().map(Value::Integer).collect();
        ctx.new_array(items)
    }

    #[test]
    fn test_negative_index_and_slices() {
        let mut ctx = ExecutionContext::default();
        let a = array(&mut ctx, &[1, 2, 3, 4]);
        assert_eq!(ctx.funcall(a, "[]", &[Value::Integer(-1)]).unwrap(), Value::Integer(4));
        assert_eq!(ctx.funcall(a, "[]", &[Value::Integer(9)]).unwrap(), Value::Nil);
        let slice = ctx
            .funcall(a, "[]", &[Value::Integer(1), Value::Integer(2)])
            .unwrap();
        assert_eq!(ctx.inspect(slice).unwrap(), "[2, 3]");
        let empty = ctx
            .funcall(a, "[]", &[Value::Integer(4), Value::Integer(1)])
            .unwrap();
        assert_eq!(ctx.inspect(empty).unwrap(), "[]");
    }

    #[test]
    fn test_assignment_pads_with_nil() {
        let mut ctx = ExecutionContext::default();
        let a = array(&mut ctx, &[1]);
        ctx.funcall(a, "[]=", &[Value::Integer(3), Value::Integer(9)])
            .unwrap();
        assert_eq!(ctx.inspect(a).unwrap(), "[1, nil, nil, 9]");
    }

    #[test]
    fn test_equality_is_elementwise() {
        let mut ctx = ExecutionContext::default();
        let a = array(&mut ctx, &[1, 2]);
        let b = array(&mut ctx, &[1, 2]);
        let c = array(&mut ctx, &[2, 1]);
        assert_eq!(ctx.funcall(a, "==", &[b]).unwrap(), Value::TRUE);
        assert_eq!(ctx.funcall(a, "==", &[c]).unwrap(), Value::FALSE);
    }

    #[test]
    fn test_join_and_sum() {
        let mut ctx = ExecutionContext::default();
        let inner = array(&mut ctx, &[2, 3]);
        let outer = ctx.new_array(vec![Value::Integer(1), inner]);
        let sep = ctx.new_string("-");
        let joined = ctx.funcall(outer, "join", &[sep]).unwrap();
        assert_eq!(ctx.heap.str(joined), Some("1-2-3"));
        assert_eq!(ctx.funcall(inner, "sum", &[]).unwrap(), Value::Integer(5));
    }
}
