//! Hash.
//!
//! `each` and `each_pair` are in the prelude.

use garnet_macros::native_methods;

use super::define_methods;
use super::string::inspect_str;
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::RHash;
use crate::runtime::value::Value;
use crate::vm::VmResult;

const HASH_METHODS: &[NativeMethod] = native_methods! {
    "[]" => element, Arity::exact(1);
    "[]=" => store, Arity::exact(2);
    "store" => store, Arity::exact(2);
    "fetch" => fetch, Arity::range(1, 2);
    "delete" => delete, Arity::exact(1);
    "size" => size, Arity::exact(0);
    "length" => size, Arity::exact(0);
    "empty?" => empty, Arity::exact(0);
    "keys" => keys, Arity::exact(0);
    "values" => values, Arity::exact(0);
    "key?" => has_key, Arity::exact(1);
    "has_key?" => has_key, Arity::exact(1);
    "include?" => has_key, Arity::exact(1);
    "member?" => has_key, Arity::exact(1);
    "merge" => merge, Arity::any();
    "==" => equal, Arity::exact(1);
    "inspect" => inspect, Arity::exact(0);
    "to_s" => inspect, Arity::exact(0);
    "to_h" => to_h, Arity::exact(0);
    "to_a" => to_a, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.hash, HASH_METHODS);
}

fn table(ctx: &ExecutionContext, value: Value) -> RHash {
    ctx.heap.hash(value).cloned().unwrap_or_default()
}

fn lookup(ctx: &ExecutionContext, recv: Value, key: Value) -> Option<Value> {
    let key = ctx.heap.hash_key(key);
    ctx.heap.hash(recv)?.get(&key)
}

fn element(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(lookup(ctx, recv, args.arg(0)).unwrap_or_default())
}

fn store(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let (key, value) = (args.arg(0), args.arg(1));
    ctx.check_frozen(recv)?;
    let lookup_key = ctx.heap.hash_key(key);
    if let Some(hash) = ctx.heap.hash_mut(recv) {
        hash.insert(lookup_key, key, value);
    }
    Ok(value)
}

/// Missing keys fall back to the block, then the default, then `KeyError`.
fn fetch(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let key = args.arg(0);
    if let Some(value) = lookup(ctx, recv, key) {
        return Ok(value);
    }
    if let Some(block) = args.block {
        return ctx.call_block(block, vec![key], None);
    }
    if let Some(default) = args.get(1) {
        return Ok(default);
    }
    let shown = ctx.inspect(key)?;
    Err(ctx.error(ctx.core.key_error, format!("key not found: {shown}")))
}

fn delete(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    ctx.check_frozen(recv)?;
    let key = ctx.heap.hash_key(args.arg(0));
    let removed = ctx.heap.hash_mut(recv).and_then(|h| h.remove(&key));
    Ok(removed.unwrap_or_default())
}

fn size(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let len = ctx.heap.hash(recv).map_or(0, RHash::len);
    Ok(Value::Integer(len as i64))
}

fn empty(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(ctx.heap.hash(recv).is_none_or(RHash::is_empty)))
}

fn keys(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let keys = table(ctx, recv).pairs().map(|(k, _)| k).collect();
    Ok(ctx.new_array(keys))
}

fn values(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let values = table(ctx, recv).pairs().map(|(_, v)| v).collect();
    Ok(ctx.new_array(values))
}

fn has_key(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(lookup(ctx, recv, args.arg(0)).is_some()))
}

/// A new hash; later arguments win on duplicate keys.
fn merge(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let mut merged = table(ctx, recv);
    for &other in &args.positional {
        let Some(entries) = ctx.heap.hash(other).cloned() else {
            let given = ctx.type_name(other);
            return Err(ctx.type_error(format!("no implicit conversion of {given} into Hash")));
        };
        for (key, key_value, value) in entries.entries() {
            merged.insert(key.clone(), key_value, value);
        }
    }
    let pairs = merged.pairs().collect();
    Ok(ctx.new_hash_from_pairs(pairs))
}

/// Same keys, with `==` values.
fn equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let other = args.arg(0);
    if recv == other {
        return Ok(Value::TRUE);
    }
    let Some(theirs) = ctx.heap.hash(other).cloned() else {
        return Ok(Value::FALSE);
    };
    let mine = table(ctx, recv);
    if mine.len() != theirs.len() {
        return Ok(Value::FALSE);
    }
    for (key, _, value) in mine.entries() {
        let Some(their_value) = theirs.get(key) else {
            return Ok(Value::FALSE);
        };
        if !ctx.values_eq(value, their_value)? {
            return Ok(Value::FALSE);
        }
    }
    Ok(Value::TRUE)
}

/// `{name: 1, "s" => 2}`
fn inspect(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let mut parts = Vec::new();
    for (key, value) in table(ctx, recv).pairs() {
        let shown = ctx.inspect(value)?;
        let entry = match key {
            Value::Symbol(name) if is_plain_label(name.as_str()) => format!("{name}: {shown}"),
            Value::Symbol(name) => format!("{}: {shown}", inspect_str(name.as_str())),
            _ => format!("{} => {shown}", ctx.inspect(key)?),
        };
        parts.push(entry);
    }
    Ok(ctx.new_string(format!("{{{}}}", parts.join(", "))))
}

/// Whether a symbol can be written as a bare `name:` label.
fn is_plain_label(name: &str) -> bool {
    let body = name.strip_suffix(['?', '!']).unwrap_or(name);
    let mut chars = body.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn to_h(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(recv)
}

fn to_a(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let mut rows = Vec::new();
    for (key, value) in table(ctx, recv).pairs() {
        rows.push(ctx.new_array(vec![key, value]));
    }
    Ok(ctx.new_array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::symbol::Symbol;

    #[test]
    fn test_inspect_uses_labels_for_symbols() {
        let mut ctx = ExecutionContext::default();
        let s = ctx.new_string("s");
        let hash = ctx.new_hash_from_pairs(vec![
            (Value::symbol("name"), Value::Integer(1)),
            (s, Value::Integer(2)),
            (Value::symbol("a b"), Value::Nil),
        ]);
        assert_eq!(
            ctx.inspect(hash).unwrap(),
            "{name: 1, \"s\" => 2, \"a b\": nil}"
        );
        let empty = ctx.new_hash_from_pairs(Vec::new());
        assert_eq!(ctx.inspect(empty).unwrap(), "{}");
    }

    #[test]
    fn test_string_keys_match_by_content() {
        let mut ctx = ExecutionContext::default();
        let hash = ctx.new_hash_from_pairs(Vec::new());
        let a = ctx.new_string("k");
        let b = ctx.new_string("k");
        ctx.funcall(hash, "[]=", &[a, Value::Integer(7)]).unwrap();
        assert_eq!(ctx.funcall(hash, "[]", &[b]).unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_fetch_missing_key_raises_key_error() {
        let mut ctx = ExecutionContext::default();
        let hash = ctx.new_hash_from_pairs(Vec::new());
        let result = ctx.funcall(hash, "fetch", &[Value::symbol("x")]);
        let Err(crate::vm::Unwind::Raise(e)) = result else {
            panic!("expected KeyError, got {result:?}");
        };
        let report = ctx.exception_report(e);
        assert_eq!(report.class, "KeyError");
        assert_eq!(report.message, "key not found: :x");

        let fallback = ctx
            .funcall(hash, "fetch", &[Value::symbol("x"), Value::Integer(0)])
            .unwrap();
        assert_eq!(fallback, Value::Integer(0));
    }

    #[test]
    fn test_merge_and_delete_keep_order() {
        let mut ctx = ExecutionContext::default();
        let a = ctx.new_hash_from_pairs(vec![
            (Value::symbol("a"), Value::Integer(1)),
            (Value::symbol("b"), Value::Integer(2)),
        ]);
        let b = ctx.new_hash_from_pairs(vec![(Value::symbol("a"), Value::Integer(3))]);
        let merged = ctx.funcall(a, "merge", &[b]).unwrap();
        assert_eq!(ctx.inspect(merged).unwrap(), "{a: 3, b: 2}");
        ctx.funcall(merged, "delete", &[Value::Symbol(Symbol::intern("a"))])
            .unwrap();
        assert_eq!(ctx.inspect(merged).unwrap(), "{b: 2}");
    }
}
