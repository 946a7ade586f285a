//! Integer and Float.
//!
//! Integers are fixnums: arithmetic that leaves the `i64` range raises
//! `RangeError` rather than promoting to a bignum.

use std::cmp::Ordering;

use garnet_macros::native_methods;

use super::{define_methods, expect_integer};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::value::Value;
use crate::vm::{Unwind, VmResult};

const INTEGER_METHODS: &[NativeMethod] = native_methods! {
    "+" => add, Arity::exact(1);
    "-" => sub, Arity::exact(1);
    "*" => mul, Arity::exact(1);
    "/" => div, Arity::exact(1);
    "%" => modulo, Arity::exact(1);
    "**" => pow, Arity::exact(1);
    "-@" => negate, Arity::exact(0);
    "==" => equal, Arity::exact(1);
    "<=>" => cmp, Arity::exact(1);
    "<" => lt, Arity::exact(1);
    "<=" => le, Arity::exact(1);
    ">" => gt, Arity::exact(1);
    ">=" => ge, Arity::exact(1);
    "to_s" => integer_to_s, Arity::range(0, 1);
    "inspect" => integer_to_s, Arity::range(0, 1);
    "to_i" => to_i, Arity::exact(0);
    "to_f" => to_f, Arity::exact(0);
    "zero?" => zero, Arity::exact(0);
    "abs" => abs, Arity::exact(0);
    "succ" => succ, Arity::exact(0);
    "pred" => pred, Arity::exact(0);
    "even?" => even, Arity::exact(0);
    "odd?" => odd, Arity::exact(0);
};

const FLOAT_METHODS: &[NativeMethod] = native_methods! {
    "+" => add, Arity::exact(1);
    "-" => sub, Arity::exact(1);
    "*" => mul, Arity::exact(1);
    "/" => div, Arity::exact(1);
    "%" => modulo, Arity::exact(1);
    "**" => pow, Arity::exact(1);
    "-@" => negate, Arity::exact(0);
    "==" => equal, Arity::exact(1);
    "<=>" => cmp, Arity::exact(1);
    "<" => lt, Arity::exact(1);
    "<=" => le, Arity::exact(1);
    ">" => gt, Arity::exact(1);
    ">=" => ge, Arity::exact(1);
    "to_s" => float_to_s, Arity::exact(0);
    "inspect" => float_to_s, Arity::exact(0);
    "to_i" => to_i, Arity::exact(0);
    "to_f" => to_f, Arity::exact(0);
    "zero?" => zero, Arity::exact(0);
    "abs" => abs, Arity::exact(0);
    "nan?" => nan, Arity::exact(0);
    "floor" => floor, Arity::exact(0);
    "ceil" => ceil, Arity::exact(0);
    "round" => round, Arity::exact(0);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.integer, INTEGER_METHODS);
    define_methods(ctx, core.float, FLOAT_METHODS);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: Value) -> Option<Num> {
        match value {
            Value::Integer(n) => Some(Num::Int(n)),
            Value::Float(f) => Some(Num::Float(f)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn class_name(self) -> &'static str {
        match self {
            Num::Int(_) => "Integer",
            Num::Float(_) => "Float",
        }
    }
}

fn receiver(value: Value) -> Num {
    Num::of(value).unwrap_or(Num::Int(0))
}

/// `TypeError: String can't be coerced into Integer`
fn operand(ctx: &mut ExecutionContext, recv: Num, value: Value) -> VmResult<Num> {
    match Num::of(value) {
        Some(num) => Ok(num),
        None => {
            let given = ctx.type_name(value);
            Err(ctx.type_error(format!(
                "{given} can't be coerced into {}",
                recv.class_name()
            )))
        }
    }
}

fn overflow(ctx: &mut ExecutionContext) -> Unwind {
    ctx.error(ctx.core.range_error, "integer overflow")
}

fn divided_by_zero(ctx: &mut ExecutionContext) -> Unwind {
    ctx.error(ctx.core.zero_division_error, "divided by 0")
}

// ============================================================================
// Arithmetic
// ============================================================================

fn arithmetic(
    ctx: &mut ExecutionContext,
    recv: Value,
    other: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> VmResult<Value> {
    let lhs = receiver(recv);
    let rhs = operand(ctx, lhs, other)?;
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => match int_op(a, b) {
            Some(n) => Ok(Value::Integer(n)),
            None => Err(overflow(ctx)),
        },
        (a, b) => Ok(Value::Float(float_op(a.to_f64(), b.to_f64()))),
    }
}

fn add(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    arithmetic(ctx, recv, args.arg(0), i64::checked_add, |a, b| a + b)
}

fn sub(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    arithmetic(ctx, recv, args.arg(0), i64::checked_sub, |a, b| a - b)
}

fn mul(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    arithmetic(ctx, recv, args.arg(0), i64::checked_mul, |a, b| a * b)
}

/// Floor division for integers; IEEE division otherwise.
fn div(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let lhs = receiver(recv);
    let rhs = operand(ctx, lhs, args.arg(0))?;
    match (lhs, rhs) {
        (Num::Int(_), Num::Int(0)) => Err(divided_by_zero(ctx)),
        (Num::Int(a), Num::Int(b)) => match floor_div(a, b) {
            Some(q) => Ok(Value::Integer(q)),
            None => Err(overflow(ctx)),
        },
        (a, b) => Ok(Value::Float(a.to_f64() / b.to_f64())),
    }
}

/// The result takes the sign of the divisor.
fn modulo(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let lhs = receiver(recv);
    let rhs = operand(ctx, lhs, args.arg(0))?;
    match (lhs, rhs) {
        (Num::Int(_), Num::Int(0)) => Err(divided_by_zero(ctx)),
        (Num::Int(a), Num::Int(b)) => Ok(Value::Integer(floor_mod(a, b))),
        (a, b) => {
            let (a, b) = (a.to_f64(), b.to_f64());
            let mut r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r += b;
            }
            Ok(Value::Float(r))
        }
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

/// A negative integer exponent yields a Float.
fn pow(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let lhs = receiver(recv);
    let rhs = operand(ctx, lhs, args.arg(0))?;
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) if b >= 0 => {
            let result = u32::try_from(b).ok().and_then(|e| a.checked_pow(e));
            match result {
                Some(n) => Ok(Value::Integer(n)),
                None => Err(overflow(ctx)),
            }
        }
        (a, b) => Ok(Value::Float(a.to_f64().powf(b.to_f64()))),
    }
}

fn negate(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    match receiver(recv) {
        Num::Int(n) => n.checked_neg().map(Value::Integer).ok_or_else(|| overflow(ctx)),
        Num::Float(f) => Ok(Value::Float(-f)),
    }
}

fn abs(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    match receiver(recv) {
        Num::Int(n) => n.checked_abs().map(Value::Integer).ok_or_else(|| overflow(ctx)),
        Num::Float(f) => Ok(Value::Float(f.abs())),
    }
}

fn succ(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let n = expect_integer(ctx, recv)?;
    n.checked_add(1).map(Value::Integer).ok_or_else(|| overflow(ctx))
}

fn pred(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let n = expect_integer(ctx, recv)?;
    n.checked_sub(1).map(Value::Integer).ok_or_else(|| overflow(ctx))
}

// ============================================================================
// Comparison
// ============================================================================

fn compare(lhs: Num, rhs: Num) -> Option<Ordering> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
    }
}

fn equal(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let equal = Num::of(args.arg(0))
        .is_some_and(|rhs| compare(receiver(recv), rhs) == Some(Ordering::Equal));
    Ok(Value::Bool(equal))
}

fn cmp(_ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let ordering = Num::of(args.arg(0)).and_then(|rhs| compare(receiver(recv), rhs));
    Ok(match ordering {
        Some(ordering) => Value::Integer(ordering as i64),
        None => Value::Nil,
    })
}

/// `ArgumentError: comparison of Integer with String failed`
fn relation(
    ctx: &mut ExecutionContext,
    recv: Value,
    other: Value,
    test: fn(Ordering) -> bool,
) -> VmResult<Value> {
    let lhs = receiver(recv);
    let Some(rhs) = Num::of(other) else {
        let given = match other {
            Value::Nil | Value::Bool(_) => ctx.inspect(other)?,
            _ => ctx.type_name(other),
        };
        return Err(ctx.argument_error(format!(
            "comparison of {} with {given} failed",
            lhs.class_name()
        )));
    };
    Ok(Value::Bool(compare(lhs, rhs).is_some_and(test)))
}

fn lt(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    relation(ctx, recv, args.arg(0), Ordering::is_lt)
}

fn le(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    relation(ctx, recv, args.arg(0), Ordering::is_le)
}

fn gt(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    relation(ctx, recv, args.arg(0), Ordering::is_gt)
}

fn ge(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    relation(ctx, recv, args.arg(0), Ordering::is_ge)
}

// ============================================================================
// Predicates and conversion
// ============================================================================

fn zero(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(receiver(recv).to_f64() == 0.0))
}

fn even(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(expect_integer(ctx, recv)? % 2 == 0))
}

fn odd(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(expect_integer(ctx, recv)? % 2 != 0))
}

fn nan(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Bool(receiver(recv).to_f64().is_nan()))
}

fn to_f(_ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    Ok(Value::Float(receiver(recv).to_f64()))
}

fn to_i(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    match receiver(recv) {
        Num::Int(n) => Ok(Value::Integer(n)),
        Num::Float(f) => float_to_integer(ctx, f.trunc()),
    }
}

fn floor(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    float_to_integer(ctx, receiver(recv).to_f64().floor())
}

fn ceil(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    float_to_integer(ctx, receiver(recv).to_f64().ceil())
}

/// Halves round away from zero.
fn round(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    float_to_integer(ctx, receiver(recv).to_f64().round())
}

fn float_to_integer(ctx: &mut ExecutionContext, f: f64) -> VmResult<Value> {
    if f.is_nan() || f.is_infinite() {
        return Err(ctx.error(ctx.core.range_error, format_float(f)));
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(overflow(ctx));
    }
    Ok(Value::Integer(f as i64))
}

fn integer_to_s(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let n = expect_integer(ctx, recv)?;
    let radix = match args.get(0) {
        Some(value) => expect_integer(ctx, value)?,
        None => 10,
    };
    if !(2..=36).contains(&radix) {
        return Err(ctx.argument_error(format!("invalid radix {radix}")));
    }
    Ok(ctx.new_string(format_radix(n, radix as u32)))
}

fn float_to_s(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let text = format_float(receiver(recv).to_f64());
    Ok(ctx.new_string(text))
}

/// Digits of `n` in `radix`, lowercase.
fn format_radix(n: i64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut magnitude = n.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = (magnitude % u64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('?'));
        magnitude /= u64::from(radix);
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Shortest round-tripping form: `1.0`, `0.1`, `1.0e+16`, `1.5e-05`,
/// `NaN`, `-Infinity`.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{f:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    format!("{f:?}")
}
