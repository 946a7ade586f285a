//! Argument binding.
//!
//! [`bind`] reconciles the arguments of a call site with a callee's
//! [`ParamSpec`]. It is a deterministic fold over the spec: it never runs
//! Ruby code. Default-value expressions are returned unevaluated in
//! [`Binding::defaults`] so the caller can run them inside the new frame,
//! after every check here has passed.

use thiserror::Error;

use crate::runtime::function::{Arity, Keywords};
use crate::runtime::object::HashKey;
use crate::runtime::params::{DefaultExpr, ParamKind, ParamSpec};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::Value;

/// One call-site argument, with splats already read out of their objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// `x`
    Positional(Value),
    /// `*xs`
    Splat(Vec<Value>),
    /// `k: x`
    Keyword(Symbol, Value),
    /// `**h`, as `(lookup key, key, value)` entries
    KwSplat(Vec<(HashKey, Value, Value)>),
}

/// Allocation hooks the binder needs for rest arrays and keyword hashes.
pub trait ArgumentHeap {
    /// Allocates an Array.
    fn new_array(&mut self, items: Vec<Value>) -> Value;
    /// Allocates a Hash.
    fn new_hash(&mut self, entries: Keywords) -> Value;
    /// Elements of `value` if it is an Array.
    fn array_items(&self, value: Value) -> Option<Vec<Value>>;
}

/// Arity semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Methods and lambdas: counts must match
    Strict,
    /// Blocks: missing positionals are nil, extras are dropped, and a lone
    /// Array argument is spread over several parameters
    Proc,
}

/// Why a call could not be bound.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// Positional count outside the accepted range
    #[error("wrong number of arguments (given {given}, expected {})", expected(.required, .optional, .rest))]
    Arity {
        /// Positionals supplied
        given: usize,
        /// Required positionals
        required: usize,
        /// Optional positionals
        optional: usize,
        /// Whether a rest parameter exists
        rest: bool,
    },
    /// Required keywords absent, in declaration order
    #[error("missing keyword{}: {}", plural(.0.len()), symbols(.0))]
    MissingKeywords(Vec<Symbol>),
    /// Keywords nobody declared, already inspected
    #[error("unknown keyword{}: {}", plural(.0.len()), .0.join(", "))]
    UnknownKeywords(Vec<String>),
    /// `...` used where the enclosing method does not forward
    #[error("unexpected ... (no anonymous rest parameter)")]
    NotForwardable,
}

fn expected(required: &usize, optional: &usize, rest: &bool) -> String {
    let (required, optional) = (*required, *optional);
    if *rest {
        format!("{required}+")
    } else if optional > 0 {
        format!("{required}..{}", required + optional)
    } else {
        required.to_string()
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn symbols(names: &[Symbol]) -> String {
    names
        .iter()
        .map(|s| s.inspect())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Locals produced by a successful bind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    /// `(slot, value)` assignments
    pub locals: Vec<(u32, Value)>,
    /// `(slot, default fragment)` pairs to evaluate in order
    pub defaults: Vec<(u32, DefaultExpr)>,
}

/// Expands splats and merges keywords left to right.
fn flatten(args: Vec<Arg>) -> (Vec<Value>, Keywords) {
    let mut positional = Vec::with_capacity(args.len());
    let mut keywords = Keywords::default();
    for arg in args {
        match arg {
            Arg::Positional(value) => positional.push(value),
            Arg::Splat(items) => positional.extend(items),
            Arg::Keyword(name, value) => {
                keywords.insert(HashKey::Symbol(name), (Value::Symbol(name), value));
            }
            Arg::KwSplat(entries) => {
                for (key, key_value, value) in entries {
                    keywords.insert(key, (key_value, value));
                }
            }
        }
    }
    (positional, keywords)
}

/// Whether a block with this spec spreads a lone Array argument.
fn auto_splats(spec: &ParamSpec) -> bool {
    let named = spec.required_count() + spec.optional_count();
    named >= 2 || (named >= 1 && spec.has_rest())
}

/// Binds `args` (and `block`) against `spec`.
pub fn bind<H: ArgumentHeap + ?Sized>(
    args: Vec<Arg>,
    block: Option<Value>,
    spec: &ParamSpec,
    mode: BindMode,
    heap: &mut H,
) -> Result<Binding, BindError> {
    let (mut positional, mut keywords) = flatten(args);

    if !spec.accepts_keywords() && !keywords.is_empty() {
        let hash = heap.new_hash(std::mem::take(&mut keywords));
        positional.push(hash);
    }

    let required = spec.required_count();
    let optional = spec.optional_count();

    match mode {
        BindMode::Strict => {
            let given = positional.len();
            if given < required || (!spec.has_rest() && given > required + optional) {
                return Err(BindError::Arity {
                    given,
                    required,
                    optional,
                    rest: spec.has_rest(),
                });
            }
        }
        BindMode::Proc => {
            if positional.len() == 1 && auto_splats(spec) {
                if let Some(items) = heap.array_items(positional[0]) {
                    positional = items;
                }
            }
            if positional.len() < required {
                positional.resize(required, Value::Nil);
            }
            if !spec.has_rest() && positional.len() > required + optional {
                positional.truncate(required + optional);
            }
        }
    }

    let mut binding = Binding::default();
    let given = positional.len();
    let lead = spec.lead_count();
    let post = spec.post_count();

    for (i, param) in spec.lead().enumerate() {
        binding.locals.push((param.slot, positional[i]));
    }

    let filled = (given - required).min(optional);
    for (i, param) in spec.optional().enumerate() {
        if i < filled {
            binding.locals.push((param.slot, positional[lead + i]));
        } else if let ParamKind::Optional(default) = param.kind {
            binding.defaults.push((param.slot, default));
        }
    }

    let rest_end = given - post;
    if let Some(param) = spec.rest() {
        let rest = positional[lead + filled..rest_end].to_vec();
        binding.locals.push((param.slot, heap.new_array(rest)));
    }

    for (i, param) in spec.post().enumerate() {
        binding.locals.push((param.slot, positional[rest_end + i]));
    }

    let mut missing = Vec::new();
    for param in spec.keywords() {
        match keywords.shift_remove(&HashKey::Symbol(param.name)) {
            Some((_, value)) => binding.locals.push((param.slot, value)),
            None => match param.kind {
                ParamKind::RequiredKeyword => missing.push(param.name),
                ParamKind::OptionalKeyword(default) => binding.defaults.push((param.slot, default)),
                _ => {}
            },
        }
    }
    if !missing.is_empty() {
        return Err(BindError::MissingKeywords(missing));
    }

    if let Some(param) = spec.keyword_rest() {
        binding.locals.push((param.slot, heap.new_hash(keywords)));
    } else if !keywords.is_empty() {
        return Err(BindError::UnknownKeywords(
            keywords.keys().map(HashKey::inspect).collect(),
        ));
    }

    if let Some(param) = spec.block() {
        binding.locals.push((param.slot, block.unwrap_or(Value::Nil)));
    }

    Ok(binding)
}

/// Binds a call to a native method: positionals checked against `arity`,
/// keywords kept apart only when the native asks for them.
pub fn bind_native<H: ArgumentHeap + ?Sized>(
    args: Vec<Arg>,
    arity: &Arity,
    heap: &mut H,
) -> Result<(Vec<Value>, Keywords), BindError> {
    let (mut positional, mut keywords) = flatten(args);
    if !arity.keywords && !keywords.is_empty() {
        let hash = heap.new_hash(std::mem::take(&mut keywords));
        positional.push(hash);
    }
    let given = positional.len();
    if given < arity.required || (!arity.rest && given > arity.required + arity.optional) {
        return Err(BindError::Arity {
            given,
            required: arity.required,
            optional: arity.optional,
            rest: arity.rest,
        });
    }
    Ok((positional, keywords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::ArenaRef;
    use crate::runtime::params::Param;
    use crate::runtime::value::ObjRef;

    const HASH_BASE: u32 = 1 << 20;

    #[derive(Default)]
    struct TestHeap {
        arrays: Vec<Vec<Value>>,
        hashes: Vec<Keywords>,
    }

    impl TestHeap {
        fn array(&self, value: Value) -> &Vec<Value> {
            let Value::Object(ObjRef(r)) = value else {
                panic!("not an array: {value:?}")
            };
            &self.arrays[r.index()]
        }

        fn hash(&self, value: Value) -> Vec<(Value, Value)> {
            let Value::Object(ObjRef(r)) = value else {
                panic!("not a hash: {value:?}")
            };
            self.hashes[r.index() - HASH_BASE as usize]
                .values()
                .copied()
                .collect()
        }
    }

    impl ArgumentHeap for TestHeap {
        fn new_array(&mut self, items: Vec<Value>) -> Value {
            self.arrays.push(items);
            Value::Object(ObjRef(ArenaRef::new(self.arrays.len() as u32 - 1)))
        }

        fn new_hash(&mut self, entries: Keywords) -> Value {
            self.hashes.push(entries);
            Value::Object(ObjRef(ArenaRef::new(
                HASH_BASE + self.hashes.len() as u32 - 1,
            )))
        }

        fn array_items(&self, value: Value) -> Option<Vec<Value>> {
            match value {
                Value::Object(ObjRef(r)) if (r.index() as u32) < HASH_BASE => {
                    self.arrays.get(r.index()).cloned()
                }
                _ => None,
            }
        }
    }

    fn spec(params: &[(&str, ParamKind)]) -> ParamSpec {
        ParamSpec::new(
            params
                .iter()
                .enumerate()
                .map(|(slot, (name, kind))| Param::new(name, kind.clone(), slot as u32))
                .collect(),
        )
        .unwrap()
    }

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    fn pos(values: &[i64]) -> Vec<Arg> {
        values.iter().map(|n| Arg::Positional(int(*n))).collect()
    }

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn kw(name: &str, n: i64) -> Arg {
        Arg::Keyword(sym(name), int(n))
    }

    fn splat_hash(entries: &[(&str, i64)]) -> Arg {
        Arg::KwSplat(
            entries
                .iter()
                .map(|(k, v)| (HashKey::Symbol(sym(k)), Value::symbol(k), int(*v)))
                .collect(),
        )
    }

    #[test]
    fn test_required_only() {
        let s = spec(&[("a", ParamKind::Required), ("b", ParamKind::Required)]);
        let mut heap = TestHeap::default();

        let b = bind(pos(&[1, 2]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1)), (1, int(2))]);

        let err = bind(pos(&[1]), None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 1, expected 2)");

        let err = bind(pos(&[1, 2, 3]), None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 3, expected 2)");
    }

    #[test]
    fn test_spec_from_param_notation() {
        let s = garnet_macros::params![a, ?b, *rest, c].unwrap();
        let mut heap = TestHeap::default();

        let b = bind(pos(&[1, 2]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert!(b.locals.contains(&(0, int(1))));
        assert!(b.locals.contains(&(3, int(2))));
        assert_eq!(b.defaults, vec![(1, 1)]);
    }

    #[test]
    fn test_optional_defaults_deferred() {
        let s = spec(&[("arg1", ParamKind::Required), ("arg2", ParamKind::Optional(0))]);
        let mut heap = TestHeap::default();

        let b = bind(pos(&[1]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1))]);
        assert_eq!(b.defaults, vec![(1, 0)]);

        let b = bind(pos(&[1, 2]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert!(b.defaults.is_empty());

        let err = bind(vec![], None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1..2)");
    }

    #[test]
    fn test_rest_between_lead_and_post() {
        let s = spec(&[
            ("a", ParamKind::Required),
            ("o", ParamKind::Optional(0)),
            ("r", ParamKind::Rest),
            ("z", ParamKind::Required),
        ]);
        let mut heap = TestHeap::default();

        let b = bind(pos(&[1, 2, 3, 4, 5]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals[0], (0, int(1)));
        assert_eq!(b.locals[1], (1, int(2)));
        assert_eq!(heap.array(b.locals[2].1), &vec![int(3), int(4)]);
        assert_eq!(b.locals[3], (3, int(5)));

        let b = bind(pos(&[1, 5]), None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.defaults, vec![(1, 0)]);
        assert!(heap.array(b.locals[1].1).is_empty());
        assert_eq!(b.locals[2], (3, int(5)));

        let err = bind(pos(&[1]), None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 1, expected 2+)");
    }

    #[test]
    fn test_splat_expands_in_place() {
        let s = spec(&[
            ("a", ParamKind::Required),
            ("b", ParamKind::Required),
            ("c", ParamKind::Required),
        ]);
        let mut heap = TestHeap::default();
        let args = vec![
            Arg::Positional(int(1)),
            Arg::Splat(vec![int(2)]),
            Arg::Positional(int(3)),
        ];
        let b = bind(args, None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1)), (1, int(2)), (2, int(3))]);
    }

    #[test]
    fn test_missing_keyword() {
        let s = spec(&[("arg1", ParamKind::RequiredKeyword)]);
        let mut heap = TestHeap::default();
        let err = bind(vec![], None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "missing keyword: :arg1");
    }

    #[test]
    fn test_all_missing_keywords_reported() {
        let s = spec(&[
            ("a", ParamKind::RequiredKeyword),
            ("b", ParamKind::OptionalKeyword(0)),
            ("c", ParamKind::RequiredKeyword),
        ]);
        let mut heap = TestHeap::default();
        let err = bind(vec![], None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err, BindError::MissingKeywords(vec![sym("a"), sym("c")]));
        assert_eq!(err.to_string(), "missing keywords: :a, :c");
    }

    #[test]
    fn test_optional_keyword_default_deferred() {
        let s = spec(&[("a", ParamKind::RequiredKeyword), ("b", ParamKind::OptionalKeyword(3))]);
        let mut heap = TestHeap::default();
        let b = bind(vec![kw("a", 1)], None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1))]);
        assert_eq!(b.defaults, vec![(1, 3)]);
    }

    #[test]
    fn test_keyword_merge_order_and_overwrite() {
        let s = spec(&[("opts", ParamKind::KeywordRest)]);
        let mut heap = TestHeap::default();
        let args = vec![
            splat_hash(&[("arg1", 1), ("arg3", 3)]),
            kw("arg2", 2),
            splat_hash(&[("arg1", 10)]),
            kw("arg4", 4),
        ];
        let b = bind(args, None, &s, BindMode::Strict, &mut heap).unwrap();
        let entries = heap.hash(b.locals[0].1);
        assert_eq!(
            entries,
            vec![
                (Value::symbol("arg1"), int(10)),
                (Value::symbol("arg3"), int(3)),
                (Value::symbol("arg2"), int(2)),
                (Value::symbol("arg4"), int(4)),
            ]
        );
    }

    #[test]
    fn test_keywords_demoted_to_trailing_hash() {
        let s = spec(&[("a", ParamKind::Required), ("h", ParamKind::Required)]);
        let mut heap = TestHeap::default();
        let b = bind(vec![Arg::Positional(int(1)), kw("x", 2)], None, &s, BindMode::Strict, &mut heap)
            .unwrap();
        assert_eq!(heap.hash(b.locals[1].1), vec![(Value::symbol("x"), int(2))]);

        // demoted hash counts toward arity
        let s = spec(&[("a", ParamKind::Required)]);
        let err = bind(vec![Arg::Positional(int(1)), kw("x", 2)], None, &s, BindMode::Strict, &mut heap)
            .unwrap_err();
        assert!(matches!(err, BindError::Arity { given: 2, .. }));
    }

    #[test]
    fn test_non_symbol_keys_go_to_keyword_rest() {
        let s = spec(&[("a", ParamKind::OptionalKeyword(0)), ("rest", ParamKind::KeywordRest)]);
        let mut heap = TestHeap::default();
        let args = vec![Arg::KwSplat(vec![
            (HashKey::String("a".into()), int(100), int(1)),
            (HashKey::Symbol(sym("a")), Value::symbol("a"), int(2)),
        ])];
        let b = bind(args, None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals[0], (0, int(2)));
        assert_eq!(heap.hash(b.locals[1].1), vec![(int(100), int(1))]);
    }

    #[test]
    fn test_non_symbol_key_without_keyword_rest_fails() {
        let s = spec(&[("a", ParamKind::OptionalKeyword(0))]);
        let mut heap = TestHeap::default();
        let args = vec![Arg::KwSplat(vec![(HashKey::String("x".into()), int(0), int(1))])];
        let err = bind(args, None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "unknown keyword: \"x\"");
    }

    #[test]
    fn test_unknown_keywords() {
        let s = spec(&[("a", ParamKind::OptionalKeyword(0))]);
        let mut heap = TestHeap::default();
        let err = bind(vec![kw("x", 1), kw("y", 2)], None, &s, BindMode::Strict, &mut heap)
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown keywords: :x, :y");
    }

    #[test]
    fn test_arity_checked_before_keywords() {
        let s = spec(&[("a", ParamKind::Required), ("k", ParamKind::RequiredKeyword)]);
        let mut heap = TestHeap::default();
        let err = bind(vec![], None, &s, BindMode::Strict, &mut heap).unwrap_err();
        assert!(matches!(err, BindError::Arity { .. }));
    }

    #[test]
    fn test_block_param() {
        let s = spec(&[("blk", ParamKind::Block)]);
        let mut heap = TestHeap::default();
        let b = bind(vec![], Some(int(7)), &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(7))]);
        let b = bind(vec![], None, &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, Value::Nil)]);
    }

    #[test]
    fn test_forward_captures_everything() {
        let s = ParamSpec::new(vec![Param::new("...", ParamKind::Forward, 0)]).unwrap();
        let mut heap = TestHeap::default();
        let args = vec![Arg::Positional(int(1)), Arg::Positional(int(2)), kw("k", 3)];
        let b = bind(args, Some(int(9)), &s, BindMode::Strict, &mut heap).unwrap();
        assert_eq!(heap.array(b.locals[0].1), &vec![int(1), int(2)]);
        assert_eq!(heap.hash(b.locals[1].1), vec![(Value::symbol("k"), int(3))]);
        assert_eq!(b.locals[2], (2, int(9)));
    }

    #[test]
    fn test_proc_mode_is_lenient() {
        let s = spec(&[("a", ParamKind::Required), ("b", ParamKind::Required)]);
        let mut heap = TestHeap::default();

        let b = bind(pos(&[1]), None, &s, BindMode::Proc, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1)), (1, Value::Nil)]);

        let b = bind(pos(&[1, 2, 3]), None, &s, BindMode::Proc, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1)), (1, int(2))]);
    }

    #[test]
    fn test_proc_mode_auto_splat() {
        let mut heap = TestHeap::default();
        let pair = heap.new_array(vec![int(1), int(2)]);

        let s = spec(&[("a", ParamKind::Required), ("b", ParamKind::Required)]);
        let b = bind(vec![Arg::Positional(pair)], None, &s, BindMode::Proc, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, int(1)), (1, int(2))]);

        let single = spec(&[("a", ParamKind::Required)]);
        let b = bind(vec![Arg::Positional(pair)], None, &single, BindMode::Proc, &mut heap).unwrap();
        assert_eq!(b.locals, vec![(0, pair)]);
    }

    #[test]
    fn test_native_binding() {
        let mut heap = TestHeap::default();
        let (args, kws) = bind_native(pos(&[1, 2]), &Arity::range(1, 2), &mut heap).unwrap();
        assert_eq!(args, vec![int(1), int(2)]);
        assert!(kws.is_empty());

        let err = bind_native(pos(&[]), &Arity::range(1, 2), &mut heap).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1..2)");

        let (args, kws) =
            bind_native(vec![kw("a", 1)], &Arity::any().with_keywords(), &mut heap).unwrap();
        assert!(args.is_empty());
        assert_eq!(kws.len(), 1);

        let (args, _) = bind_native(vec![kw("a", 1)], &Arity::any(), &mut heap).unwrap();
        assert_eq!(args.len(), 1);
    }
}
