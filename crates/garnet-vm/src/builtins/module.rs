//! Module and Class.

use std::sync::Arc;

use garnet_macros::native_methods;
use tracing::debug;

use super::{define_methods, expect_class, expect_name, forward};
use crate::compiler::{CompileError, Instruction, IseqBuilder};
use crate::runtime::class::{AllocKind, ClassKind, HierarchyError};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{Arity, NativeArgs, NativeMethod};
use crate::runtime::object::{ExceptionData, ObjectKind, RHash};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{ClassId, Value};
use crate::vm::{Unwind, VmResult};

const MODULE_METHODS: &[NativeMethod] = native_methods! {
    "name" => name, Arity::exact(0);
    "to_s" => to_s, Arity::exact(0);
    "inspect" => to_s, Arity::exact(0);
    "ancestors" => ancestors, Arity::exact(0);
    "include" => include, Arity::at_least(1);
    "include?" => include_p, Arity::exact(1);
    "===" => case_equal, Arity::exact(1);
    "alias_method" => alias_method, Arity::exact(2);
    "const_get" => const_get, Arity::exact(1);
    "const_set" => const_set, Arity::exact(2);
    "const_defined?" => const_defined, Arity::exact(1);
    "constants" => constants, Arity::exact(0);
    "instance_methods" => instance_methods, Arity::range(0, 1);
    "method_defined?" => method_defined, Arity::exact(1);
    "attr_reader" => attr_reader, Arity::any();
    "attr_writer" => attr_writer, Arity::any();
    "attr_accessor" => attr_accessor, Arity::any();
    "private" => visibility, Arity::any();
    "public" => visibility, Arity::any();
    "protected" => visibility, Arity::any();
    "module_function" => visibility, Arity::any();
    "class_eval" => class_eval, Arity::exact(0);
    "module_eval" => class_eval, Arity::exact(0);
    "class_exec" => class_exec, Arity::any();
    "module_exec" => class_exec, Arity::any();
};

const CLASS_METHODS: &[NativeMethod] = native_methods! {
    "new" => new, Arity::any().with_keywords();
    "allocate" => allocate, Arity::exact(0);
    "superclass" => superclass, Arity::exact(0);
    "<" => lt, Arity::exact(1);
    "<=" => le, Arity::exact(1);
};

pub(crate) fn install(ctx: &mut ExecutionContext) {
    let core = ctx.core;
    define_methods(ctx, core.module, MODULE_METHODS);
    define_methods(ctx, core.class, CLASS_METHODS);
}

fn receiver_class(ctx: &mut ExecutionContext, recv: Value) -> VmResult<ClassId> {
    expect_class(ctx, recv)
}

// ============================================================================
// Names and ancestry
// ============================================================================

fn name(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    match ctx.classes[class].name.clone() {
        Some(name) => Ok(ctx.new_string(name)),
        None => Ok(Value::Nil),
    }
}

fn to_s(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let name = ctx.class_name(class);
    Ok(ctx.new_string(name))
}

fn ancestors(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let items = ctx.classes[class]
        .ancestors
        .iter()
        .copied()
        .filter(|&c| ctx.classes[c].kind != ClassKind::Singleton)
        .map(Value::Class)
        .collect();
    Ok(ctx.new_array(items))
}

/// `include M1, M2` puts `M1` nearest the including class.
fn include(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let target = receiver_class(ctx, recv)?;
    for &module in args.positional.iter().rev() {
        let module = match module {
            Value::Class(module) => module,
            other => {
                let given = ctx.type_name(other);
                return Err(ctx.type_error(format!("wrong argument type {given} (expected Module)")));
            }
        };
        match ctx.classes.include(target, module) {
            Ok(()) => {}
            Err(HierarchyError::CyclicInclude) => {
                return Err(ctx.argument_error(HierarchyError::CyclicInclude.to_string()));
            }
            Err(err @ HierarchyError::NotAModule(_)) => return Err(ctx.type_error(err.to_string())),
        }
    }
    Ok(recv)
}

fn include_p(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let target = receiver_class(ctx, recv)?;
    let module = expect_class(ctx, args.arg(0))?;
    let included = target != module
        && ctx.classes[module].kind == ClassKind::Module
        && ctx.classes.inherits(target, module);
    Ok(Value::Bool(included))
}

fn case_equal(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    Ok(Value::Bool(ctx.is_a(args.arg(0), class)))
}

// ============================================================================
// Methods
// ============================================================================

fn alias_method(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let new_name = expect_name(ctx, args.arg(0))?;
    let old_name = expect_name(ctx, args.arg(1))?;
    let found = ctx
        .classes
        .find_method(&ctx.classes[class].ancestors, old_name)
        .map(|(_, entry)| entry.clone());
    let Some(entry) = found else {
        let noun = module_noun(ctx, class);
        let shown = ctx.class_name(class);
        return Err(ctx.error(
            ctx.core.name_error,
            format!("undefined method '{old_name}' for {noun} '{shown}'"),
        ));
    };
    debug!(class = %ctx.class_name(class), new = %new_name, old = %old_name, "alias method");
    ctx.classes[class].methods.insert(new_name, entry);
    Ok(Value::Symbol(new_name))
}

fn instance_methods(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let inherit = args.get(0).is_none_or(|v| v.truthy());
    let owners = if inherit {
        ctx.classes[class].ancestors.clone()
    } else {
        vec![class]
    };
    let mut names: Vec<Symbol> = Vec::new();
    for owner in owners {
        for name in ctx.classes[owner].methods.keys() {
            if !names.contains(name) {
                names.push(*name);
            }
        }
    }
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let items = names.into_iter().map(Value::Symbol).collect();
    Ok(ctx.new_array(items))
}

fn method_defined(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let name = expect_name(ctx, args.arg(0))?;
    let found = ctx
        .classes
        .find_method(&ctx.classes[class].ancestors, name)
        .is_some();
    Ok(Value::Bool(found))
}

fn visibility(ctx: &mut ExecutionContext, _recv: Value, args: NativeArgs) -> VmResult<Value> {
    Ok(ctx.collapse(args.positional))
}

// ============================================================================
// attr_*
// ============================================================================

fn attr_reader(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    define_attrs(ctx, recv, args, true, false)
}

fn attr_writer(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    define_attrs(ctx, recv, args, false, true)
}

fn attr_accessor(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    define_attrs(ctx, recv, args, true, true)
}

fn define_attrs(
    ctx: &mut ExecutionContext,
    recv: Value,
    args: NativeArgs,
    reader: bool,
    writer: bool,
) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let mut defined = Vec::new();
    for &arg in &args.positional {
        let name = expect_name(ctx, arg)?;
        if reader {
            let iseq = reader_iseq(name).map_err(|e| compile_failure(ctx, e))?;
            ctx.define_iseq_method(class, name, Arc::new(iseq), class);
            defined.push(Value::Symbol(name));
        }
        if writer {
            let setter = Symbol::intern(&format!("{name}="));
            let iseq = writer_iseq(name).map_err(|e| compile_failure(ctx, e))?;
            ctx.define_iseq_method(class, setter, Arc::new(iseq), class);
            defined.push(Value::Symbol(setter));
        }
    }
    Ok(ctx.new_array(defined))
}

/// `def name = @name`
fn reader_iseq(name: Symbol) -> Result<crate::compiler::Iseq, CompileError> {
    let mut b = IseqBuilder::method(name.as_str()).with_path("<internal:attr>");
    b.emit(Instruction::GetIvar(Symbol::intern(&format!("@{name}"))));
    b.leave();
    b.build()
}

/// `def name=(value) = @name = value`
fn writer_iseq(name: Symbol) -> Result<crate::compiler::Iseq, CompileError> {
    let mut b = IseqBuilder::method(&format!("{name}=")).with_path("<internal:attr>");
    let value = b.required("value");
    b.get_local(value);
    b.emit(Instruction::SetIvar(Symbol::intern(&format!("@{name}"))));
    b.get_local(value);
    b.leave();
    b.build()
}

fn compile_failure(ctx: &mut ExecutionContext, error: CompileError) -> Unwind {
    ctx.error(ctx.core.runtime_error, error.to_string())
}

// ============================================================================
// Constants
// ============================================================================

fn constant_name(ctx: &mut ExecutionContext, value: Value) -> VmResult<Symbol> {
    let name = expect_name(ctx, value)?;
    if !name.as_str().starts_with(|c: char| c.is_ascii_uppercase()) {
        return Err(ctx.error(ctx.core.name_error, format!("wrong constant name {name}")));
    }
    Ok(name)
}

fn const_get(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let name = constant_name(ctx, args.arg(0))?;
    let found = ctx
        .classes
        .const_get(class, name)
        .or_else(|| ctx.classes.const_get(ctx.core.object, name));
    match found {
        Some(value) => Ok(value),
        None if class == ctx.core.object => {
            Err(ctx.error(ctx.core.name_error, format!("uninitialized constant {name}")))
        }
        None => {
            let scope = ctx.class_name(class);
            Err(ctx.error(
                ctx.core.name_error,
                format!("uninitialized constant {scope}::{name}"),
            ))
        }
    }
}

fn const_set(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let name = constant_name(ctx, args.arg(0))?;
    let value = args.arg(1);
    ctx.const_set(class, name, value);
    Ok(value)
}

fn const_defined(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let name = constant_name(ctx, args.arg(0))?;
    Ok(Value::Bool(ctx.classes.const_get(class, name).is_some()))
}

fn constants(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let names = ctx.classes[class]
        .constants
        .keys()
        .copied()
        .map(Value::Symbol)
        .collect();
    Ok(ctx.new_array(names))
}

// ============================================================================
// Evaluating in class scope
// ============================================================================

fn class_eval(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let block = class_scoped_block(ctx, class, args.block)?;
    ctx.call_block(block, vec![recv], None)
}

fn class_exec(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let block = class_scoped_block(ctx, class, args.block)?;
    ctx.call_block(block, args.positional, None)
}

/// A copy of `block` running with `self` and the definition target set to
/// `class`.
fn class_scoped_block(
    ctx: &mut ExecutionContext,
    class: ClassId,
    block: Option<Value>,
) -> VmResult<Value> {
    let data = block.and_then(|b| ctx.heap.proc_data(b)).cloned();
    let Some(mut data) = data else {
        return Err(ctx.error(ctx.core.local_jump_error, "no block given (yield)"));
    };
    data.self_value = Value::Class(class);
    data.cref = class;
    Ok(ctx.new_proc(data))
}

// ============================================================================
// Class
// ============================================================================

/// `Class.new(superclass = Object) { }`, `Module.new { }`, or
/// allocate-and-initialize for any other class.
fn new(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    if class == ctx.core.class || class == ctx.core.module {
        return new_class(ctx, class == ctx.core.module, args);
    }
    let object = allocate_instance(ctx, class)?;
    let (forwarded, block) = forward(args);
    ctx.call_method(object, Symbol::intern("initialize"), forwarded, block)?;
    Ok(object)
}

fn new_class(ctx: &mut ExecutionContext, module: bool, args: NativeArgs) -> VmResult<Value> {
    let class = if module {
        ctx.classes.define(None, ClassKind::Module, None, None)
    } else {
        let superclass = match args.get(0) {
            None => ctx.core.object,
            Some(Value::Class(c)) if ctx.classes[c].kind == ClassKind::Class => c,
            Some(other) => {
                let given = ctx.describe_instance(other);
                return Err(ctx.type_error(format!(
                    "superclass must be an instance of Class (given {given})"
                )));
            }
        };
        ctx.classes
            .define(None, ClassKind::Class, Some(superclass), None)
    };
    if let Some(block) = args.block {
        let body = class_scoped_block(ctx, class, Some(block))?;
        ctx.call_block(body, vec![Value::Class(class)], None)?;
    }
    Ok(Value::Class(class))
}

fn allocate(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    allocate_instance(ctx, class)
}

fn allocate_instance(ctx: &mut ExecutionContext, class: ClassId) -> VmResult<Value> {
    let kind = match ctx.classes[class].alloc {
        AllocKind::Object => ObjectKind::Plain,
        AllocKind::String => ObjectKind::String(String::new()),
        AllocKind::Array => ObjectKind::Array(Vec::new()),
        AllocKind::Hash => ObjectKind::Hash(RHash::new()),
        AllocKind::Exception => ObjectKind::Exception(ExceptionData::default()),
        AllocKind::Undefined => {
            let shown = ctx.class_name(class);
            return Err(ctx.type_error(format!("allocator undefined for {shown}")));
        }
    };
    Ok(Value::Object(ctx.heap.alloc(class, kind)))
}

fn superclass(ctx: &mut ExecutionContext, recv: Value, _args: NativeArgs) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    Ok(ctx.classes[class]
        .superclass
        .map(Value::Class)
        .unwrap_or_default())
}

/// `A < B`: true for a proper subclass, false for a superclass or the class
/// itself, nil when unrelated.
fn lt(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    compare(ctx, recv, args.arg(0), false)
}

fn le(ctx: &mut ExecutionContext, recv: Value, args: NativeArgs) -> VmResult<Value> {
    compare(ctx, recv, args.arg(0), true)
}

fn compare(ctx: &mut ExecutionContext, recv: Value, other: Value, or_equal: bool) -> VmResult<Value> {
    let class = receiver_class(ctx, recv)?;
    let Value::Class(other) = other else {
        return Err(ctx.type_error("compared with non class/module"));
    };
    if class == other {
        return Ok(Value::Bool(or_equal));
    }
    if ctx.classes.inherits(class, other) {
        return Ok(Value::Bool(true));
    }
    if ctx.classes.inherits(other, class) {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Nil)
}

fn module_noun(ctx: &ExecutionContext, class: ClassId) -> &'static str {
    match ctx.classes[class].kind {
        ClassKind::Module => "module",
        _ => "class",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_named(ctx: &ExecutionContext, name: &str) -> Value {
        let object = ctx.core.object;
        ctx.classes[object].constants[&Symbol::intern(name)]
    }

    #[test]
    fn test_class_new_with_superclass() {
        let mut ctx = ExecutionContext::default();
        let error = class_named(&ctx, "StandardError");
        let class = ctx.funcall(class_named(&ctx, "Class"), "new", &[error]).unwrap();
        let Value::Class(id) = class else {
            panic!("expected a class, got {class:?}");
        };
        assert!(ctx.classes.inherits(id, ctx.core.standard_error));
        assert_eq!(ctx.funcall(class, "name", &[]).unwrap(), Value::Nil);
    }

    #[test]
    fn test_allocator_undefined() {
        let mut ctx = ExecutionContext::default();
        let integer = class_named(&ctx, "Integer");
        let result = ctx.funcall(integer, "new", &[]);
        let Err(Unwind::Raise(exception)) = result else {
            panic!("expected a raise, got {result:?}");
        };
        let report = ctx.exception_report(exception);
        assert_eq!(report.class, "TypeError");
        assert_eq!(report.message, "allocator undefined for Integer");
    }

    #[test]
    fn test_subclass_comparison() {
        let mut ctx = ExecutionContext::default();
        let integer = class_named(&ctx, "Integer");
        let numeric = class_named(&ctx, "Numeric");
        let string = class_named(&ctx, "String");
        assert_eq!(ctx.funcall(integer, "<", &[numeric]).unwrap(), Value::TRUE);
        assert_eq!(ctx.funcall(numeric, "<", &[integer]).unwrap(), Value::FALSE);
        assert_eq!(ctx.funcall(integer, "<", &[string]).unwrap(), Value::Nil);
        assert_eq!(ctx.funcall(integer, "<=", &[integer]).unwrap(), Value::TRUE);
    }

    #[test]
    fn test_cyclic_include_rejected() {
        let mut ctx = ExecutionContext::default();
        let module = class_named(&ctx, "Module");
        let m = ctx.funcall(module, "new", &[]).unwrap();
        let n = ctx.funcall(module, "new", &[]).unwrap();
        ctx.funcall(m, "include", &[n]).unwrap();
        let result = ctx.funcall(n, "include", &[m]);
        let Err(Unwind::Raise(exception)) = result else {
            panic!("expected a raise, got {result:?}");
        };
        let report = ctx.exception_report(exception);
        assert_eq!(report.class, "ArgumentError");
        assert_eq!(report.message, "cyclic include detected");
    }
}
