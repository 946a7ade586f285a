//! Core classes and their native methods.
//!
//! [`define_core_classes`] lays out the class hierarchy before the context
//! exists; [`install`] then registers native methods, the interpreted
//! prelude and the standard globals.
//!
//! ## Structure
//!
//! - `kernel` - raise, catch/throw, at_exit, proc/lambda, block_given?
//! - `console` - puts, print, p
//! - `object` - BasicObject and Object
//! - `boolean` - nil, true and false
//! - `module` - Module and Class
//! - `error` - Exception and its subclasses
//! - `number` - Integer and Float
//! - `string` - String and Symbol
//! - `array`, `hash` - collections
//! - `proc` - Proc
//! - `fiber` - Fiber and Thread
//! - `global` - standard global variables
//! - `prelude` - iterators written against the instruction set so that
//!   `Fiber.yield` works inside their blocks

pub mod array;
pub mod boolean;
pub mod console;
pub mod error;
pub mod fiber;
pub mod global;
pub mod hash;
pub mod kernel;
pub mod module;
pub mod number;
pub mod object;
pub mod prelude;
pub mod proc;
pub mod string;

use tracing::error;

use crate::runtime::class::{AllocKind, ClassKind, ClassTable};
use crate::runtime::context::ExecutionContext;
use crate::runtime::function::{NativeArgs, NativeMethod};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{ClassId, Value};
use crate::vm::{Arg, VmResult};

/// Handles to the classes the engine refers to directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreClasses {
    pub basic_object: ClassId,
    pub object: ClassId,
    pub kernel: ClassId,
    pub module: ClassId,
    pub class: ClassId,
    pub nil_class: ClassId,
    pub true_class: ClassId,
    pub false_class: ClassId,
    pub numeric: ClassId,
    pub integer: ClassId,
    pub float: ClassId,
    pub string: ClassId,
    pub symbol: ClassId,
    pub array: ClassId,
    pub hash: ClassId,
    pub proc: ClassId,
    pub fiber: ClassId,
    pub thread: ClassId,

    pub exception: ClassId,
    pub script_error: ClassId,
    pub load_error: ClassId,
    pub not_implemented_error: ClassId,
    pub system_stack_error: ClassId,
    pub standard_error: ClassId,
    pub runtime_error: ClassId,
    pub frozen_error: ClassId,
    pub argument_error: ClassId,
    pub uncaught_throw_error: ClassId,
    pub type_error: ClassId,
    pub name_error: ClassId,
    pub no_method_error: ClassId,
    pub local_jump_error: ClassId,
    pub fiber_error: ClassId,
    pub index_error: ClassId,
    pub key_error: ClassId,
    pub stop_iteration: ClassId,
    pub range_error: ClassId,
    pub zero_division_error: ClassId,
}

struct Bootstrap<'a> {
    classes: &'a mut ClassTable,
    defined: Vec<ClassId>,
}

impl Bootstrap<'_> {
    fn class(&mut self, name: &str, superclass: Option<ClassId>, alloc: Option<AllocKind>) -> ClassId {
        let id = self
            .classes
            .define(Some(name.to_string()), ClassKind::Class, superclass, alloc);
        self.defined.push(id);
        id
    }

    fn module(&mut self, name: &str) -> ClassId {
        let id = self
            .classes
            .define(Some(name.to_string()), ClassKind::Module, None, None);
        self.defined.push(id);
        id
    }
}

/// Creates the core hierarchy and binds every core class as a constant of
/// `Object`.
pub fn define_core_classes(classes: &mut ClassTable) -> CoreClasses {
    use AllocKind::{Array, Exception, Hash, Undefined};

    let mut b = Bootstrap {
        classes,
        defined: Vec::new(),
    };

    let basic_object = b.class("BasicObject", None, Some(AllocKind::Object));
    let object = b.class("Object", Some(basic_object), None);
    let kernel = b.module("Kernel");
    if let Err(err) = b.classes.include(object, kernel) {
        error!(error = %err, "could not include Kernel into Object");
    }
    let module = b.class("Module", Some(object), Some(Undefined));
    let class = b.class("Class", Some(module), None);

    let exception = b.class("Exception", Some(object), Some(Exception));
    let script_error = b.class("ScriptError", Some(exception), None);
    let standard_error = b.class("StandardError", Some(exception), None);
    let runtime_error = b.class("RuntimeError", Some(standard_error), None);
    let argument_error = b.class("ArgumentError", Some(standard_error), None);
    let index_error = b.class("IndexError", Some(standard_error), None);
    let name_error = b.class("NameError", Some(standard_error), None);
    let range_error = b.class("RangeError", Some(standard_error), None);
    let numeric = b.class("Numeric", Some(object), Some(Undefined));

    let core = CoreClasses {
        basic_object,
        object,
        kernel,
        module,
        class,
        nil_class: b.class("NilClass", Some(object), Some(Undefined)),
        true_class: b.class("TrueClass", Some(object), Some(Undefined)),
        false_class: b.class("FalseClass", Some(object), Some(Undefined)),
        numeric,
        integer: b.class("Integer", Some(numeric), None),
        float: b.class("Float", Some(numeric), None),
        string: b.class("String", Some(object), Some(AllocKind::String)),
        symbol: b.class("Symbol", Some(object), Some(Undefined)),
        array: b.class("Array", Some(object), Some(Array)),
        hash: b.class("Hash", Some(object), Some(Hash)),
        proc: b.class("Proc", Some(object), Some(Undefined)),
        fiber: b.class("Fiber", Some(object), Some(Undefined)),
        thread: b.class("Thread", Some(object), Some(Undefined)),

        exception,
        script_error,
        load_error: b.class("LoadError", Some(script_error), None),
        not_implemented_error: b.class("NotImplementedError", Some(script_error), None),
        system_stack_error: b.class("SystemStackError", Some(exception), None),
        standard_error,
        runtime_error,
        frozen_error: b.class("FrozenError", Some(runtime_error), None),
        argument_error,
        uncaught_throw_error: b.class("UncaughtThrowError", Some(argument_error), None),
        type_error: b.class("TypeError", Some(standard_error), None),
        name_error,
        no_method_error: b.class("NoMethodError", Some(name_error), None),
        local_jump_error: b.class("LocalJumpError", Some(standard_error), None),
        fiber_error: b.class("FiberError", Some(standard_error), None),
        index_error,
        key_error: b.class("KeyError", Some(index_error), None),
        stop_iteration: b.class("StopIteration", Some(index_error), None),
        range_error,
        zero_division_error: b.class("ZeroDivisionError", Some(standard_error), None),
    };

    for id in b.defined {
        let name = Symbol::intern(&b.classes.name(id));
        b.classes[object].constants.insert(name, Value::Class(id));
    }
    core
}

/// Registers natives, the prelude and standard globals.
pub(crate) fn install(ctx: &mut ExecutionContext) {
    kernel::install(ctx);
    console::install(ctx);
    object::install(ctx);
    boolean::install(ctx);
    module::install(ctx);
    error::install(ctx);
    number::install(ctx);
    string::install(ctx);
    array::install(ctx);
    hash::install(ctx);
    proc::install(ctx);
    fiber::install(ctx);
    global::install(ctx);
    prelude::install(ctx);
}

/// Adds each of `methods` to `owner`.
pub(crate) fn define_methods(ctx: &mut ExecutionContext, owner: ClassId, methods: &[NativeMethod]) {
    for method in methods {
        ctx.define_native(owner, *method);
    }
}

/// Adds each of `methods` to the singleton class of `owner`.
pub(crate) fn define_singleton_methods(
    ctx: &mut ExecutionContext,
    owner: ClassId,
    methods: &[NativeMethod],
) {
    for method in methods {
        ctx.define_singleton_native(owner, *method);
    }
}

/// Turns a native's bound arguments back into call arguments, for natives
/// that pass everything on (`send`, `new`, `Proc#call`).
pub(crate) fn forward(args: NativeArgs) -> (Vec<Arg>, Option<Value>) {
    let NativeArgs {
        positional,
        keywords,
        block,
    } = args;
    let mut forwarded: Vec<Arg> = positional.into_iter().map(Arg::Positional).collect();
    if !keywords.is_empty() {
        let entries = keywords.into_iter().map(|(k, (kv, v))| (k, kv, v)).collect();
        forwarded.push(Arg::KwSplat(entries));
    }
    (forwarded, block)
}

/// A method name given as a Symbol or String.
pub(crate) fn expect_name(ctx: &mut ExecutionContext, value: Value) -> VmResult<Symbol> {
    if let Value::Symbol(name) = value {
        return Ok(name);
    }
    if let Some(s) = ctx.heap.str(value) {
        return Ok(Symbol::intern(s));
    }
    let shown = ctx.inspect(value)?;
    Err(ctx.type_error(format!("{shown} is not a symbol nor a string")))
}

/// An Integer argument.
pub(crate) fn expect_integer(ctx: &mut ExecutionContext, value: Value) -> VmResult<i64> {
    match value {
        Value::Integer(n) => Ok(n),
        _ => {
            let given = ctx.type_name(value);
            Err(ctx.type_error(format!("no implicit conversion of {given} into Integer")))
        }
    }
}

/// A String argument's contents.
pub(crate) fn expect_string(ctx: &mut ExecutionContext, value: Value) -> VmResult<String> {
    match ctx.heap.str(value) {
        Some(s) => Ok(s.to_owned()),
        None => {
            let given = ctx.type_name(value);
            Err(ctx.type_error(format!("no implicit conversion of {given} into String")))
        }
    }
}

/// A Class or Module argument.
pub(crate) fn expect_class(ctx: &mut ExecutionContext, value: Value) -> VmResult<ClassId> {
    match value {
        Value::Class(class) => Ok(class),
        _ => Err(ctx.type_error("class or module required")),
    }
}
