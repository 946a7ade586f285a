//! The execution context.
//!
//! An [`ExecutionContext`] owns every piece of interpreter state: the heap,
//! class table, global table, fibers (each with its frame stack) and the exit
//! handler queue. Native methods receive `&mut ExecutionContext`; the run
//! loop, binder glue and unwinder are implemented on it in [`crate::vm`].

use std::io::Write;
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use tracing::{debug, warn};

use super::class::ClassTable;
use super::environment::EnvStore;
use super::fiber::{FiberId, FiberTable};
use super::function::{FrameId, Keywords};
use super::globals::{GlobalEntry, GlobalTable, GlobalWrite};
use super::object::{ExceptionData, Heap, ObjectKind, RHash};
use super::symbol::Symbol;
use super::value::{ClassId, Value};
use crate::builtins::{self, CoreClasses};
use crate::config::VmConfig;
use crate::vm::{ArgumentHeap, Unwind, VmResult};

/// Host code run at teardown.
pub type NativeExitHandler = Box<dyn FnOnce(&mut ExecutionContext) -> VmResult<()> + Send>;

/// A registered exit handler.
pub enum ExitHandler {
    /// A Ruby block from `at_exit`
    Proc(Value),
    /// Host code
    Native(NativeExitHandler),
}

/// Exit handler queue, shareable with host threads.
///
/// Registration only needs `&self`, so a clone can be handed to code that
/// does not hold the context.
#[derive(Clone, Default)]
pub struct ExitHandlers(Arc<SegQueue<ExitHandler>>);

impl ExitHandlers {
    /// Appends a handler.
    pub fn register(&self, handler: ExitHandler) {
        self.0.push(handler);
    }

    /// Appends a host handler.
    pub fn register_native(
        &self,
        handler: impl FnOnce(&mut ExecutionContext) -> VmResult<()> + Send + 'static,
    ) {
        self.register(ExitHandler::Native(Box::new(handler)));
    }

    /// Number of handlers waiting to run.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no handler is waiting.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn pop(&self) -> Option<ExitHandler> {
        self.0.pop()
    }
}

/// A pending fiber switch requested by a native method.
#[derive(Debug, Clone, PartialEq)]
pub enum FiberSwitch {
    /// Transfer control into `target`
    Resume {
        /// Fiber to run
        target: FiberId,
        /// Block arguments on first resume; otherwise what `Fiber.yield` returns
        args: Vec<Value>,
    },
    /// Suspend the current fiber and return `value` to its resumer
    Yield {
        /// Value `resume` returns
        value: Value,
    },
}

/// An exception formatted for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    /// Class name
    pub class: String,
    /// Message
    pub message: String,
    /// Backtrace lines, innermost first
    pub backtrace: Vec<String>,
}

impl ExceptionReport {
    /// Formats the report the way an uncaught exception is printed.
    pub fn render(&self) -> String {
        let mut out = match self.backtrace.first() {
            Some(top) => format!("{top}: {} ({})\n", self.message, self.class),
            None => format!("{} ({})\n", self.message, self.class),
        };
        for line in self.backtrace.iter().skip(1) {
            out.push_str(&format!("\tfrom {line}\n"));
        }
        out
    }
}

/// All interpreter state for one session.
pub struct ExecutionContext {
    pub(crate) config: VmConfig,
    pub(crate) heap: Heap,
    pub(crate) envs: EnvStore,
    pub(crate) classes: ClassTable,
    pub(crate) core: CoreClasses,
    pub(crate) globals: GlobalTable,
    pub(crate) fibers: FiberTable,
    pub(crate) pending_switch: Option<FiberSwitch>,
    pub(crate) exit_handlers: ExitHandlers,
    pub(crate) main: Value,
    pub(crate) thread: Value,
    output: Box<dyn Write + Send>,
    next_frame_id: u64,
}

impl ExecutionContext {
    /// Creates a context with the core classes, natives and standard globals.
    pub fn new(config: VmConfig) -> Self {
        let mut classes = ClassTable::new();
        let core = builtins::define_core_classes(&mut classes);
        let mut context = Self {
            config,
            heap: Heap::new(),
            envs: EnvStore::new(),
            classes,
            core,
            globals: GlobalTable::new(),
            fibers: FiberTable::new(),
            pending_switch: None,
            exit_handlers: ExitHandlers::default(),
            main: Value::Nil,
            thread: Value::Nil,
            output: Box::new(std::io::stdout()),
            next_frame_id: 0,
        };
        context.main = Value::Object(context.heap.alloc(context.core.object, ObjectKind::Plain));
        context.thread = Value::Object(context.heap.alloc(context.core.thread, ObjectKind::Thread));
        builtins::install(&mut context);
        debug!("execution context ready");
        context
    }

    /// The configuration in effect.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The class table.
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Well-known classes.
    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The global variable table.
    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    /// All fibers.
    pub fn fibers(&self) -> &FiberTable {
        &self.fibers
    }

    /// The top-level `self`.
    pub fn main_object(&self) -> Value {
        self.main
    }

    /// Redirects `puts`/`p` output.
    pub fn set_output(&mut self, output: impl Write + Send + 'static) {
        self.output = Box::new(output);
    }

    /// Writes to the configured output, ignoring I/O failures.
    pub(crate) fn write_output(&mut self, text: &str) {
        let _ = self.output.write_all(text.as_bytes());
        let _ = self.output.flush();
    }

    pub(crate) fn next_frame_id(&mut self) -> FrameId {
        self.next_frame_id += 1;
        FrameId(self.next_frame_id)
    }

    /// Creates a String.
    pub fn new_string(&mut self, s: impl Into<String>) -> Value {
        Value::Object(self.heap.alloc(self.core.string, ObjectKind::String(s.into())))
    }

    /// Creates an Array.
    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.heap.alloc(self.core.array, ObjectKind::Array(items)))
    }

    /// Creates a Hash from `(key, value)` pairs, later keys winning.
    pub fn new_hash_from_pairs(&mut self, pairs: Vec<(Value, Value)>) -> Value {
        let mut hash = RHash::new();
        for (key, value) in pairs {
            hash.insert(self.heap.hash_key(key), key, value);
        }
        Value::Object(self.heap.alloc(self.core.hash, ObjectKind::Hash(hash)))
    }

    /// Creates an exception of `class` with a message; no backtrace yet.
    pub fn new_exception(&mut self, class: ClassId, message: &str) -> Value {
        let message = self.new_string(message);
        Value::Object(self.heap.alloc(
            class,
            ObjectKind::Exception(ExceptionData::with_message(message)),
        ))
    }

    /// Builds an exception of `class`, records the current backtrace and
    /// returns it ready to propagate with `?`.
    pub fn error(&mut self, class: ClassId, message: impl AsRef<str>) -> Unwind {
        let exception = self.new_exception(class, message.as_ref());
        self.prepare_raise(exception);
        Unwind::Raise(exception)
    }

    /// `ArgumentError` with `message`.
    pub fn argument_error(&mut self, message: impl AsRef<str>) -> Unwind {
        self.error(self.core.argument_error, message)
    }

    /// `TypeError` with `message`.
    pub fn type_error(&mut self, message: impl AsRef<str>) -> Unwind {
        self.error(self.core.type_error, message)
    }

    /// Fills in backtrace and cause of an exception about to be raised.
    pub(crate) fn prepare_raise(&mut self, exception: Value) {
        let backtrace = self.backtrace();
        let cause = self.fibers.current().errinfo;
        if let Some(data) = self.heap.exception_mut(exception) {
            if data.backtrace.is_none() {
                data.backtrace = Some(backtrace);
            }
            if data.cause.is_nil() && cause != exception {
                data.cause = cause;
            }
        }
    }

    /// Backtrace of the current fiber, innermost frame first.
    pub fn backtrace(&self) -> Vec<String> {
        self.fibers
            .current()
            .frames
            .iter()
            .rev()
            .map(|frame| frame.location())
            .collect()
    }

    /// Class of any value.
    pub fn class_of(&self, value: Value) -> ClassId {
        let core = &self.core;
        match value {
            Value::Nil => core.nil_class,
            Value::Bool(true) => core.true_class,
            Value::Bool(false) => core.false_class,
            Value::Integer(_) => core.integer,
            Value::Float(_) => core.float,
            Value::Symbol(_) => core.symbol,
            Value::Class(c) => match self.classes.get(c).map(|r| r.kind) {
                Some(super::class::ClassKind::Module) => core.module,
                _ => core.class,
            },
            Value::Object(r) => self.heap.get(r).map_or(core.object, |o| o.class),
        }
    }

    /// Name of a class.
    pub fn class_name(&self, class: ClassId) -> String {
        self.classes.name(class)
    }

    /// `value.is_a?(class)`.
    pub fn is_a(&self, value: Value, class: ClassId) -> bool {
        if let Value::Class(c) = value {
            if let Some(meta) = self.classes[c].meta {
                if self.classes.inherits(meta, class) {
                    return true;
                }
            }
        }
        self.classes.inherits(self.class_of(value), class)
    }

    /// Class name, message and backtrace of an exception, without calling
    /// Ruby code.
    pub fn exception_report(&self, exception: Value) -> ExceptionReport {
        let class = self.class_name(self.class_of(exception));
        let data = self.heap.exception(exception);
        let message = data
            .and_then(|d| self.heap.str(d.message).map(str::to_owned))
            .unwrap_or_else(|| class.clone());
        let backtrace = data.and_then(|d| d.backtrace.clone()).unwrap_or_default();
        ExceptionReport {
            class,
            message,
            backtrace,
        }
    }

    /// Reads a global, running its getter if it is virtual.
    pub fn global_get(&self, name: Symbol) -> Value {
        match self.globals.lookup(name) {
            Some(GlobalEntry::Cell(cell)) => cell.value,
            Some(GlobalEntry::Virtual(hooks)) => (hooks.getter)(self),
            None => Value::Nil,
        }
    }

    /// Assigns a global, running its setter if it is virtual.
    pub fn global_set(&mut self, name: Symbol, value: Value) -> VmResult<()> {
        match self.globals.set(name, value) {
            Ok(()) => Ok(()),
            Err(GlobalWrite::Hook(setter)) => setter(self, value),
            Err(GlobalWrite::ReadOnly) => {
                Err(self.error(self.core.name_error, format!("{name} is a read-only variable")))
            }
        }
    }

    /// `alias $new $old`.
    pub fn global_alias(&mut self, new_name: Symbol, existing: Symbol) {
        self.globals.alias(new_name, existing);
    }

    /// Installs a virtual global.
    pub fn define_virtual_global(
        &mut self,
        name: &str,
        getter: super::globals::VirtualGetter,
        setter: Option<super::globals::VirtualSetter>,
    ) {
        self.globals.define_virtual(Symbol::intern(name), getter, setter);
    }

    /// Id of the running fiber.
    pub fn current_fiber(&self) -> FiberId {
        self.fibers.current_id()
    }

    /// Reads the running fiber's local `key`.
    pub fn fiber_local(&self, key: Symbol) -> Value {
        self.fibers.current().local(key)
    }

    /// Writes the running fiber's local `key`.
    pub fn set_fiber_local(&mut self, key: Symbol, value: Value) {
        self.fibers.current_mut().set_local(key, value);
    }

    /// The exception being handled by the running fiber (`$!`).
    pub fn current_exception(&self) -> Value {
        self.fibers.current().errinfo
    }

    /// Handle for registering exit handlers without holding the context.
    pub fn exit_handlers(&self) -> ExitHandlers {
        self.exit_handlers.clone()
    }

    /// Registers host code to run at teardown.
    pub fn register_exit_handler(
        &self,
        handler: impl FnOnce(&mut ExecutionContext) -> VmResult<()> + Send + 'static,
    ) {
        self.exit_handlers.register_native(handler);
    }

    /// Runs exit handlers in registration order, including handlers
    /// registered while they run. A failing handler is reported and the rest
    /// still run; the failures are returned.
    pub fn run_exit_handlers(&mut self) -> Vec<ExceptionReport> {
        let mut failures = Vec::new();
        while let Some(handler) = self.exit_handlers.pop() {
            let result = match handler {
                ExitHandler::Proc(block) => self.call_block(block, Vec::new(), None).map(|_| ()),
                ExitHandler::Native(f) => f(self),
            };
            let failure = match result {
                Ok(()) => continue,
                Err(Unwind::Raise(exception)) => self.exception_report(exception),
                Err(other) => ExceptionReport {
                    class: "LocalJumpError".to_string(),
                    message: format!("unexpected {other:?} in exit handler"),
                    backtrace: Vec::new(),
                },
            };
            warn!(class = %failure.class, message = %failure.message, "exit handler failed");
            if self.config.report_unhandled {
                eprint!("{}", failure.render());
            }
            failures.push(failure);
        }
        failures
    }
}

impl ArgumentHeap for ExecutionContext {
    fn new_array(&mut self, items: Vec<Value>) -> Value {
        ExecutionContext::new_array(self, items)
    }

    fn new_hash(&mut self, entries: Keywords) -> Value {
        let mut hash = RHash::new();
        for (key, (key_value, value)) in entries {
            hash.insert(key, key_value, value);
        }
        Value::Object(self.heap.alloc(self.core.hash, ObjectKind::Hash(hash)))
    }

    fn array_items(&self, value: Value) -> Option<Vec<Value>> {
        self.heap.array(value).cloned()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}
