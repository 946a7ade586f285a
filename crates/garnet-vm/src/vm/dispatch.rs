//! Method lookup and call setup.
//!
//! Call sites, `super`, `yield` and native re-entry all end up in
//! [`ExecutionContext::invoke`]: natives run immediately against arguments
//! bound by [`bind_native`]; interpreted bodies get a frame whose locals come
//! from [`bind`], and default expressions run as fragment frames before the
//! body starts.

use std::sync::Arc;

use tracing::trace;

use super::binder::{bind, bind_native};
use super::interpreter::Flow;
use super::{Arg, BindError, BindMode, Unwind, VmResult};
use crate::compiler::{ArgTag, BlockArg, CallInfo, Iseq};
use crate::runtime::class::ClassKind;
use crate::runtime::context::ExecutionContext;
use crate::runtime::environment::EnvRef;
use crate::runtime::function::{
    ForwardedArgs, FrameKind, MethodBody, MethodContext, MethodEntry, NativeArgs, NativeMethod,
};
use crate::runtime::object::{ExceptionDetail, HashKey, ObjectKind, ProcData};
use crate::runtime::params::DefaultExpr;
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{ClassId, Value};

/// Outcome of starting a call.
pub(crate) enum Invoked {
    /// An interpreted frame was pushed
    Pushed,
    /// A native ran to completion
    Returned(Value),
}

impl ExecutionContext {
    /// Looks `name` up along the method resolution order of `receiver`.
    pub fn find_method(&self, receiver: Value, name: Symbol) -> Option<MethodEntry> {
        match receiver {
            Value::Class(class) => {
                let order = self.classes.singleton_ancestors(class, self.class_of(receiver));
                self.classes.find_method(&order, name).map(|(_, e)| e.clone())
            }
            _ => {
                let class = self.class_of(receiver);
                self.classes
                    .find_method(&self.classes[class].ancestors, name)
                    .map(|(_, e)| e.clone())
            }
        }
    }

    /// Whether `receiver` has a method called `name`.
    pub fn respond_to(&self, receiver: Value, name: Symbol) -> bool {
        self.find_method(receiver, name).is_some()
    }

    /// Calls `receiver.name(*args, &block)` and runs it to completion.
    pub fn call_method(
        &mut self,
        receiver: Value,
        name: Symbol,
        args: Vec<Arg>,
        block: Option<Value>,
    ) -> VmResult<Value> {
        let Some(entry) = self.find_method(receiver, name) else {
            return Err(self.no_method_error(receiver, name, false, !args.is_empty()));
        };
        let boundary = self.boundary();
        match self.invoke(receiver, entry, args, block)? {
            Invoked::Pushed => self.run(boundary),
            Invoked::Returned(value) => {
                if self.pending_switch.take().is_some() {
                    return Err(self.error(
                        self.core.fiber_error,
                        "can't switch fibers across a native method call",
                    ));
                }
                Ok(value)
            }
        }
    }

    /// Like [`call_method`](Self::call_method), but a fiber switch requested
    /// by a native callee stays pending for the interpreted call site that
    /// reached the calling native (`send`, `public_send`).
    pub(crate) fn relay_call(
        &mut self,
        receiver: Value,
        name: Symbol,
        args: Vec<Arg>,
        block: Option<Value>,
    ) -> VmResult<Value> {
        let Some(entry) = self.find_method(receiver, name) else {
            return Err(self.no_method_error(receiver, name, false, !args.is_empty()));
        };
        let boundary = self.boundary();
        match self.invoke(receiver, entry, args, block)? {
            Invoked::Pushed => self.run(boundary),
            Invoked::Returned(value) => Ok(value),
        }
    }

    /// `receiver.name(*args)` with positional arguments only.
    pub fn funcall(&mut self, receiver: Value, name: &str, args: &[Value]) -> VmResult<Value> {
        let args = args.iter().copied().map(Arg::Positional).collect();
        self.call_method(receiver, Symbol::intern(name), args, None)
    }

    /// Calls a block or lambda and runs it to completion.
    pub fn call_block(
        &mut self,
        block: Value,
        args: Vec<Value>,
        block_arg: Option<Value>,
    ) -> VmResult<Value> {
        let args = args.into_iter().map(Arg::Positional).collect();
        self.call_block_with(block, args, block_arg)
    }

    /// Like [`call_block`](Self::call_block) with splats and keywords.
    pub fn call_block_with(
        &mut self,
        block: Value,
        args: Vec<Arg>,
        block_arg: Option<Value>,
    ) -> VmResult<Value> {
        let boundary = self.boundary();
        self.push_block_frame(block, args, block_arg)?;
        self.run(boundary)
    }

    /// Starts a call to `entry`. Natives run to completion; interpreted
    /// methods are left pushed for the run loop.
    pub(crate) fn invoke(
        &mut self,
        receiver: Value,
        entry: MethodEntry,
        args: Vec<Arg>,
        block: Option<Value>,
    ) -> VmResult<Invoked> {
        match entry.body {
            MethodBody::Native(native) => {
                let (positional, keywords) =
                    bind_native(args, &native.arity, self).map_err(|e| self.bind_error(e))?;
                trace!(method = native.name, "native call");
                let args = NativeArgs {
                    positional,
                    keywords,
                    block,
                };
                let value = (native.func)(self, receiver, args)?;
                Ok(Invoked::Returned(value))
            }
            MethodBody::Iseq(iseq) => {
                let context = MethodContext {
                    name: entry.original_name,
                    owner: entry.owner,
                };
                self.push_method_frame(receiver, iseq, context, entry.cref, args, block)?;
                Ok(Invoked::Pushed)
            }
        }
    }

    fn push_method_frame(
        &mut self,
        receiver: Value,
        iseq: Arc<Iseq>,
        context: MethodContext,
        cref: ClassId,
        args: Vec<Arg>,
        block: Option<Value>,
    ) -> VmResult<()> {
        let binding = bind(args, block, &iseq.params, BindMode::Strict, self)
            .map_err(|e| self.bind_error(e))?;
        let env = self.envs.alloc(iseq.local_count(), None);
        for (slot, value) in binding.locals {
            self.envs.write(env, slot, 0, value);
        }
        let mut frame = self.new_frame(FrameKind::Method, Arc::clone(&iseq), env, receiver, cref);
        frame.method = Some(context);
        frame.block = block;
        frame.forwarded = iseq.params.forward().map(|slots| ForwardedArgs { env, slots });
        self.push_frame(frame)?;
        self.run_defaults(&iseq, env, binding.defaults)
    }

    /// Pushes a frame running `block` with `args`.
    pub(crate) fn push_block_frame(
        &mut self,
        block: Value,
        args: Vec<Arg>,
        block_arg: Option<Value>,
    ) -> VmResult<()> {
        let Some(data) = self.heap.proc_data(block).cloned() else {
            let given = self.type_name(block);
            return Err(self.type_error(format!("wrong argument type {given} (expected Proc)")));
        };
        let mode = if data.lambda {
            BindMode::Strict
        } else {
            BindMode::Proc
        };
        let binding = bind(args, block_arg, &data.iseq.params, mode, self)
            .map_err(|e| self.bind_error(e))?;
        let env = self.envs.alloc(data.iseq.local_count(), Some(data.env));
        for (slot, value) in binding.locals {
            self.envs.write(env, slot, 0, value);
        }
        let kind = FrameKind::Block {
            creator: data.creator,
            home: data.home,
            lambda: data.lambda,
        };
        let mut frame =
            self.new_frame(kind, Arc::clone(&data.iseq), env, data.self_value, data.cref);
        frame.method = data.method;
        frame.block = data.method_block;
        frame.forwarded = data.forwarded;
        self.push_frame(frame)?;
        self.run_defaults(&data.iseq, env, binding.defaults)
    }

    /// Evaluates unfilled optional parameters in order, inside the frame
    /// just pushed. On failure that frame is discarded.
    fn run_defaults(
        &mut self,
        iseq: &Iseq,
        env: EnvRef,
        defaults: Vec<(u32, DefaultExpr)>,
    ) -> VmResult<()> {
        if defaults.is_empty() {
            return Ok(());
        }
        let frame = self.frame()?;
        let (self_value, cref, method, block, forwarded) =
            (frame.self_value, frame.cref, frame.method, frame.block, frame.forwarded);
        for (slot, index) in defaults {
            let Some(fragment) = iseq.children.get(index).cloned() else {
                let error = self.malformed("default expression index out of range");
                self.pop_frame();
                return Err(error);
            };
            let mut frame = self.new_frame(FrameKind::Fragment, fragment, env, self_value, cref);
            frame.owns_env = false;
            frame.method = method;
            frame.block = block;
            frame.forwarded = forwarded;
            match self.execute(frame) {
                Ok(value) => {
                    self.envs.write(env, slot, 0, value);
                }
                Err(unwind) => {
                    self.pop_frame();
                    return Err(unwind);
                }
            }
        }
        Ok(())
    }

    /// `Send`
    pub(crate) fn exec_send(&mut self, call: &CallInfo) -> VmResult<Flow> {
        let (args, block) = self.collect_arguments(call)?;
        let receiver = self.pop()?;
        let Some(entry) = self.find_method(receiver, call.method) else {
            return Err(self.no_method_error(receiver, call.method, call.fcall, !args.is_empty()));
        };
        let invoked = self.invoke(receiver, entry, args, block)?;
        self.finish_call(invoked)
    }

    /// `InvokeSuper`; without an explicit block the method's own block is
    /// passed along.
    pub(crate) fn exec_super(&mut self, call: &CallInfo) -> VmResult<Flow> {
        let (args, block) = self.collect_arguments(call)?;
        let block = match (block, call.block) {
            (None, BlockArg::None) => self.frame()?.block,
            (block, _) => block,
        };
        self.dispatch_super(args, block)
    }

    /// `ZSuper`: re-passes the current values of the method's parameters.
    pub(crate) fn exec_zsuper(&mut self) -> VmResult<Flow> {
        let frame = self.frame()?;
        let (kind, block) = (frame.kind, frame.block);
        let method_frame = match kind {
            FrameKind::Method => Some((Arc::clone(&frame.iseq), frame.env)),
            FrameKind::Block { home: Some(home), .. } => self
                .fibers
                .current()
                .frames
                .iter()
                .rev()
                .find(|f| f.id == home)
                .map(|f| (Arc::clone(&f.iseq), f.env)),
            _ => None,
        };
        let Some((iseq, env)) = method_frame else {
            return Err(self.error(
                self.core.runtime_error,
                "implicit argument passing of super is only supported inside a method",
            ));
        };
        let args = self.zsuper_arguments(&iseq, env);
        self.dispatch_super(args, block)
    }

    fn zsuper_arguments(&self, iseq: &Iseq, env: EnvRef) -> Vec<Arg> {
        let read = |slot: u32| self.envs.read(env, slot, 0).unwrap_or_default();
        let spec = &iseq.params;
        let mut args = Vec::new();
        args.extend(spec.lead().map(|p| Arg::Positional(read(p.slot))));
        args.extend(spec.optional().map(|p| Arg::Positional(read(p.slot))));
        if let Some(rest) = spec.rest() {
            let items = self.heap.array(read(rest.slot)).cloned().unwrap_or_default();
            args.push(Arg::Splat(items));
        }
        args.extend(spec.post().map(|p| Arg::Positional(read(p.slot))));
        args.extend(spec.keywords().map(|p| Arg::Keyword(p.name, read(p.slot))));
        if let Some(keyword_rest) = spec.keyword_rest() {
            args.push(Arg::KwSplat(self.hash_entries(read(keyword_rest.slot))));
        }
        args
    }

    fn dispatch_super(&mut self, args: Vec<Arg>, block: Option<Value>) -> VmResult<Flow> {
        let frame = self.frame()?;
        let receiver = frame.self_value;
        let Some(context) = frame.method else {
            return Err(self.error(self.core.runtime_error, "super called outside of method"));
        };
        let order = self.dispatch_order(receiver);
        let found = self
            .classes
            .find_super_method(&order, context.owner, context.name)
            .map(|(_, e)| e.clone());
        let Some(entry) = found else {
            let target = self.describe_receiver(receiver);
            return Err(self.error(
                self.core.no_method_error,
                format!("super: no superclass method '{}' for {target}", context.name),
            ));
        };
        let invoked = self.invoke(receiver, entry, args, block)?;
        self.finish_call(invoked)
    }

    /// `Yield`
    pub(crate) fn exec_yield(&mut self, call: &CallInfo) -> VmResult<Flow> {
        let (args, _) = self.collect_arguments(call)?;
        let Some(block) = self.frame()?.block else {
            return Err(self.error(self.core.local_jump_error, "no block given (yield)"));
        };
        self.push_block_frame(block, args, None)?;
        Ok(Flow::Continue)
    }

    /// Pushes a native's result, or carries out the fiber switch it asked for.
    fn finish_call(&mut self, invoked: Invoked) -> VmResult<Flow> {
        if let Invoked::Returned(value) = invoked {
            match self.pending_switch.take() {
                Some(switch) => self.perform_switch(switch)?,
                None => self.push(value),
            }
        }
        Ok(Flow::Continue)
    }

    /// Pops a call's operands and turns them into binder arguments plus the
    /// block to pass.
    fn collect_arguments(&mut self, call: &CallInfo) -> VmResult<(Vec<Arg>, Option<Value>)> {
        let block_operand = match call.block {
            BlockArg::Value => Some(self.pop()?),
            _ => None,
        };
        let count = call.operand_count() - usize::from(block_operand.is_some());
        let mut operands = self.pop_n(count)?.into_iter();
        let mut args = Vec::with_capacity(call.args.len());
        let mut forwarded_block = None;
        for tag in &call.args {
            match tag {
                ArgTag::Positional => args.push(Arg::Positional(operands.next().unwrap_or_default())),
                ArgTag::Splat => {
                    let items = self.splat_items(operands.next().unwrap_or_default());
                    args.push(Arg::Splat(items));
                }
                ArgTag::Keyword(name) => {
                    args.push(Arg::Keyword(*name, operands.next().unwrap_or_default()));
                }
                ArgTag::KwSplat => {
                    let entries = self.kwsplat_entries(operands.next().unwrap_or_default())?;
                    args.push(Arg::KwSplat(entries));
                }
                ArgTag::Forward => {
                    let (forwarded, block) = self.forwarded_arguments()?;
                    args.extend(forwarded);
                    forwarded_block = block;
                }
            }
        }

        let block = match call.block {
            BlockArg::None => forwarded_block,
            BlockArg::Literal(index) => Some(self.make_block(index)?),
            BlockArg::Value => match block_operand {
                None | Some(Value::Nil) => None,
                Some(value) if self.heap.proc_data(value).is_some() => Some(value),
                Some(other) => {
                    let given = self.type_name(other);
                    return Err(
                        self.type_error(format!("wrong argument type {given} (expected Proc)"))
                    );
                }
            },
        };
        Ok((args, block))
    }

    /// Expands `...` into the enclosing method's rest, keyword rest and block.
    fn forwarded_arguments(&mut self) -> VmResult<(Vec<Arg>, Option<Value>)> {
        let Some(forwarded) = self.frame()?.forwarded else {
            return Err(self.bind_error(BindError::NotForwardable));
        };
        let read = |slot: u32| self.envs.read(forwarded.env, slot, 0).unwrap_or_default();
        let rest = read(forwarded.slots.rest);
        let keyword_rest = read(forwarded.slots.keyword_rest);
        let block = read(forwarded.slots.block);
        let items = self.heap.array(rest).cloned().unwrap_or_default();
        let entries = self.hash_entries(keyword_rest);
        let block = (!block.is_nil()).then_some(block);
        Ok((vec![Arg::Splat(items), Arg::KwSplat(entries)], block))
    }

    fn splat_items(&self, value: Value) -> Vec<Value> {
        match self.heap.array(value) {
            Some(items) => items.clone(),
            None if value.is_nil() => Vec::new(),
            None => vec![value],
        }
    }

    fn kwsplat_entries(&mut self, value: Value) -> VmResult<Vec<(HashKey, Value, Value)>> {
        if value.is_nil() || self.heap.hash(value).is_some() {
            return Ok(self.hash_entries(value));
        }
        let given = self.type_name(value);
        Err(self.type_error(format!("no implicit conversion of {given} into Hash")))
    }

    /// Entries of a Hash value, empty for anything else.
    pub(crate) fn hash_entries(&self, value: Value) -> Vec<(HashKey, Value, Value)> {
        self.heap
            .hash(value)
            .map(|h| h.entries().map(|(k, kv, v)| (k.clone(), kv, v)).collect())
            .unwrap_or_default()
    }

    /// Creates the Proc for literal block `index` of the running frame,
    /// capturing the frame's env.
    fn make_block(&mut self, index: usize) -> VmResult<Value> {
        let frame = self.frame()?;
        let Some(iseq) = frame.iseq.children.get(index).cloned() else {
            return Err(self.malformed("block index out of range"));
        };
        let home = match frame.kind {
            FrameKind::Method | FrameKind::Block { lambda: true, .. } => Some(frame.id),
            FrameKind::Block { home, .. } => home,
            FrameKind::Top | FrameKind::Class | FrameKind::Fragment => None,
        };
        let data = ProcData {
            iseq,
            env: frame.env,
            self_value: frame.self_value,
            cref: frame.cref,
            creator: frame.id,
            home,
            method: frame.method,
            method_block: frame.block,
            forwarded: frame.forwarded,
            lambda: false,
        };
        self.envs.capture(data.env);
        Ok(self.new_proc(data))
    }

    /// Wraps closure data in a Proc object.
    pub(crate) fn new_proc(&mut self, data: ProcData) -> Value {
        Value::Object(self.heap.alloc(self.core.proc, ObjectKind::Proc(data)))
    }

    /// Turns a binder failure into a raised `ArgumentError`.
    pub(crate) fn bind_error(&mut self, error: BindError) -> Unwind {
        let exception = self.new_exception(self.core.argument_error, &error.to_string());
        if let BindError::MissingKeywords(names) = error {
            if let Some(data) = self.heap.exception_mut(exception) {
                data.detail = ExceptionDetail::MissingKeywords(names);
            }
        }
        self.prepare_raise(exception);
        Unwind::Raise(exception)
    }

    /// `NoMethodError`, or `NameError` for a bare identifier that could have
    /// been a local variable.
    pub(crate) fn no_method_error(
        &mut self,
        receiver: Value,
        name: Symbol,
        fcall: bool,
        has_args: bool,
    ) -> Unwind {
        let target = self.describe_receiver(receiver);
        if fcall && !has_args {
            return self.error(
                self.core.name_error,
                format!("undefined local variable or method '{name}' for {target}"),
            );
        }
        self.error(
            self.core.no_method_error,
            format!("undefined method '{name}' for {target}"),
        )
    }

    fn dispatch_order(&self, receiver: Value) -> Vec<ClassId> {
        match receiver {
            Value::Class(class) => self.classes.singleton_ancestors(class, self.class_of(receiver)),
            _ => self.classes[self.class_of(receiver)].ancestors.clone(),
        }
    }

    /// The class `obj.class` reports, skipping singleton classes.
    pub fn real_class(&self, mut class: ClassId) -> ClassId {
        while self.classes[class].kind == ClassKind::Singleton {
            match self.classes[class].superclass {
                Some(superclass) => class = superclass,
                None => break,
            }
        }
        class
    }

    /// How error messages name a receiver: `nil`, `main:Object`,
    /// `class Foo`, `an instance of Foo`.
    pub(crate) fn describe_receiver(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Class(class) if self.classes[class].kind == ClassKind::Module => {
                format!("module {}", self.class_name(class))
            }
            Value::Class(class) => format!("class {}", self.class_name(class)),
            _ if value == self.main => "main:Object".to_string(),
            _ => self.describe_instance(value),
        }
    }

    /// `an instance of Foo`
    pub(crate) fn describe_instance(&self, value: Value) -> String {
        let class = self.real_class(self.class_of(value));
        format!("an instance of {}", self.class_name(class))
    }

    /// Class name used in `TypeError` messages, `nil`/`true`/`false` for the
    /// special constants.
    pub(crate) fn type_name(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            _ => self.class_name(self.real_class(self.class_of(value))),
        }
    }

    /// The singleton class of `value`, created on first use.
    pub(crate) fn singleton_class_of(&mut self, value: Value) -> VmResult<ClassId> {
        match value {
            Value::Class(class) => Ok(self.classes.singleton_class(class)),
            Value::Object(obj) => {
                let class = self.class_of(value);
                if self.classes[class].kind == ClassKind::Singleton {
                    return Ok(class);
                }
                let name = format!("#<Class:#<{}>>", self.class_name(class));
                let meta = self
                    .classes
                    .define(Some(name), ClassKind::Singleton, Some(class), None);
                if let Some(object) = self.heap.get_mut(obj) {
                    object.class = meta;
                }
                Ok(meta)
            }
            _ => Err(self.type_error("can't define singleton")),
        }
    }

    /// Reads an instance variable; nil when unset.
    pub fn ivar_get(&self, receiver: Value, name: Symbol) -> Value {
        let value = match receiver {
            Value::Object(obj) => self.heap.get(obj).and_then(|o| o.ivars.get(&name).copied()),
            Value::Class(class) => self.classes[class].ivars.get(&name).copied(),
            _ => None,
        };
        value.unwrap_or_default()
    }

    /// Writes an instance variable.
    pub fn ivar_set(&mut self, receiver: Value, name: Symbol, value: Value) -> VmResult<()> {
        match receiver {
            Value::Object(obj) => {
                self.check_frozen(receiver)?;
                if let Some(object) = self.heap.get_mut(obj) {
                    object.ivars.insert(name, value);
                }
                Ok(())
            }
            Value::Class(class) => {
                self.classes[class].ivars.insert(name, value);
                Ok(())
            }
            _ => Err(self.frozen_error(receiver)),
        }
    }

    /// Raises `FrozenError` if `value` is frozen.
    pub(crate) fn check_frozen(&mut self, value: Value) -> VmResult<()> {
        let frozen = match value {
            Value::Object(obj) => self.heap.get(obj).is_some_and(|o| o.frozen),
            _ => true,
        };
        if frozen {
            return Err(self.frozen_error(value));
        }
        Ok(())
    }

    fn frozen_error(&mut self, value: Value) -> Unwind {
        let class = self.type_name(value);
        match self.inspect(value) {
            Ok(shown) => self.error(
                self.core.frozen_error,
                format!("can't modify frozen {class}: {shown}"),
            ),
            Err(unwind) => unwind,
        }
    }

    /// `value.inspect` as a Rust string.
    pub fn inspect(&mut self, value: Value) -> VmResult<String> {
        self.stringify(value, "inspect")
    }

    /// `value.to_s` as a Rust string.
    pub fn to_s(&mut self, value: Value) -> VmResult<String> {
        if let Some(s) = self.heap.str(value) {
            return Ok(s.to_owned());
        }
        self.stringify(value, "to_s")
    }

    fn stringify(&mut self, value: Value, method: &str) -> VmResult<String> {
        let result = self.funcall(value, method, &[])?;
        Ok(match self.heap.str(result) {
            Some(s) => s.to_owned(),
            None => self.any_to_s(value),
        })
    }

    /// `#<Foo>`
    pub(crate) fn any_to_s(&self, value: Value) -> String {
        format!("#<{}>", self.class_name(self.real_class(self.class_of(value))))
    }

    /// `a == b`, short-circuiting on identity.
    pub fn values_eq(&mut self, a: Value, b: Value) -> VmResult<bool> {
        if a == b {
            return Ok(true);
        }
        let args = vec![Arg::Positional(b)];
        Ok(self.call_method(a, Symbol::intern("=="), args, None)?.truthy())
    }

    /// Zero values become nil, one stays itself, more become an Array.
    pub(crate) fn collapse(&mut self, mut values: Vec<Value>) -> Value {
        match values.len() {
            0 => Value::Nil,
            1 => values.remove(0),
            _ => self.new_array(values),
        }
    }

    pub(crate) fn define_iseq_method(
        &mut self,
        owner: ClassId,
        name: Symbol,
        iseq: Arc<Iseq>,
        cref: ClassId,
    ) {
        trace!(owner = %self.class_name(owner), method = %name, "define method");
        self.classes[owner].methods.insert(
            name,
            MethodEntry {
                original_name: name,
                owner,
                cref,
                body: MethodBody::Iseq(iseq),
            },
        );
    }

    /// Adds a native instance method to `owner`.
    pub fn define_native(&mut self, owner: ClassId, method: NativeMethod) {
        let name = Symbol::intern(method.name);
        self.classes[owner]
            .methods
            .insert(name, MethodEntry::native(owner, method));
    }

    /// Adds a native method to the singleton class of `owner`.
    pub fn define_singleton_native(&mut self, owner: ClassId, method: NativeMethod) {
        let meta = self.classes.singleton_class(owner);
        self.define_native(meta, method);
    }
}
