//! The run loop.
//!
//! Frames and operand stacks belong to fibers. [`ExecutionContext::run`]
//! steps whichever fiber is current until the fiber it was started on is
//! back to the frame depth recorded in its [`Boundary`]. Interpreted calls
//! push a frame and keep running in the same loop; only natives that call
//! back into Ruby (`Proc#call`, `Class#new`, `send`, ...) start a nested loop.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{Arg, Unwind, VmResult};
use crate::compiler::{ClassDefKind, Instruction, Iseq};
use crate::runtime::class::ClassKind;
use crate::runtime::context::{ExecutionContext, FiberSwitch};
use crate::runtime::environment::EnvRef;
use crate::runtime::fiber::{FiberId, FiberState};
use crate::runtime::function::{CallFrame, FrameId, FrameKind};
use crate::runtime::symbol::Symbol;
use crate::runtime::value::{ClassId, Value};

/// Where a run loop hands control back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Boundary {
    fiber: FiberId,
    depth: usize,
}

/// What the loop does after an instruction.
pub(crate) enum Flow {
    Continue,
    Exit(VmResult<Value>),
}

impl ExecutionContext {
    /// Runs a script body with `main` as self and `Object` as lexical class.
    ///
    /// An exception escaping the body leaves `$!` as it was before the run.
    pub fn run_iseq(&mut self, iseq: Arc<Iseq>) -> VmResult<Value> {
        let (fiber, errinfo) = (self.fibers.current_id(), self.fibers.current().errinfo);
        let env = self.envs.alloc(iseq.local_count(), None);
        let frame = self.new_frame(FrameKind::Top, iseq, env, self.main, self.core.object);
        let result = self.execute(frame);
        if result.is_err() {
            if let Some(fiber) = self.fibers.get_mut(fiber) {
                fiber.errinfo = errinfo;
            }
        }
        result
    }

    /// A frame with no method, block or regions; `push_frame` fixes its
    /// stack base.
    pub(crate) fn new_frame(
        &mut self,
        kind: FrameKind,
        iseq: Arc<Iseq>,
        env: EnvRef,
        self_value: Value,
        cref: ClassId,
    ) -> CallFrame {
        CallFrame {
            id: self.next_frame_id(),
            kind,
            iseq,
            pc: 0,
            stack_base: 0,
            env,
            owns_env: true,
            self_value,
            cref,
            method: None,
            block: None,
            forwarded: None,
            regions: Vec::new(),
        }
    }

    /// Pushes `frame` and runs until it returns.
    pub(crate) fn execute(&mut self, frame: CallFrame) -> VmResult<Value> {
        let boundary = self.boundary();
        self.push_frame(frame)?;
        self.run(boundary)
    }

    /// The current fiber at its current depth.
    pub(crate) fn boundary(&self) -> Boundary {
        Boundary {
            fiber: self.fibers.current_id(),
            depth: self.fibers.current().frames.len(),
        }
    }

    /// Steps until `boundary` is reached, by a return or by an unwind.
    pub(crate) fn run(&mut self, boundary: Boundary) -> VmResult<Value> {
        self.fibers[boundary.fiber].loops += 1;
        let result = loop {
            let flow = match self.step(boundary) {
                Ok(flow) => flow,
                Err(unwind) => self.unwind(unwind, boundary),
            };
            if let Flow::Exit(result) = flow {
                break result;
            }
        };
        if let Some(fiber) = self.fibers.get_mut(boundary.fiber) {
            fiber.loops -= 1;
        }
        result
    }

    fn step(&mut self, boundary: Boundary) -> VmResult<Flow> {
        let frame = self.frame()?;
        let Some(instruction) = frame.iseq.instructions.get(frame.pc).cloned() else {
            return self.leave_frame(Value::Nil, boundary);
        };
        frame.pc += 1;

        match instruction {
            Instruction::Nop => {}
            Instruction::PutNil => self.push(Value::Nil),
            Instruction::PutTrue => self.push(Value::Bool(true)),
            Instruction::PutFalse => self.push(Value::Bool(false)),
            Instruction::PutSelf => {
                let value = self.frame()?.self_value;
                self.push(value);
            }
            Instruction::PutInteger(n) => self.push(Value::Integer(n)),
            Instruction::PutFloat(f) => self.push(Value::Float(f)),
            Instruction::PutSymbol(name) => self.push(Value::Symbol(name)),
            Instruction::PutString(s) => {
                let value = self.new_string(&*s);
                self.push(value);
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Dup => {
                let value = self.peek()?;
                self.push(value);
            }
            Instruction::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }

            Instruction::GetLocal { slot, depth } => {
                let env = self.frame()?.env;
                let value = self.envs.read(env, slot, depth).unwrap_or(Value::Nil);
                self.push(value);
            }
            Instruction::SetLocal { slot, depth } => {
                let value = self.pop()?;
                let env = self.frame()?.env;
                if !self.envs.write(env, slot, depth, value) {
                    return Err(self.malformed("local variable depth out of range"));
                }
            }
            Instruction::GetGlobal(name) => {
                let value = self.global_get(name);
                self.push(value);
            }
            Instruction::SetGlobal(name) => {
                let value = self.pop()?;
                self.global_set(name, value)?;
            }
            Instruction::AliasGlobal { new, old } => self.global_alias(new, old),
            Instruction::GetIvar(name) => {
                let receiver = self.frame()?.self_value;
                let value = self.ivar_get(receiver, name);
                self.push(value);
            }
            Instruction::SetIvar(name) => {
                let value = self.pop()?;
                let receiver = self.frame()?.self_value;
                self.ivar_set(receiver, name, value)?;
            }
            Instruction::GetConst(name) => {
                let value = self.const_lookup(name)?;
                self.push(value);
            }
            Instruction::SetConst(name) => {
                let value = self.pop()?;
                let cref = self.frame()?.cref;
                self.const_set(cref, name, value);
            }
            Instruction::NewArray(n) => {
                let items = self.pop_n(n as usize)?;
                let value = self.new_array(items);
                self.push(value);
            }
            Instruction::NewHash(n) => {
                let items = self.pop_n(2 * n as usize)?;
                let pairs = items.chunks_exact(2).map(|p| (p[0], p[1])).collect();
                let value = self.new_hash_from_pairs(pairs);
                self.push(value);
            }

            Instruction::Send(call) => return self.exec_send(&call),
            Instruction::InvokeSuper(call) => return self.exec_super(&call),
            Instruction::ZSuper => return self.exec_zsuper(),
            Instruction::Yield(call) => return self.exec_yield(&call),

            Instruction::Jump(target) => self.frame()?.pc = target,
            Instruction::BranchIf(target) => {
                if self.pop()?.truthy() {
                    self.frame()?.pc = target;
                }
            }
            Instruction::BranchUnless(target) => {
                if !self.pop()?.truthy() {
                    self.frame()?.pc = target;
                }
            }
            Instruction::Leave => {
                let value = self.pop()?;
                return self.leave_frame(value, boundary);
            }
            Instruction::Return => {
                let value = self.pop()?;
                return self.exec_return(value, boundary);
            }
            Instruction::Break => {
                let value = self.pop()?;
                return self.exec_break(value, boundary);
            }

            Instruction::DefineMethod { name, body } => {
                let iseq = self.child(body)?;
                let cref = self.frame()?.cref;
                self.define_iseq_method(cref, name, iseq, cref);
                self.push(Value::Symbol(name));
            }
            Instruction::DefineSingletonMethod { name, body } => {
                let target = self.pop()?;
                let iseq = self.child(body)?;
                let cref = self.frame()?.cref;
                let meta = self.singleton_class_of(target)?;
                self.define_iseq_method(meta, name, iseq, cref);
                self.push(Value::Symbol(name));
            }
            Instruction::DefineClass { name, kind, body } => {
                return self.exec_define_class(name, kind, body);
            }

            Instruction::Protect(region) => self.enter_region(region)?,
            Instruction::EndBody(region) => self.end_body(region)?,
            Instruction::EndElse(region) => self.end_else(region)?,
            Instruction::EndRescue(region) => self.end_rescue(region)?,
            Instruction::EndEnsure(region) => self.end_ensure(region)?,
            Instruction::RescueTest {
                region,
                clause,
                count,
            } => self.rescue_test(region, clause, count)?,
            Instruction::Retry(region) => self.retry_region(region)?,
        }
        Ok(Flow::Continue)
    }

    /// Propagates `unwind` frame by frame until a region takes it over, its
    /// target frame is reached, or it crosses `boundary`.
    fn unwind(&mut self, mut unwind: Unwind, boundary: Boundary) -> Flow {
        loop {
            let Some(frame_id) = self.fibers.current().frames.last().map(|f| f.id) else {
                return Flow::Exit(Err(unwind));
            };

            // break lands on the call in the creating frame, inside whatever
            // regions that frame has open
            if let Unwind::Break { target, value } = unwind {
                if target == frame_id {
                    self.push(value);
                    return Flow::Continue;
                }
            }

            match self.unwind_regions(unwind) {
                None => return Flow::Continue,
                Some(next) => unwind = next,
            }

            if let Unwind::Return { target, value } = unwind {
                if target == frame_id {
                    return self.complete_frame(value, boundary);
                }
            }

            self.pop_frame();
            if self.at_boundary(boundary) {
                return Flow::Exit(Err(unwind));
            }
            if self.fibers.current().frames.is_empty() {
                let escaped = self.escaped_fiber(unwind);
                if self.terminate_fiber().is_none() {
                    return Flow::Exit(Err(escaped));
                }
                unwind = escaped;
            }
        }
    }

    /// Pushes a frame, enforcing the depth limit.
    pub(crate) fn push_frame(&mut self, mut frame: CallFrame) -> VmResult<()> {
        let depth = self.fibers.current().frames.len();
        if depth >= self.config.max_frame_depth {
            if frame.owns_env {
                self.envs.release_if_uncaptured(frame.env);
            }
            return Err(self.error(self.core.system_stack_error, "stack level too deep"));
        }
        frame.stack_base = self.fibers.current().stack.len();
        trace!(frame = frame.id.0, label = %frame.label(), depth, "push frame");
        self.fibers.current_mut().frames.push(frame);
        Ok(())
    }

    /// Pops the running frame, dropping its operands and, unless a block
    /// captured it, its env.
    pub(crate) fn pop_frame(&mut self) -> Option<CallFrame> {
        let fiber = self.fibers.current_mut();
        let frame = fiber.frames.pop()?;
        fiber.stack.truncate(frame.stack_base);
        if frame.owns_env {
            self.envs.release_if_uncaptured(frame.env);
        }
        trace!(frame = frame.id.0, "pop frame");
        Some(frame)
    }

    fn at_boundary(&self, boundary: Boundary) -> bool {
        self.fibers.current_id() == boundary.fiber
            && self.fibers.current().frames.len() == boundary.depth
    }

    /// Returns `value` from the running frame, running ensure bodies of any
    /// region still open first.
    fn leave_frame(&mut self, value: Value, boundary: Boundary) -> VmResult<Flow> {
        let frame = self.frame()?;
        if !frame.regions.is_empty() {
            return Err(Unwind::Return {
                target: frame.id,
                value,
            });
        }
        Ok(self.complete_frame(value, boundary))
    }

    fn complete_frame(&mut self, value: Value, boundary: Boundary) -> Flow {
        self.pop_frame();
        if self.at_boundary(boundary) {
            return Flow::Exit(Ok(value));
        }
        if self.fibers.current().frames.is_empty() && self.terminate_fiber().is_none() {
            return Flow::Exit(Ok(value));
        }
        self.push(value);
        Flow::Continue
    }

    fn exec_return(&mut self, value: Value, boundary: Boundary) -> VmResult<Flow> {
        let kind = self.frame()?.kind;
        match kind {
            FrameKind::Block { lambda: true, .. } => self.leave_frame(value, boundary),
            FrameKind::Block { home, .. } => match home {
                Some(home) if self.frame_alive(home) => Err(Unwind::Return { target: home, value }),
                _ => Err(self.error(self.core.local_jump_error, "unexpected return")),
            },
            _ => self.leave_frame(value, boundary),
        }
    }

    fn exec_break(&mut self, value: Value, boundary: Boundary) -> VmResult<Flow> {
        let kind = self.frame()?.kind;
        match kind {
            FrameKind::Block { lambda: true, .. } => self.leave_frame(value, boundary),
            FrameKind::Block { creator, .. } if self.frame_alive(creator) => {
                Err(Unwind::Break {
                    target: creator,
                    value,
                })
            }
            _ => Err(self.error(self.core.local_jump_error, "break from proc-closure")),
        }
    }

    fn frame_alive(&self, id: FrameId) -> bool {
        self.fibers.current().frames.iter().rev().any(|f| f.id == id)
    }

    /// Marks the running fiber finished, switches to its resumer and
    /// releases the finished fiber.
    fn terminate_fiber(&mut self) -> Option<FiberId> {
        let fiber = self.fibers.current_mut();
        fiber.state = FiberState::Terminated;
        fiber.stack.clear();
        fiber.catch_tags.clear();
        let id = fiber.id;
        let resumer = fiber.resumer.take()?;
        self.fibers.set_current(resumer);
        self.fibers.release(id);
        debug!(fiber = %id, resumer = %resumer, "fiber terminated");
        Some(resumer)
    }

    /// What an unwind leaving a fiber becomes in the resumer.
    fn escaped_fiber(&mut self, unwind: Unwind) -> Unwind {
        match unwind {
            Unwind::Raise(_) | Unwind::Throw { .. } => unwind,
            Unwind::Return { .. } => self.error(self.core.local_jump_error, "unexpected return"),
            Unwind::Break { .. } => self.error(self.core.local_jump_error, "break from proc-closure"),
        }
    }

    /// Carries out a switch requested by `Fiber#resume` or `Fiber.yield`.
    pub(crate) fn perform_switch(&mut self, switch: FiberSwitch) -> VmResult<()> {
        let from = self.fibers.current_id();
        match switch {
            FiberSwitch::Resume { target, args } => {
                self.fibers[target].resumer = Some(from);
                self.fibers[target].state = FiberState::Resumed;
                self.fibers.set_current(target);
                debug!(from = %from, to = %target, "fiber resume");
                match self.fibers[target].body.take() {
                    Some(body) => {
                        let args = args.into_iter().map(Arg::Positional).collect();
                        if let Err(unwind) = self.push_block_frame(body, args, None) {
                            self.fibers[target].state = FiberState::Terminated;
                            self.fibers[target].resumer = None;
                            self.fibers.set_current(from);
                            self.fibers.release(target);
                            return Err(unwind);
                        }
                    }
                    None => {
                        let value = self.collapse(args);
                        self.push(value);
                    }
                }
            }
            FiberSwitch::Yield { value } => {
                let Some(resumer) = self.fibers[from].resumer.take() else {
                    return Err(self.error(self.core.fiber_error, "can't yield from root fiber"));
                };
                self.fibers[from].state = FiberState::Suspended;
                self.fibers.set_current(resumer);
                debug!(from = %from, to = %resumer, "fiber yield");
                self.push(value);
            }
        }
        Ok(())
    }

    fn exec_define_class(&mut self, name: Symbol, kind: ClassDefKind, body: usize) -> VmResult<Flow> {
        let superclass = match kind {
            ClassDefKind::Class { superclass: true } => match self.pop()? {
                Value::Class(c) if self.classes[c].kind == ClassKind::Class => Some(c),
                other => {
                    let given = self.describe_instance(other);
                    return Err(self.type_error(format!(
                        "superclass must be an instance of Class (given {given})"
                    )));
                }
            },
            _ => None,
        };
        let iseq = self.child(body)?;
        let cref = self.frame()?.cref;
        let class = self.open_class(cref, name, kind == ClassDefKind::Module, superclass)?;
        let env = self.envs.alloc(iseq.local_count(), None);
        let frame = self.new_frame(FrameKind::Class, iseq, env, Value::Class(class), class);
        self.push_frame(frame)?;
        Ok(Flow::Continue)
    }

    /// Finds `name` under `cref` or creates it.
    fn open_class(
        &mut self,
        cref: ClassId,
        name: Symbol,
        module: bool,
        superclass: Option<ClassId>,
    ) -> VmResult<ClassId> {
        let noun = if module { "module" } else { "class" };
        match self.classes[cref].constants.get(&name).copied() {
            Some(Value::Class(existing)) => {
                let record = &self.classes[existing];
                let is_module = record.kind == ClassKind::Module;
                let mismatch = superclass.is_some_and(|s| record.superclass != Some(s));
                if is_module != module {
                    return Err(self.type_error(format!("{name} is not a {noun}")));
                }
                if mismatch {
                    return Err(self.type_error(format!("superclass mismatch for class {name}")));
                }
                Ok(existing)
            }
            Some(_) => Err(self.type_error(format!("{name} is not a {noun}"))),
            None => {
                let full_name = if cref == self.core.object {
                    name.to_string()
                } else {
                    format!("{}::{name}", self.class_name(cref))
                };
                let class = if module {
                    self.classes.define(Some(full_name), ClassKind::Module, None, None)
                } else {
                    let superclass = superclass.unwrap_or(self.core.object);
                    self.classes
                        .define(Some(full_name), ClassKind::Class, Some(superclass), None)
                };
                if cref != self.core.object {
                    self.classes[class].lexical_parent = Some(cref);
                }
                self.classes[cref].constants.insert(name, Value::Class(class));
                debug!(class = %self.class_name(class), "opened new {noun}");
                Ok(class)
            }
        }
    }

    /// Constant lookup: lexical scopes outward, then the ancestry of the
    /// innermost one, then `Object`.
    pub(crate) fn const_lookup(&mut self, name: Symbol) -> VmResult<Value> {
        let cref = self.frame()?.cref;
        let mut scope = Some(cref);
        while let Some(class) = scope {
            if let Some(value) = self.classes[class].constants.get(&name) {
                return Ok(*value);
            }
            scope = self.classes[class].lexical_parent;
        }
        let found = self
            .classes
            .const_get(cref, name)
            .or_else(|| self.classes.const_get(self.core.object, name));
        match found {
            Some(value) => Ok(value),
            None if cref == self.core.object => {
                Err(self.error(self.core.name_error, format!("uninitialized constant {name}")))
            }
            None => {
                let scope = self.class_name(cref);
                Err(self.error(
                    self.core.name_error,
                    format!("uninitialized constant {scope}::{name}"),
                ))
            }
        }
    }

    /// Assigns a constant, naming an anonymous class after it.
    pub(crate) fn const_set(&mut self, cref: ClassId, name: Symbol, value: Value) {
        if let Value::Class(class) = value {
            if self.classes[class].name.is_none() {
                let full_name = if cref == self.core.object {
                    name.to_string()
                } else {
                    format!("{}::{name}", self.class_name(cref))
                };
                self.classes[class].name = Some(full_name);
            }
        }
        self.classes[cref].constants.insert(name, value);
    }

    fn child(&mut self, index: usize) -> VmResult<Arc<Iseq>> {
        let child = self.frame()?.iseq.children.get(index).cloned();
        match child {
            Some(iseq) => Ok(iseq),
            None => Err(self.malformed("child iseq index out of range")),
        }
    }

    /// The running frame.
    pub(crate) fn frame(&mut self) -> VmResult<&mut CallFrame> {
        if self.fibers.current().frames.is_empty() {
            return Err(self.malformed("no active frame"));
        }
        let frames = &mut self.fibers.current_mut().frames;
        let last = frames.len() - 1;
        Ok(&mut frames[last])
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.fibers.current_mut().stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        match self.fibers.current_mut().stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.malformed("operand stack underflow")),
        }
    }

    fn peek(&mut self) -> VmResult<Value> {
        match self.fibers.current().stack.last() {
            Some(value) => Ok(*value),
            None => Err(self.malformed("operand stack underflow")),
        }
    }

    /// Pops `n` operands, returned in push order.
    pub(crate) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let len = self.fibers.current().stack.len();
        if len < n {
            return Err(self.malformed("operand stack underflow"));
        }
        Ok(self.fibers.current_mut().stack.split_off(len - n))
    }

    /// A `RuntimeError` for instruction streams the engine cannot run.
    pub(crate) fn malformed(&mut self, what: &str) -> Unwind {
        self.error(
            self.core.runtime_error,
            format!("malformed instruction sequence: {what}"),
        )
    }
}
