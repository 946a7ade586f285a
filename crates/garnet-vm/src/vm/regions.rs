//! Protected regions: `begin`/`rescue`/`else`/`ensure`.
//!
//! Every frame keeps a stack of [`ActiveRegion`]s, innermost last. Normal
//! completion of each part is driven by the `End*` instructions the builder
//! emits at part boundaries. Abrupt completion (a raise, a non-local
//! `return`/`break`, a `throw`) is driven by
//! [`ExecutionContext::unwind_regions`], which the unwinder calls for every
//! frame it passes through before popping it.
//!
//! ```text
//! Body ──raise──▶ Matching(0) ──no match──▶ Matching(1) ... ──▶ Ensuring ──▶ exit
//!   │                 │match                                      ▲
//!   │                 ▼                                           │
//!   ├──EndBody──▶ Else ──EndElse────────────────────────────────▶─┤
//!   │             Rescuing(i) ──EndRescue───────────────────────▶─┘
//!   └──retry (from Rescuing) resets to Body
//! ```

use std::sync::Arc;

use tracing::trace;

use super::{Unwind, VmResult};
use crate::compiler::{Iseq, Region};
use crate::runtime::context::ExecutionContext;
use crate::runtime::value::Value;

/// Which part of a region is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Protected body
    Body,
    /// Evaluating the class list of rescue clause `n`
    Matching(usize),
    /// Running the body of rescue clause `n`
    Rescuing(usize),
    /// Running the `else` body
    Else,
    /// Running the `ensure` body
    Ensuring,
}

/// How the part before `ensure` finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// With a value; execution continues at the region exit
    Normal(Value),
    /// Abruptly; the unwind resumes once `ensure` finishes
    Abrupt(Unwind),
}

/// Runtime state of a region entered by a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveRegion {
    /// Index into the iseq's region table
    pub region: usize,
    /// Current part
    pub state: RegionState,
    /// Outcome waiting on the rescue test or the ensure body
    pub pending: Option<Completion>,
    /// Operand stack height on entry
    pub stack_height: usize,
    /// `$!` on entry, restored when a rescue body completes
    pub saved_errinfo: Value,
}

impl ExecutionContext {
    /// `Protect`: enters region `region` of the running frame.
    pub(crate) fn enter_region(&mut self, region: usize) -> VmResult<()> {
        let fiber = self.fibers.current();
        let active = ActiveRegion {
            region,
            state: RegionState::Body,
            pending: None,
            stack_height: fiber.stack.len(),
            saved_errinfo: fiber.errinfo,
        };
        let frame = self.frame()?;
        frame.regions.push(active);
        trace!(region, depth = frame.regions.len(), "enter region");
        Ok(())
    }

    /// `EndBody`: the protected body completed without raising.
    pub(crate) fn end_body(&mut self, region: usize) -> VmResult<()> {
        let value = self.pop()?;
        let (iseq, _) = self.active_region(region)?;
        match iseq.regions[region].else_body {
            Some(target) => {
                let frame = self.frame()?;
                frame.pc = target;
                set_state(&mut frame.regions, RegionState::Else, None);
                trace!(region, "region else");
                Ok(())
            }
            None => self.complete_region(&iseq.regions[region], value),
        }
    }

    /// `EndElse`: the else body completed.
    pub(crate) fn end_else(&mut self, region: usize) -> VmResult<()> {
        let value = self.pop()?;
        let (iseq, _) = self.active_region(region)?;
        self.complete_region(&iseq.regions[region], value)
    }

    /// `EndRescue`: a rescue body completed; the exception is handled.
    pub(crate) fn end_rescue(&mut self, region: usize) -> VmResult<()> {
        let value = self.pop()?;
        let (iseq, active) = self.active_region(region)?;
        let desc = &iseq.regions[region];
        if let RegionState::Rescuing(clause) = active.state {
            self.clear_rescue_binding(desc, clause)?;
        }
        self.fibers.current_mut().errinfo = active.saved_errinfo;
        self.complete_region(desc, value)
    }

    /// `EndEnsure`: the ensure body completed; its own value is dropped and
    /// whatever was pending before it resumes.
    pub(crate) fn end_ensure(&mut self, region: usize) -> VmResult<()> {
        self.pop()?;
        let (iseq, active) = self.active_region(region)?;
        let exit = iseq.regions[region].exit;
        let frame = self.frame()?;
        frame.regions.pop();
        match active.pending {
            Some(Completion::Abrupt(unwind)) => {
                trace!(region, "ensure done, resuming unwind");
                Err(unwind)
            }
            Some(Completion::Normal(value)) => {
                frame.pc = exit;
                self.push(value);
                Ok(())
            }
            None => {
                frame.pc = exit;
                self.push(Value::Nil);
                Ok(())
            }
        }
    }

    /// `RescueTest`: pops `count` class operands and decides whether clause
    /// `clause` handles the pending exception.
    pub(crate) fn rescue_test(&mut self, region: usize, clause: usize, count: u32) -> VmResult<()> {
        let classes = self.pop_n(count as usize)?;
        let (iseq, active) = self.active_region(region)?;
        let Some(Completion::Abrupt(Unwind::Raise(exception))) = active.pending else {
            return Err(self.malformed("rescue test without a pending exception"));
        };

        let matched = if classes.is_empty() {
            self.is_a(exception, self.core.standard_error)
        } else {
            let mut matched = false;
            for class in classes {
                let Value::Class(class) = class else {
                    return Err(self.type_error("class or module required for rescue clause"));
                };
                if self.is_a(exception, class) {
                    matched = true;
                    break;
                }
            }
            matched
        };

        let desc = &iseq.regions[region];
        if matched {
            let frame = self.frame()?;
            set_state(&mut frame.regions, RegionState::Rescuing(clause), None);
            if let Some(slot) = desc.clauses.get(clause).and_then(|c| c.binding) {
                let env = frame.env;
                self.envs.write(env, slot, 0, exception);
            }
            trace!(region, clause, "rescue clause matched");
            return Ok(());
        }

        match desc.clauses.get(clause + 1) {
            Some(next) => {
                let frame = self.frame()?;
                frame.pc = next.test;
                set_state(
                    &mut frame.regions,
                    RegionState::Matching(clause + 1),
                    active.pending,
                );
                Ok(())
            }
            None => Err(Unwind::Raise(exception)),
        }
    }

    /// `Retry`: restarts the protected body from a rescue body.
    pub(crate) fn retry_region(&mut self, region: usize) -> VmResult<()> {
        let (iseq, active) = self.active_region(region)?;
        let RegionState::Rescuing(clause) = active.state else {
            return Err(self.malformed("retry outside of a rescue body"));
        };
        let desc = &iseq.regions[region];
        self.clear_rescue_binding(desc, clause)?;
        let fiber = self.fibers.current_mut();
        fiber.errinfo = active.saved_errinfo;
        fiber.stack.truncate(active.stack_height);
        let frame = self.frame()?;
        frame.pc = desc.body;
        set_state(&mut frame.regions, RegionState::Body, None);
        trace!(region, "retry");
        Ok(())
    }

    /// Offers an abrupt completion to the running frame's regions, innermost
    /// first. Returns `None` when a region took over (execution continues in
    /// a rescue test or ensure body), or the unwind to keep propagating once
    /// every region of the frame has been left.
    pub(crate) fn unwind_regions(&mut self, unwind: Unwind) -> Option<Unwind> {
        loop {
            let fiber = self.fibers.current_mut();
            let Some(frame) = fiber.frames.last_mut() else {
                return Some(unwind);
            };
            let Some(active) = frame.regions.last().copied() else {
                return Some(unwind);
            };
            let iseq = Arc::clone(&frame.iseq);
            let Some(desc) = iseq.regions.get(active.region) else {
                frame.regions.pop();
                continue;
            };

            match (active.state, unwind) {
                (RegionState::Body, Unwind::Raise(exception)) if !desc.clauses.is_empty() => {
                    frame.pc = desc.clauses[0].test;
                    set_state(
                        &mut frame.regions,
                        RegionState::Matching(0),
                        Some(Completion::Abrupt(unwind)),
                    );
                    fiber.stack.truncate(active.stack_height);
                    fiber.errinfo = exception;
                    trace!(region = active.region, "raise caught, matching");
                    return None;
                }
                (RegionState::Ensuring, _) => {
                    // the ensure body itself exited abruptly and replaces
                    // whatever was pending
                    frame.regions.pop();
                    trace!(region = active.region, "ensure exited abruptly");
                }
                (state, _) => {
                    if let RegionState::Rescuing(clause) = state {
                        if let Some(slot) = desc.clauses.get(clause).and_then(|c| c.binding) {
                            let env = frame.env;
                            self.envs.write(env, slot, 0, Value::Nil);
                        }
                        if !matches!(unwind, Unwind::Raise(_)) {
                            self.fibers.current_mut().errinfo = active.saved_errinfo;
                        }
                    }
                    let fiber = self.fibers.current_mut();
                    let Some(frame) = fiber.frames.last_mut() else {
                        return Some(unwind);
                    };
                    match desc.ensure {
                        Some(ensure) => {
                            frame.pc = ensure;
                            set_state(
                                &mut frame.regions,
                                RegionState::Ensuring,
                                Some(Completion::Abrupt(unwind)),
                            );
                            fiber.stack.truncate(active.stack_height);
                            if let Unwind::Raise(exception) = unwind {
                                fiber.errinfo = exception;
                            }
                            trace!(region = active.region, "running ensure");
                            return None;
                        }
                        None => {
                            frame.regions.pop();
                        }
                    }
                }
            }
        }
    }

    fn complete_region(&mut self, desc: &Region, value: Value) -> VmResult<()> {
        let frame = self.frame()?;
        match desc.ensure {
            Some(ensure) => {
                frame.pc = ensure;
                set_state(
                    &mut frame.regions,
                    RegionState::Ensuring,
                    Some(Completion::Normal(value)),
                );
            }
            None => {
                frame.regions.pop();
                frame.pc = desc.exit;
                self.push(value);
            }
        }
        Ok(())
    }

    fn clear_rescue_binding(&mut self, desc: &Region, clause: usize) -> VmResult<()> {
        if let Some(slot) = desc.clauses.get(clause).and_then(|c| c.binding) {
            let env = self.frame()?.env;
            self.envs.write(env, slot, 0, Value::Nil);
        }
        Ok(())
    }

    /// The innermost region of the running frame, which must be `region`.
    fn active_region(&mut self, region: usize) -> VmResult<(Arc<Iseq>, ActiveRegion)> {
        let frame = self.frame()?;
        let iseq = Arc::clone(&frame.iseq);
        match frame.regions.last().copied() {
            Some(active) if active.region == region && region < iseq.regions.len() => {
                Ok((iseq, active))
            }
            _ => Err(self.malformed("region instruction outside its region")),
        }
    }
}

fn set_state(regions: &mut [ActiveRegion], state: RegionState, pending: Option<Completion>) {
    if let Some(active) = regions.last_mut() {
        active.state = state;
        active.pending = pending;
    }
}
